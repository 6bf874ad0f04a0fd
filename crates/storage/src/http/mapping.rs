//! Translation between store JSON and domain types.
//!
//! Items arrive either flat (`{id, documentId, nom, ...}`) or wrapped
//! (`{id, attributes: {...}}`); relations arrive either as arrays or as
//! `{data: [...]}`. Everything funnels through [`flatten`] and
//! [`relation_items`] so both shapes are accepted everywhere.

use chrono::{DateTime, Utc};
use revise_core::model::{
    DocumentId, Exam, ExamChanges, ExamId, NewExam, NewSession, SessionId, SessionLink,
    SessionTag, StudySession,
};
use serde_json::{Map, Value, json};

use crate::repository::{Pagination, RelationField, RelationOp, StorageError};

/// Attribute names of the remote schema.
pub(crate) mod wire {
    pub const ID: &str = "id";
    pub const DOCUMENT_ID: &str = "documentId";
    pub const ATTRIBUTES: &str = "attributes";
    pub const DATA: &str = "data";

    pub const EXAM_CODE: &str = "idexam";
    pub const EXAM_REFERENCE: &str = "examReference";
    pub const EXAM_NAME: &str = "nom";
    pub const EXAM_DATE: &str = "date";
    pub const EXAM_WEIGHT: &str = "poids";

    pub const SESSION_TAG: &str = "idsession";
    pub const SESSION_START: &str = "date_debut";
    pub const SESSION_END: &str = "date_fin";
    pub const SESSION_PROGRESS: &str = "avancement";
    pub const SESSION_COMMENT: &str = "commentaire";

    /// Keys under which a student record may expose its login user.
    pub const OWNER_USER_KEYS: [&str; 2] = ["user", "users_permissions_user"];
}

fn ser(msg: impl Into<String>) -> StorageError {
    StorageError::Serialization(msg.into())
}

fn domain<E: Into<revise_core::Error>>(e: E) -> StorageError {
    StorageError::Serialization(e.into().to_string())
}

/// Merge a wrapped node into one flat attribute map.
pub(crate) fn flatten(node: &Value) -> Result<Map<String, Value>, StorageError> {
    let obj = node
        .as_object()
        .ok_or_else(|| ser(format!("expected an object, got {node}")))?;
    match obj.get(wire::ATTRIBUTES) {
        Some(Value::Object(attributes)) => {
            let mut flat = attributes.clone();
            for key in [wire::ID, wire::DOCUMENT_ID] {
                if let Some(value) = obj.get(key) {
                    flat.entry(key).or_insert_with(|| value.clone());
                }
            }
            Ok(flat)
        }
        _ => Ok(obj.clone()),
    }
}

/// Items of a to-many or to-one relation, whatever its envelope.
pub(crate) fn relation_items(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(node @ Value::Object(obj)) => match obj.get(wire::DATA) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(single @ Value::Object(_)) => vec![single],
            Some(_) => Vec::new(),
            None => vec![node],
        },
        _ => Vec::new(),
    }
}

/// The `data` member of a response body.
pub(crate) fn data_node(body: &Value) -> Result<&Value, StorageError> {
    body.get(wire::DATA)
        .filter(|data| !data.is_null())
        .ok_or_else(|| ser("response has no data"))
}

fn str_field<'a>(flat: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    flat.get(key).and_then(Value::as_str)
}

fn u64_field(flat: &Map<String, Value>, key: &str) -> Option<u64> {
    match flat.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn f64_field(flat: &Map<String, Value>, key: &str) -> Option<f64> {
    match flat.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn datetime_field(flat: &Map<String, Value>, key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
    str_field(flat, key)
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| ser(format!("{key}: {e}")))
        })
        .transpose()
}

fn document_id(flat: &Map<String, Value>) -> Result<DocumentId, StorageError> {
    str_field(flat, wire::DOCUMENT_ID)
        .filter(|id| !id.is_empty())
        .map(DocumentId::new)
        .ok_or_else(|| ser("missing documentId"))
}

pub(crate) fn link_from_node(node: &Value) -> Result<SessionLink, StorageError> {
    let flat = flatten(node)?;
    Ok(SessionLink {
        id: u64_field(&flat, wire::ID).map(SessionId::new),
        document_id: document_id(&flat)?,
        start: datetime_field(&flat, wire::SESSION_START)?,
        end: datetime_field(&flat, wire::SESSION_END)?,
    })
}

/// Document ids behind `relation` on an exam node.
pub(crate) fn linked_ids_from_node(
    node: &Value,
    relation: &RelationField,
) -> Result<Vec<DocumentId>, StorageError> {
    let flat = flatten(node)?;
    relation_items(flat.get(relation.as_str()))
        .into_iter()
        .map(|item| flatten(item).and_then(|f| document_id(&f)))
        .collect()
}

fn owner_user_ids(flat: &Map<String, Value>, owners: &[RelationField]) -> Vec<u64> {
    let mut ids = Vec::new();
    for relation in owners {
        for student in relation_items(flat.get(relation.as_str())) {
            let Ok(student) = flatten(student) else {
                continue;
            };
            let user = wire::OWNER_USER_KEYS
                .iter()
                .find_map(|key| relation_items(student.get(*key)).into_iter().next());
            if let Some(id) = user.and_then(|u| flatten(u).ok()).and_then(|u| u64_field(&u, wire::ID))
                && !ids.contains(&id)
            {
                ids.push(id);
            }
        }
    }
    ids
}

pub(crate) fn exam_from_node(
    node: &Value,
    sessions: &RelationField,
    owners: &[RelationField],
) -> Result<Exam, StorageError> {
    let flat = flatten(node)?;
    let id = u64_field(&flat, wire::ID).ok_or_else(|| ser("exam without id"))?;
    let reference = str_field(&flat, wire::EXAM_REFERENCE).and_then(|raw| raw.parse().ok());

    let exam = Exam::from_persisted(
        ExamId::new(id),
        document_id(&flat)?,
        str_field(&flat, wire::EXAM_CODE).unwrap_or_default(),
        reference,
        str_field(&flat, wire::EXAM_NAME).unwrap_or_default(),
        datetime_field(&flat, wire::EXAM_DATE)?,
        f64_field(&flat, wire::EXAM_WEIGHT),
    )
    .map_err(domain)?;

    let links = relation_items(flat.get(sessions.as_str()))
        .into_iter()
        .map(link_from_node)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(exam
        .with_sessions(links)
        .with_owner_user_ids(owner_user_ids(&flat, owners)))
}

pub(crate) fn session_from_node(node: &Value) -> Result<StudySession, StorageError> {
    let flat = flatten(node)?;
    let id = u64_field(&flat, wire::ID).ok_or_else(|| ser("session without id"))?;
    let tag = u64_field(&flat, wire::SESSION_TAG)
        .and_then(|t| u32::try_from(t).ok())
        .map(SessionTag::new)
        .ok_or_else(|| ser("missing or oversized idsession"))?;
    let start = datetime_field(&flat, wire::SESSION_START)?.ok_or_else(|| ser("missing date_debut"))?;
    let end = datetime_field(&flat, wire::SESSION_END)?.ok_or_else(|| ser("missing date_fin"))?;
    let progress = f64_field(&flat, wire::SESSION_PROGRESS)
        .unwrap_or_default()
        .round()
        .clamp(0.0, f64::from(u8::MAX));
    // clamped to the u8 range above
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let progress = progress as u8;

    StudySession::from_persisted(
        SessionId::new(id),
        document_id(&flat)?,
        tag,
        start,
        end,
        progress,
        str_field(&flat, wire::SESSION_COMMENT).map(str::to_owned),
    )
    .map_err(domain)
}

pub(crate) fn pagination_from_meta(meta: Option<&Value>, fallback: Pagination) -> Pagination {
    let Some(Value::Object(p)) = meta.and_then(|m| m.get("pagination")) else {
        return fallback;
    };
    let read = |key: &str| p.get(key).and_then(Value::as_u64);
    let narrow = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
    Pagination {
        page: read("page").map_or(fallback.page, narrow),
        page_size: read("pageSize").map_or(fallback.page_size, narrow),
        page_count: read("pageCount").map_or(fallback.page_count, narrow),
        total: read("total").unwrap_or(fallback.total),
    }
}

//
// ─── REQUEST BODIES ────────────────────────────────────────────────────────────
//

fn envelope(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let data: Map<String, Value> = entries
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect();
    let mut body = Map::new();
    body.insert(wire::DATA.to_owned(), Value::Object(data));
    Value::Object(body)
}

pub(crate) fn exam_body(exam: &NewExam) -> Value {
    envelope([
        (wire::EXAM_REFERENCE, json!(exam.reference.to_string())),
        (wire::EXAM_CODE, json!(exam.code)),
        (wire::EXAM_NAME, json!(exam.name)),
        (wire::EXAM_DATE, json!(exam.scheduled_at.to_rfc3339())),
        (wire::EXAM_WEIGHT, json!(exam.weight)),
    ])
}

pub(crate) fn changes_body(changes: &ExamChanges) -> Value {
    let mut entries = Vec::new();
    if let Some(code) = &changes.code {
        entries.push((wire::EXAM_CODE, json!(code)));
    }
    if let Some(name) = &changes.name {
        entries.push((wire::EXAM_NAME, json!(name)));
    }
    if let Some(at) = changes.scheduled_at {
        entries.push((wire::EXAM_DATE, json!(at.to_rfc3339())));
    }
    if let Some(weight) = changes.weight {
        entries.push((wire::EXAM_WEIGHT, json!(weight)));
    }
    envelope(entries)
}

pub(crate) fn session_body(session: &NewSession) -> Value {
    envelope([
        (wire::SESSION_TAG, json!(session.tag.value())),
        (wire::SESSION_START, json!(session.start.to_rfc3339())),
        (wire::SESSION_END, json!(session.end.to_rfc3339())),
        (wire::SESSION_PROGRESS, json!(session.progress)),
        (wire::SESSION_COMMENT, json!(session.comment)),
    ])
}

pub(crate) fn relation_body(relation: &RelationField, op: &RelationOp) -> Value {
    let ids: Vec<&str> = op.ids().iter().map(DocumentId::as_str).collect();
    let payload = match op {
        RelationOp::Connect(_) => json!({ "connect": ids }),
        RelationOp::Disconnect(_) => json!({ "disconnect": ids }),
        RelationOp::Set(_) => json!(ids),
    };
    let mut data = Map::new();
    data.insert(relation.as_str().to_owned(), payload);
    let mut body = Map::new();
    body.insert(wire::DATA.to_owned(), Value::Object(data));
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn sessions() -> RelationField {
        RelationField::new("sessions")
    }

    #[test]
    fn flat_and_wrapped_exams_normalize_identically() {
        let flat = json!({
            "id": 4,
            "documentId": "ex4",
            "idexam": "PHY-1",
            "nom": "Physics",
            "date": "2024-06-10T08:00:00.000Z",
            "poids": 25,
            "sessions": [{"id": 9, "documentId": "s9", "date_debut": "2024-06-06T18:00:00.000Z", "date_fin": "2024-06-06T19:00:00.000Z"}]
        });
        let wrapped = json!({
            "id": 4,
            "documentId": "ex4",
            "attributes": {
                "idexam": "PHY-1",
                "nom": "Physics",
                "date": "2024-06-10T08:00:00.000Z",
                "poids": 25,
                "sessions": {"data": [{"id": 9, "attributes": {"documentId": "s9", "date_debut": "2024-06-06T18:00:00.000Z", "date_fin": "2024-06-06T19:00:00.000Z"}}]}
            }
        });

        let a = exam_from_node(&flat, &sessions(), &[]).unwrap();
        let b = exam_from_node(&wrapped, &sessions(), &[]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name(), "Physics");
        assert_eq!(a.weight(), Some(25.0));
        assert_eq!(
            a.scheduled_at(),
            Some(Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap())
        );
        assert_eq!(a.session_document_ids(), vec![DocumentId::new("s9")]);
    }

    #[test]
    fn null_date_and_weight_are_kept_empty() {
        let node = json!({"id": 1, "documentId": "d", "nom": "N", "date": null, "poids": null});
        let exam = exam_from_node(&node, &sessions(), &[]).unwrap();
        assert_eq!(exam.scheduled_at(), None);
        assert_eq!(exam.weight(), None);
    }

    #[test]
    fn missing_document_id_is_a_serialization_error() {
        let node = json!({"id": 1, "nom": "N"});
        assert!(matches!(
            exam_from_node(&node, &sessions(), &[]),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn owner_user_ids_follow_both_user_keys_and_envelopes() {
        let node = json!({
            "id": 1,
            "documentId": "d",
            "nom": "N",
            "eleves": {"data": [
                {"id": 1, "attributes": {"user": {"data": {"id": 42}}}},
                {"id": 2, "attributes": {"users_permissions_user": {"id": 43}}}
            ]},
            "eleve": {"documentId": "st", "user": {"id": 44, "email": "z@z"}}
        });
        let owners = [RelationField::new("eleves"), RelationField::new("eleve")];
        let exam = exam_from_node(&node, &sessions(), &owners).unwrap();
        assert_eq!(exam.owner_user_ids(), &[42, 43, 44]);
    }

    #[test]
    fn session_node_maps_all_fields() {
        let node = json!({
            "id": 3,
            "documentId": "s3",
            "idsession": 123_456_789,
            "date_debut": "2024-06-06T18:00:00Z",
            "date_fin": "2024-06-06T19:00:00Z",
            "avancement": 0,
            "commentaire": "Auto"
        });
        let session = session_from_node(&node).unwrap();
        assert_eq!(session.tag().value(), 123_456_789);
        assert_eq!(session.progress(), 0);
        assert_eq!(session.comment(), Some("Auto"));
    }

    #[test]
    fn linked_ids_accept_both_envelopes() {
        let flat = json!({"documentId": "e", "sessions": [{"documentId": "a"}, {"documentId": "b"}]});
        let wrapped = json!({"id": 1, "attributes": {"sessions": {"data": [{"documentId": "a"}, {"id": 2, "attributes": {"documentId": "b"}}]}}});
        let expected = vec![DocumentId::new("a"), DocumentId::new("b")];
        assert_eq!(linked_ids_from_node(&flat, &sessions()).unwrap(), expected);
        assert_eq!(linked_ids_from_node(&wrapped, &sessions()).unwrap(), expected);
        let none = json!({"documentId": "e"});
        assert!(linked_ids_from_node(&none, &sessions()).unwrap().is_empty());
    }

    #[test]
    fn relation_bodies_use_operator_shapes() {
        let ids = vec![DocumentId::new("a"), DocumentId::new("b")];
        assert_eq!(
            relation_body(&sessions(), &RelationOp::Connect(ids.clone())),
            json!({"data": {"sessions": {"connect": ["a", "b"]}}})
        );
        assert_eq!(
            relation_body(&sessions(), &RelationOp::Disconnect(ids.clone())),
            json!({"data": {"sessions": {"disconnect": ["a", "b"]}}})
        );
        assert_eq!(
            relation_body(&sessions(), &RelationOp::Set(ids)),
            json!({"data": {"sessions": ["a", "b"]}})
        );
    }

    #[test]
    fn changes_body_only_carries_present_fields() {
        let body = changes_body(&ExamChanges {
            weight: Some(40.0),
            ..ExamChanges::default()
        });
        assert_eq!(body, json!({"data": {"poids": 40.0}}));
    }

    #[test]
    fn meta_pagination_overrides_fallback() {
        let meta = json!({"pagination": {"page": 2, "pageSize": 5, "pageCount": 4, "total": 17}});
        let p = pagination_from_meta(Some(&meta), Pagination::compute(1, 10, 0));
        assert_eq!(p, Pagination { page: 2, page_size: 5, page_count: 4, total: 17 });
        let fallback = Pagination::compute(1, 10, 3);
        assert_eq!(pagination_from_meta(None, fallback), fallback);
    }
}
