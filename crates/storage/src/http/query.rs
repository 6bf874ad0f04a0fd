//! Bracket-notation query strings (`populate[sessions][fields][0]=documentId`).

use crate::http::mapping::wire;
use crate::repository::{ExamQuery, RelationField};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub(crate) fn push(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.pairs.push((key.into(), value.to_string()));
        self
    }

    /// `key[0]=a&key[1]=b...`
    pub(crate) fn list(&mut self, key: &str, values: &[&str]) -> &mut Self {
        for (i, value) in values.iter().enumerate() {
            self.push(format!("{key}[{i}]"), value);
        }
        self
    }

    pub(crate) fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

const EXAM_FIELDS: [&str; 6] = [
    wire::DOCUMENT_ID,
    wire::EXAM_REFERENCE,
    wire::EXAM_CODE,
    wire::EXAM_NAME,
    wire::EXAM_DATE,
    wire::EXAM_WEIGHT,
];

const SESSION_LINK_FIELDS: [&str; 3] = [wire::DOCUMENT_ID, wire::SESSION_START, wire::SESSION_END];

/// Populate the session relation with the fields a calendar needs.
pub(crate) fn populate_sessions(params: &mut QueryParams, relation: &RelationField) {
    params.list(
        &format!("populate[{relation}][fields]"),
        &SESSION_LINK_FIELDS,
    );
}

/// Populate only the document ids behind `relation`.
pub(crate) fn populate_ids(params: &mut QueryParams, relation: &RelationField) {
    params.list(&format!("populate[{relation}][fields]"), &[wire::DOCUMENT_ID]);
}

/// One exam with its calendar links.
pub(crate) fn exam_detail_params(sessions: &RelationField) -> QueryParams {
    let mut params = QueryParams::default();
    params.list("fields", &EXAM_FIELDS);
    populate_sessions(&mut params, sessions);
    params
}

/// Only the ids linked through `relation`.
pub(crate) fn linked_ids_params(relation: &RelationField) -> QueryParams {
    let mut params = QueryParams::default();
    params.list("fields", &[wire::DOCUMENT_ID]);
    populate_ids(&mut params, relation);
    params
}

pub(crate) fn exam_list_params(query: &ExamQuery, sessions: &RelationField) -> QueryParams {
    let mut params = QueryParams::default();
    params.list("fields", &EXAM_FIELDS);

    if query.populate_sessions {
        populate_sessions(&mut params, sessions);
    }
    for owner in &query.populate_owners {
        populate_ids(&mut params, owner);
        params.list(
            &format!("populate[{owner}][populate][user][fields]"),
            &["id", "email"],
        );
    }

    params
        .push("pagination[page]", query.page.max(1))
        .push("pagination[pageSize]", query.page_size.max(1));
    if query.with_count {
        params.push("pagination[withCount]", true);
    }
    params.push(
        "sort[0]",
        format!("{}:{}", wire::EXAM_DATE, query.date_order.as_str()),
    );

    if let Some(filter) = &query.owner_filter {
        params.push(
            format!("filters[{}][user][id][$eq]", filter.relation),
            filter.user_id,
        );
    }
    params
}
