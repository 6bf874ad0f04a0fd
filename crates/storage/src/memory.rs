use async_trait::async_trait;
use revise_core::model::{
    DocumentId, Exam, ExamChanges, ExamId, NewExam, NewSession, SessionId, SessionLink,
    StudySession,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::repository::{
    ExamPage, ExamQuery, ExamRepository, Pagination, RelationField, RelationOp, SessionRepository,
    SortOrder, StorageError,
};

/// Schema and failure knobs of the in-memory store.
///
/// Mirrors what differs between real deployments: the relation names the
/// schema uses and which relation-mutation shapes it accepts.
#[derive(Debug, Clone)]
pub struct MemoryBehavior {
    pub owner_relation: String,
    pub session_relation: String,
    pub reject_connect: bool,
    pub reject_disconnect: bool,
    /// Answer relation mutations with `503 Service Unavailable`.
    pub relation_updates_unavailable: bool,
    /// Answer owner filters with `403 Forbidden`; populating owners still works.
    pub forbid_owner_filter: bool,
    /// Fail every exam listing with a transport error.
    pub listing_unavailable: bool,
    /// Refuse every session creation after this many succeeded.
    pub fail_session_create_after: Option<usize>,
    /// Refuse every session deletion after this many succeeded.
    pub fail_session_delete_after: Option<usize>,
}

impl Default for MemoryBehavior {
    fn default() -> Self {
        Self {
            owner_relation: "eleves".to_string(),
            session_relation: "sessions".to_string(),
            reject_connect: false,
            reject_disconnect: false,
            relation_updates_unavailable: false,
            forbid_owner_filter: false,
            listing_unavailable: false,
            fail_session_create_after: None,
            fail_session_delete_after: None,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredExam {
    exam: Exam,
    sessions: Vec<DocumentId>,
    owners: Vec<u64>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    exams: Vec<StoredExam>,
    sessions: BTreeMap<DocumentId, StudySession>,
    sessions_created: usize,
    sessions_deleted: usize,
    requests: Vec<String>,
    behavior: MemoryBehavior,
}

impl State {
    fn mint(&mut self, prefix: &str) -> (u64, DocumentId) {
        self.next_id += 1;
        (self.next_id, DocumentId::new(format!("{prefix}-{}", self.next_id)))
    }

    fn exam_mut(&mut self, id: &DocumentId) -> Result<&mut StoredExam, StorageError> {
        self.exams
            .iter_mut()
            .find(|stored| stored.exam.document_id() == id)
            .ok_or(StorageError::NotFound)
    }

    fn check_relation(&self, relation: &str, expected: &str) -> Result<(), StorageError> {
        if relation == expected {
            Ok(())
        } else {
            Err(StorageError::InvalidKey {
                key: relation.to_string(),
            })
        }
    }

    fn materialize(&self, stored: &StoredExam, sessions: bool, owners: bool) -> Exam {
        let mut exam = stored.exam.clone();
        if sessions {
            let links = stored
                .sessions
                .iter()
                .map(|id| {
                    self.sessions
                        .get(id)
                        .map_or_else(|| SessionLink::bare(id.clone()), StudySession::link)
                })
                .collect();
            exam = exam.with_sessions(links);
        }
        if owners {
            exam = exam.with_owner_user_ids(stored.owners.clone());
        }
        exam
    }
}

fn shape_rejected(shape: &str) -> StorageError {
    StorageError::Rejected {
        status: 400,
        message: format!("relation operation `{shape}` is not supported"),
    }
}

/// Thread-safe in-memory store for tests and offline use.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<State>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::with_behavior(MemoryBehavior::default())
    }

    #[must_use]
    pub fn with_behavior(behavior: MemoryBehavior) -> Self {
        let state = State {
            behavior,
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Replace the behavior knobs, keeping stored data.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn set_behavior(&self, behavior: MemoryBehavior) -> Result<(), StorageError> {
        self.lock()?.behavior = behavior;
        Ok(())
    }

    /// Link a student's user id to an exam through the owner relation.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the exam does not exist.
    pub fn assign_owner(&self, exam: &DocumentId, user_id: u64) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let stored = state.exam_mut(exam)?;
        if !stored.owners.contains(&user_id) {
            stored.owners.push(user_id);
        }
        Ok(())
    }

    /// Number of sessions stored, linked or not.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn session_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.sessions.len())
    }

    /// Labels of every request served so far, in order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn requests(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock()?.requests.clone())
    }
}

#[async_trait]
impl ExamRepository for InMemoryRepository {
    async fn list_exams(&self, query: &ExamQuery) -> Result<ExamPage, StorageError> {
        let mut state = self.lock()?;
        state.requests.push("list_exams".to_string());
        if state.behavior.listing_unavailable {
            return Err(StorageError::Transport("connection refused".to_string()));
        }

        let owner_relation = state.behavior.owner_relation.clone();
        if let Some(filter) = &query.owner_filter {
            state.check_relation(filter.relation.as_str(), &owner_relation)?;
            if state.behavior.forbid_owner_filter {
                return Err(StorageError::Unauthorized {
                    message: "Forbidden".to_string(),
                });
            }
        }
        for relation in &query.populate_owners {
            state.check_relation(relation.as_str(), &owner_relation)?;
        }

        let mut matching: Vec<&StoredExam> = state
            .exams
            .iter()
            .filter(|stored| {
                query
                    .owner_filter
                    .as_ref()
                    .is_none_or(|filter| stored.owners.contains(&filter.user_id))
            })
            .collect();
        // undated exams sort last in ascending order
        matching.sort_by_key(|stored| {
            (
                stored.exam.scheduled_at().is_none(),
                stored.exam.scheduled_at(),
            )
        });
        if query.date_order == SortOrder::Desc {
            matching.reverse();
        }

        let total = matching.len() as u64;
        let size = query.page_size.max(1) as usize;
        let skip = (query.page.max(1) as usize - 1) * size;
        let populate_owners = !query.populate_owners.is_empty();
        let exams = matching
            .into_iter()
            .skip(skip)
            .take(size)
            .map(|stored| state.materialize(stored, query.populate_sessions, populate_owners))
            .collect();

        Ok(ExamPage {
            exams,
            pagination: Pagination::compute(query.page.max(1), query.page_size, total),
        })
    }

    async fn get_exam(&self, id: &DocumentId) -> Result<Exam, StorageError> {
        let mut state = self.lock()?;
        state.requests.push(format!("get_exam {id}"));
        let stored = state
            .exams
            .iter()
            .find(|stored| stored.exam.document_id() == id)
            .ok_or(StorageError::NotFound)?;
        Ok(state.materialize(stored, true, false))
    }

    async fn linked_ids(
        &self,
        exam: &DocumentId,
        relation: &RelationField,
    ) -> Result<Vec<DocumentId>, StorageError> {
        let mut state = self.lock()?;
        state.requests.push(format!("linked_ids {exam} {relation}"));
        let session_relation = state.behavior.session_relation.clone();
        state.check_relation(relation.as_str(), &session_relation)?;
        Ok(state.exam_mut(exam)?.sessions.clone())
    }

    async fn create_exam(&self, exam: &NewExam) -> Result<Exam, StorageError> {
        let mut state = self.lock()?;
        state.requests.push("create_exam".to_string());
        let (id, document_id) = state.mint("exam");
        let created = Exam::from_persisted(
            ExamId::new(id),
            document_id,
            exam.code.clone(),
            Some(exam.reference),
            exam.name.clone(),
            Some(exam.scheduled_at),
            Some(exam.weight),
        )
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
        state.exams.push(StoredExam {
            exam: created.clone(),
            sessions: Vec::new(),
            owners: Vec::new(),
        });
        Ok(created)
    }

    async fn update_exam(
        &self,
        id: &DocumentId,
        changes: &ExamChanges,
    ) -> Result<Exam, StorageError> {
        let mut state = self.lock()?;
        state.requests.push(format!("update_exam {id}"));
        let stored = state.exam_mut(id)?;
        let current = &stored.exam;
        let updated = Exam::from_persisted(
            current.id(),
            current.document_id().clone(),
            changes.code.clone().unwrap_or_else(|| current.code().to_owned()),
            current.reference(),
            changes.name.clone().unwrap_or_else(|| current.name().to_owned()),
            changes.scheduled_at.or(current.scheduled_at()),
            changes.weight.or(current.weight()),
        )
        .map_err(|e| StorageError::Rejected {
            status: 400,
            message: e.to_string(),
        })?;
        stored.exam = updated.clone();
        Ok(updated)
    }

    async fn delete_exam(&self, id: &DocumentId) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.requests.push(format!("delete_exam {id}"));
        let before = state.exams.len();
        state.exams.retain(|stored| stored.exam.document_id() != id);
        if state.exams.len() == before {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn update_relation(
        &self,
        exam: &DocumentId,
        relation: &RelationField,
        op: &RelationOp,
    ) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state
            .requests
            .push(format!("update_relation {exam} {relation} {}", op.shape()));

        let behavior = state.behavior.clone();
        if behavior.relation_updates_unavailable {
            return Err(StorageError::Rejected {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        state.check_relation(relation.as_str(), &behavior.session_relation)?;
        match op {
            RelationOp::Connect(_) if behavior.reject_connect => return Err(shape_rejected("connect")),
            RelationOp::Disconnect(_) if behavior.reject_disconnect => {
                return Err(shape_rejected("disconnect"));
            }
            _ => {}
        }
        if let Some(missing) = op.ids().iter().find(|id| !state.sessions.contains_key(*id)) {
            return Err(StorageError::Rejected {
                status: 400,
                message: format!("relation target {missing} does not exist"),
            });
        }

        let stored = state.exam_mut(exam)?;
        match op {
            RelationOp::Connect(ids) => {
                for id in ids {
                    if !stored.sessions.contains(id) {
                        stored.sessions.push(id.clone());
                    }
                }
            }
            RelationOp::Disconnect(ids) => stored.sessions.retain(|id| !ids.contains(id)),
            RelationOp::Set(ids) => {
                let mut next: Vec<DocumentId> = Vec::with_capacity(ids.len());
                for id in ids {
                    if !next.contains(id) {
                        next.push(id.clone());
                    }
                }
                stored.sessions = next;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn create_session(&self, session: &NewSession) -> Result<StudySession, StorageError> {
        let mut state = self.lock()?;
        state.requests.push("create_session".to_string());
        if state
            .behavior
            .fail_session_create_after
            .is_some_and(|limit| state.sessions_created >= limit)
        {
            return Err(StorageError::Rejected {
                status: 500,
                message: "Internal Server Error".to_string(),
            });
        }
        let (id, document_id) = state.mint("session");
        let created = StudySession::from_persisted(
            SessionId::new(id),
            document_id.clone(),
            session.tag,
            session.start,
            session.end,
            session.progress,
            Some(session.comment.clone()),
        )
        .map_err(|e| StorageError::Rejected {
            status: 400,
            message: e.to_string(),
        })?;
        state.sessions.insert(document_id, created.clone());
        state.sessions_created += 1;
        Ok(created)
    }

    async fn delete_session(&self, id: &DocumentId) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.requests.push(format!("delete_session {id}"));
        if state
            .behavior
            .fail_session_delete_after
            .is_some_and(|limit| state.sessions_deleted >= limit)
        {
            return Err(StorageError::Transport("connection reset by peer".to_string()));
        }
        state.sessions.remove(id).ok_or(StorageError::NotFound)?;
        state.sessions_deleted += 1;
        Ok(())
    }
}
