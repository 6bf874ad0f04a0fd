use async_trait::async_trait;
use revise_core::model::{DocumentId, Exam, ExamChanges, NewExam, NewSession, StudySession};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::memory::InMemoryRepository;

/// Errors surfaced by storage adapters.
///
/// Adapters classify remote failures once, at their boundary, so callers can
/// branch on the variant instead of on message text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    /// The store does not know a field or relation named `key`.
    #[error("invalid key: {key}")]
    InvalidKey { key: String },

    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// The store answered with an error status: a 4xx for a refused payload,
    /// a 5xx for a failure on its side.
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// No usable answer from the store.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    #[must_use]
    pub fn is_invalid_key(&self) -> bool {
        matches!(self, StorageError::InvalidKey { .. })
    }

    /// True when the store understood the request but refused its shape, which
    /// makes trying an alternative shape worthwhile. Server failures (5xx) are
    /// not shape rejections.
    #[must_use]
    pub fn is_shape_rejection(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidKey { .. }
                | StorageError::Rejected {
                    status: 400..=499,
                    ..
                }
        )
    }

    /// Best human-readable message for end users.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            StorageError::NotFound => "Not Found".to_string(),
            StorageError::InvalidKey { key } => format!("Invalid key {key}"),
            StorageError::Unauthorized { message }
            | StorageError::Rejected { message, .. }
            | StorageError::Transport(message) => message.clone(),
            StorageError::Connection(_) | StorageError::Serialization(_) => self.to_string(),
        }
    }
}

//
// ─── RELATIONS ─────────────────────────────────────────────────────────────────
//

/// Name of a relation attribute in the remote schema (e.g. `sessions`, `eleves`).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RelationField(String);

impl RelationField {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RelationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelationField({})", self.0)
    }
}

impl fmt::Display for RelationField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A mutation of a to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationOp {
    /// Add links, leaving existing ones untouched.
    Connect(Vec<DocumentId>),
    /// Remove links, leaving the others untouched.
    Disconnect(Vec<DocumentId>),
    /// Replace the whole set of links.
    Set(Vec<DocumentId>),
}

impl RelationOp {
    #[must_use]
    pub fn ids(&self) -> &[DocumentId] {
        match self {
            RelationOp::Connect(ids) | RelationOp::Disconnect(ids) | RelationOp::Set(ids) => ids,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            RelationOp::Connect(_) => "connect",
            RelationOp::Disconnect(_) => "disconnect",
            RelationOp::Set(_) => "set",
        }
    }
}

//
// ─── QUERIES ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Restrict exams to those whose owner relation points at `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerFilter {
    pub relation: RelationField,
    pub user_id: u64,
}

/// Listing parameters for exams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamQuery {
    pub page: u32,
    pub page_size: u32,
    pub with_count: bool,
    pub date_order: SortOrder,
    pub populate_sessions: bool,
    pub owner_filter: Option<OwnerFilter>,
    /// Owner relations to populate (with their user), for client-side filtering.
    pub populate_owners: Vec<RelationField>,
}

impl Default for ExamQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 10,
            with_count: true,
            date_order: SortOrder::Asc,
            populate_sessions: true,
            owner_filter: None,
            populate_owners: Vec::new(),
        }
    }
}

impl ExamQuery {
    /// Smallest read that still exercises `relation` as a filter key.
    #[must_use]
    pub fn probe(relation: RelationField, user_id: u64) -> Self {
        Self {
            page: 1,
            page_size: 1,
            with_count: false,
            date_order: SortOrder::Asc,
            populate_sessions: false,
            owner_filter: Some(OwnerFilter { relation, user_id }),
            populate_owners: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub page_count: u32,
    pub total: u64,
}

impl Pagination {
    /// Pagination for a fully materialized list.
    #[must_use]
    pub fn compute(page: u32, page_size: u32, total: u64) -> Self {
        let size = u64::from(page_size.max(1));
        let page_count = u32::try_from(total.div_ceil(size).max(1)).unwrap_or(u32::MAX);
        Self {
            page,
            page_size,
            page_count,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExamPage {
    pub exams: Vec<Exam>,
    pub pagination: Pagination,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Repository contract for exams and their relations.
#[async_trait]
pub trait ExamRepository: Send + Sync {
    /// List a page of exams.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidKey` when a filter or populate names an
    /// unknown relation, or other storage errors.
    async fn list_exams(&self, query: &ExamQuery) -> Result<ExamPage, StorageError>;

    /// Fetch one exam by document id, with its session relation populated.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_exam(&self, id: &DocumentId) -> Result<Exam, StorageError>;

    /// Document ids currently linked through `relation`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the exam cannot be read.
    async fn linked_ids(
        &self,
        exam: &DocumentId,
        relation: &RelationField,
    ) -> Result<Vec<DocumentId>, StorageError>;

    /// Persist a new exam.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store refuses the exam.
    async fn create_exam(&self, exam: &NewExam) -> Result<Exam, StorageError>;

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn update_exam(&self, id: &DocumentId, changes: &ExamChanges)
    -> Result<Exam, StorageError>;

    /// Delete an exam. Linked sessions are not touched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn delete_exam(&self, id: &DocumentId) -> Result<(), StorageError>;

    /// Mutate a relation of an exam.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidKey` or `StorageError::Rejected` when the
    /// store refuses the relation name or the operation shape.
    async fn update_relation(
        &self,
        exam: &DocumentId,
        relation: &RelationField,
        op: &RelationOp,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a new study session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the session cannot be stored.
    async fn create_session(&self, session: &NewSession) -> Result<StudySession, StorageError>;

    /// Delete a session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn delete_session(&self, id: &DocumentId) -> Result<(), StorageError>;
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub exams: Arc<dyn ExamRepository>,
    pub sessions: Arc<dyn SessionRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repo(InMemoryRepository::new())
    }

    /// Use one value for both repositories.
    #[must_use]
    pub fn from_repo<R>(repo: R) -> Self
    where
        R: ExamRepository + SessionRepository + Clone + 'static,
    {
        let exams: Arc<dyn ExamRepository> = Arc::new(repo.clone());
        let sessions: Arc<dyn SessionRepository> = Arc::new(repo);
        Self { exams, sessions }
    }
}
