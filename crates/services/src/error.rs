//! Shared error types for the services crate.

use thiserror::Error;

use revise_core::model::{DocumentId, ExamError};
use storage::repository::StorageError;

use crate::board::Notice;

/// Errors emitted by `PlanService`.
///
/// Plan synchronization is a sequence of independent store writes. Variants
/// carry what had already been written when the sequence stopped; nothing is
/// rolled back.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlanError {
    #[error("created {} of {planned} revision sessions: {source}", .created.len())]
    PartialCreate {
        planned: usize,
        created: Vec<DocumentId>,
        source: StorageError,
    },

    #[error("created {} revision sessions but could not link them: {source}", .created.len())]
    LinkFailed {
        created: Vec<DocumentId>,
        source: StorageError,
    },

    #[error("could not unlink revision sessions: {source}")]
    UnlinkFailed { source: StorageError },

    #[error("deleted {deleted} of {planned} revision sessions: {source}")]
    PartialDelete {
        planned: usize,
        deleted: usize,
        source: StorageError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PlanError {
    /// The store error behind this failure.
    #[must_use]
    pub fn storage(&self) -> &StorageError {
        match self {
            PlanError::PartialCreate { source, .. }
            | PlanError::LinkFailed { source, .. }
            | PlanError::UnlinkFailed { source }
            | PlanError::PartialDelete { source, .. }
            | PlanError::Storage(source) => source,
        }
    }

    /// Message for end users, preferring the store's own wording.
    #[must_use]
    pub fn user_message(&self) -> String {
        let detail = self.storage().user_message();
        match self {
            PlanError::PartialCreate {
                planned, created, ..
            } => format!(
                "Only {} of {planned} revision sessions were created: {detail}",
                created.len()
            ),
            PlanError::LinkFailed { .. } => {
                format!("Revision sessions were created but not attached to the exam: {detail}")
            }
            PlanError::UnlinkFailed { .. } => {
                format!("Revision sessions could not be detached from the exam: {detail}")
            }
            PlanError::PartialDelete {
                planned, deleted, ..
            } => format!("Only {deleted} of {planned} revision sessions were deleted: {detail}"),
            PlanError::Storage(_) => detail,
        }
    }
}

/// Errors emitted by `ExamService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamServiceError {
    #[error("no changes to apply")]
    NoChanges,
    #[error(transparent)]
    Exam(#[from] ExamError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ExamServiceError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            ExamServiceError::Storage(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

/// Errors emitted by `ExamBoard`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BoardError {
    #[error("board has not been loaded for a user yet")]
    NotLoaded,
    #[error("exam {0} is not on the board")]
    UnknownExam(DocumentId),
    /// The action went through but the board could not be read back.
    #[error("{}, but the board could not be reloaded: {source}", .notice.message)]
    ReloadFailed { notice: Notice, source: StorageError },
    #[error(transparent)]
    Exam(#[from] ExamServiceError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl BoardError {
    /// Outcome of the action that preceded a failed reload.
    #[must_use]
    pub fn notice(&self) -> Option<&Notice> {
        match self {
            BoardError::ReloadFailed { notice, .. } => Some(notice),
            _ => None,
        }
    }
}
