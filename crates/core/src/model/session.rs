use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{DocumentId, SessionId, SessionTag};
use crate::planner::StudyWindow;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("session end must be after its start")]
    InvalidTimeRange,

    #[error("progress must be between 0 and 100, got {provided}")]
    InvalidProgress { provided: u8 },
}

/// Percentage of a session the student has completed.
pub const MAX_PROGRESS: u8 = 100;

/// A generated, time-boxed revision slot persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudySession {
    id: SessionId,
    document_id: DocumentId,
    tag: SessionTag,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    progress: u8,
    comment: Option<String>,
}

impl StudySession {
    /// Rehydrate a session from persisted storage.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTimeRange` if `end <= start`.
    /// Returns `SessionError::InvalidProgress` if progress exceeds 100.
    pub fn from_persisted(
        id: SessionId,
        document_id: DocumentId,
        tag: SessionTag,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        progress: u8,
        comment: Option<String>,
    ) -> Result<Self, SessionError> {
        if end <= start {
            return Err(SessionError::InvalidTimeRange);
        }
        if progress > MAX_PROGRESS {
            return Err(SessionError::InvalidProgress { provided: progress });
        }
        Ok(Self {
            id,
            document_id,
            tag,
            start,
            end,
            progress,
            comment,
        })
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    #[must_use]
    pub fn tag(&self) -> SessionTag {
        self.tag
    }

    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Summary of this session as it appears inside a populated exam relation.
    #[must_use]
    pub fn link(&self) -> SessionLink {
        SessionLink {
            id: Some(self.id),
            document_id: self.document_id.clone(),
            start: Some(self.start),
            end: Some(self.end),
        }
    }
}

/// Session summary carried by a populated exam → session relation.
///
/// Stores may populate only the document id, so the window is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLink {
    pub id: Option<SessionId>,
    pub document_id: DocumentId,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl SessionLink {
    #[must_use]
    pub fn bare(document_id: DocumentId) -> Self {
        Self {
            id: None,
            document_id,
            start: None,
            end: None,
        }
    }
}

/// A session about to be created for a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub tag: SessionTag,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub progress: u8,
    pub comment: String,
}

impl NewSession {
    /// Build a fresh, zero-progress session covering `window`.
    #[must_use]
    pub fn for_window(tag: SessionTag, window: &StudyWindow, comment: impl Into<String>) -> Self {
        Self {
            tag,
            start: window.start,
            end: window.end,
            progress: 0,
            comment: comment.into(),
        }
    }
}
