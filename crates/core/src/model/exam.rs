use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{DocumentId, ExamId, ExamReference};
use crate::model::session::SessionLink;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ExamError {
    #[error("exam code cannot be empty")]
    EmptyCode,

    #[error("exam name cannot be empty")]
    EmptyName,

    #[error("exam date is required")]
    MissingDate,

    #[error("exam weight must be a finite number >= 0, got {provided}")]
    InvalidWeight { provided: f64 },
}

fn check_weight(weight: f64) -> Result<f64, ExamError> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(weight)
    } else {
        Err(ExamError::InvalidWeight { provided: weight })
    }
}

//
// ─── EXAM ──────────────────────────────────────────────────────────────────────
//

/// A scheduled assessment whose date and weight size its revision plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Exam {
    id: ExamId,
    document_id: DocumentId,
    code: String,
    reference: Option<ExamReference>,
    name: String,
    scheduled_at: Option<DateTime<Utc>>,
    weight: Option<f64>,
    sessions: Vec<SessionLink>,
    owner_user_ids: Vec<u64>,
}

impl Exam {
    /// Rehydrate an exam as returned by the store.
    ///
    /// Stored exams may predate validation, so a missing date or weight is
    /// accepted here. Only the weight sign is checked.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::InvalidWeight` for negative or non-finite weights.
    pub fn from_persisted(
        id: ExamId,
        document_id: DocumentId,
        code: impl Into<String>,
        reference: Option<ExamReference>,
        name: impl Into<String>,
        scheduled_at: Option<DateTime<Utc>>,
        weight: Option<f64>,
    ) -> Result<Self, ExamError> {
        let weight = weight.map(check_weight).transpose()?;
        Ok(Self {
            id,
            document_id,
            code: code.into(),
            reference,
            name: name.into(),
            scheduled_at,
            weight,
            sessions: Vec::new(),
            owner_user_ids: Vec::new(),
        })
    }

    /// Attach the populated session relation.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Vec<SessionLink>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Attach the user ids of owning students, when the owner relation was populated.
    #[must_use]
    pub fn with_owner_user_ids(mut self, owners: Vec<u64>) -> Self {
        self.owner_user_ids = owners;
        self
    }

    #[must_use]
    pub fn id(&self) -> ExamId {
        self.id
    }

    #[must_use]
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn reference(&self) -> Option<ExamReference> {
        self.reference
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    #[must_use]
    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    #[must_use]
    pub fn sessions(&self) -> &[SessionLink] {
        &self.sessions
    }

    /// Document ids of the sessions currently known to be linked.
    #[must_use]
    pub fn session_document_ids(&self) -> Vec<DocumentId> {
        self.sessions
            .iter()
            .map(|link| link.document_id.clone())
            .collect()
    }

    #[must_use]
    pub fn owner_user_ids(&self) -> &[u64] {
        &self.owner_user_ids
    }

    /// True when any owning student maps to `user_id`.
    #[must_use]
    pub fn belongs_to(&self, user_id: u64) -> bool {
        self.owner_user_ids.contains(&user_id)
    }
}

//
// ─── DRAFTS ────────────────────────────────────────────────────────────────────
//

/// User input for a new exam, prior to validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExamDraft {
    pub code: String,
    pub name: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub weight: Option<f64>,
}

/// A validated new exam, ready to be sent to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExam {
    pub reference: ExamReference,
    pub code: String,
    pub name: String,
    pub scheduled_at: DateTime<Utc>,
    pub weight: f64,
}

impl ExamDraft {
    /// Validate every field and stamp a fresh reference.
    ///
    /// # Errors
    ///
    /// Returns the first `ExamError` found, checking code, name, date then weight.
    pub fn validate(self) -> Result<NewExam, ExamError> {
        let code = self.code.trim().to_owned();
        if code.is_empty() {
            return Err(ExamError::EmptyCode);
        }
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(ExamError::EmptyName);
        }
        let scheduled_at = self.scheduled_at.ok_or(ExamError::MissingDate)?;
        let weight = check_weight(self.weight.unwrap_or(f64::NAN))?;

        Ok(NewExam {
            reference: ExamReference::generate(),
            code,
            name,
            scheduled_at,
            weight,
        })
    }
}

/// Partial update of an exam. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExamChanges {
    pub code: Option<String>,
    pub name: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub weight: Option<f64>,
}

impl ExamChanges {
    /// Check the fields that are present.
    ///
    /// # Errors
    ///
    /// Returns `ExamError` if a provided code or name is blank or the weight is invalid.
    pub fn validate(self) -> Result<Self, ExamError> {
        let code = match self.code {
            Some(code) if code.trim().is_empty() => return Err(ExamError::EmptyCode),
            other => other.map(|c| c.trim().to_owned()),
        };
        let name = match self.name {
            Some(name) if name.trim().is_empty() => return Err(ExamError::EmptyName),
            other => other.map(|n| n.trim().to_owned()),
        };
        let weight = self.weight.map(check_weight).transpose()?;
        Ok(Self {
            code,
            name,
            scheduled_at: self.scheduled_at,
            weight,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_none()
            && self.name.is_none()
            && self.scheduled_at.is_none()
            && self.weight.is_none()
    }
}
