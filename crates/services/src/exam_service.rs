use std::sync::Arc;

use revise_core::model::{DocumentId, Exam, ExamChanges, ExamDraft};
use storage::repository::{ExamPage, ExamQuery, ExamRepository, SortOrder};

use crate::error::ExamServiceError;

/// CRUD over exams.
#[derive(Clone)]
pub struct ExamService {
    exams: Arc<dyn ExamRepository>,
}

impl ExamService {
    #[must_use]
    pub fn new(exams: Arc<dyn ExamRepository>) -> Self {
        Self { exams }
    }

    /// One page of exams, soonest first, with their sessions.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Storage` if the store cannot be read.
    pub async fn list_page(&self, page: u32, page_size: u32) -> Result<ExamPage, ExamServiceError> {
        let query = ExamQuery {
            page: page.max(1),
            page_size: page_size.max(1),
            date_order: SortOrder::Asc,
            populate_sessions: true,
            ..ExamQuery::default()
        };
        Ok(self.exams.list_exams(&query).await?)
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::Storage` (`NotFound` included).
    pub async fn get(&self, id: &DocumentId) -> Result<Exam, ExamServiceError> {
        Ok(self.exams.get_exam(id).await?)
    }

    /// Validate and store a new exam under a fresh reference.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Exam` for invalid drafts.
    /// Returns `ExamServiceError::Storage` if the store refuses the exam.
    pub async fn create(&self, draft: ExamDraft) -> Result<Exam, ExamServiceError> {
        let exam = draft.validate()?;
        Ok(self.exams.create_exam(&exam).await?)
    }

    /// # Errors
    ///
    /// Returns `ExamServiceError::NoChanges` when `changes` is empty,
    /// `ExamServiceError::Exam` for invalid values, or storage errors.
    pub async fn update(
        &self,
        id: &DocumentId,
        changes: ExamChanges,
    ) -> Result<Exam, ExamServiceError> {
        if changes.is_empty() {
            return Err(ExamServiceError::NoChanges);
        }
        let changes = changes.validate()?;
        Ok(self.exams.update_exam(id, &changes).await?)
    }

    /// Delete the exam record only; its sessions are left alone.
    ///
    /// # Errors
    ///
    /// Returns `ExamServiceError::Storage` if the deletion fails.
    pub async fn delete(&self, id: &DocumentId) -> Result<(), ExamServiceError> {
        self.exams.delete_exam(id).await?;
        tracing::info!(exam = %id, "exam deleted");
        Ok(())
    }
}
