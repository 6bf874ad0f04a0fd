use std::sync::Arc;

use revise_core::model::{DocumentId, Exam, NewSession, SessionTag, StudySession};
use revise_core::planner::{PlanZone, StudyWindow, generate_plan};
use storage::repository::{ExamRepository, RelationField, SessionRepository};

use crate::Clock;
use crate::error::PlanError;
use crate::relation::{self, LinkStrategy, UnlinkStrategy};

/// Default name of the exam → sessions relation.
pub const SESSION_RELATION: &str = "sessions";

/// Result of a plan operation that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    /// The exam lacks a date or a positive weight; nothing was written.
    MissingPrerequisites,
    Created {
        sessions: Vec<StudySession>,
        link: LinkStrategy,
    },
    /// The exam has no linked sessions.
    NothingToDelete,
    Deleted {
        sessions: Vec<DocumentId>,
        unlink: UnlinkStrategy,
    },
}

/// Creates and removes the revision sessions of an exam.
#[derive(Clone)]
pub struct PlanService {
    clock: Clock,
    zone: PlanZone,
    exams: Arc<dyn ExamRepository>,
    sessions: Arc<dyn SessionRepository>,
    relation: RelationField,
}

impl PlanService {
    #[must_use]
    pub fn new(
        clock: Clock,
        exams: Arc<dyn ExamRepository>,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            clock,
            zone: PlanZone::default(),
            exams,
            sessions,
            relation: RelationField::new(SESSION_RELATION),
        }
    }

    #[must_use]
    pub fn with_zone(mut self, zone: PlanZone) -> Self {
        self.zone = zone;
        self
    }

    #[must_use]
    pub fn with_session_relation(mut self, relation: RelationField) -> Self {
        self.relation = relation;
        self
    }

    #[must_use]
    pub fn zone(&self) -> PlanZone {
        self.zone
    }

    /// Windows that `create_plan` would write, without touching the store.
    #[must_use]
    pub fn preview(&self, exam: &Exam) -> Vec<StudyWindow> {
        generate_plan(exam.scheduled_at(), exam.weight(), self.zone)
    }

    /// Create one session per planned window, then link them to the exam.
    ///
    /// Sessions are created one at a time, in plan order.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::PartialCreate` if a session cannot be created and
    /// `PlanError::LinkFailed` if every link strategy fails. Sessions written
    /// before the failure stay in the store.
    pub async fn create_plan(&self, exam: &Exam) -> Result<PlanOutcome, PlanError> {
        let windows = self.preview(exam);
        if windows.is_empty() {
            tracing::debug!(exam = %exam.document_id(), "exam has no date or weight, skipping plan");
            return Ok(PlanOutcome::MissingPrerequisites);
        }

        let millis = self.clock.epoch_millis();
        let comment = format!("Auto-generated revision session for {}", exam.name());
        let mut created: Vec<StudySession> = Vec::with_capacity(windows.len());
        for (index, window) in windows.iter().enumerate() {
            let session = NewSession::for_window(SessionTag::derive(millis, index), window, &comment);
            match self.sessions.create_session(&session).await {
                Ok(stored) => created.push(stored),
                Err(source) => {
                    let err = PlanError::PartialCreate {
                        planned: windows.len(),
                        created: created.iter().map(|s| s.document_id().clone()).collect(),
                        source,
                    };
                    tracing::error!(exam = %exam.document_id(), error = %err, "plan creation failed");
                    return Err(err);
                }
            }
        }

        let ids: Vec<DocumentId> = created.iter().map(|s| s.document_id().clone()).collect();
        let link = relation::link(self.exams.as_ref(), exam.document_id(), &self.relation, &ids)
            .await
            .map_err(|source| {
                let err = PlanError::LinkFailed {
                    created: ids.clone(),
                    source,
                };
                tracing::error!(exam = %exam.document_id(), error = %err, "plan linking failed");
                err
            })?;

        tracing::info!(
            exam = %exam.document_id(),
            sessions = created.len(),
            ?link,
            "revision plan created"
        );
        Ok(PlanOutcome::Created {
            sessions: created,
            link,
        })
    }

    /// Unlink and delete every session of the exam's plan.
    ///
    /// Uses the session ids already on `exam` when present, otherwise reads
    /// them from the store.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::UnlinkFailed` if every unlink strategy fails and
    /// `PlanError::PartialDelete` if a session cannot be deleted. Sessions
    /// deleted before the failure stay deleted.
    pub async fn delete_plan(&self, exam: &Exam) -> Result<PlanOutcome, PlanError> {
        let mut ids = exam.session_document_ids();
        if ids.is_empty() {
            ids = self
                .exams
                .linked_ids(exam.document_id(), &self.relation)
                .await
                .inspect_err(|err| {
                    tracing::error!(exam = %exam.document_id(), error = %err, "could not read linked sessions");
                })?;
        }
        if ids.is_empty() {
            return Ok(PlanOutcome::NothingToDelete);
        }

        let unlink = relation::unlink(self.exams.as_ref(), exam.document_id(), &self.relation, &ids)
            .await
            .map_err(|source| {
                let err = PlanError::UnlinkFailed { source };
                tracing::error!(exam = %exam.document_id(), error = %err, "plan unlinking failed");
                err
            })?;

        for (deleted, id) in ids.iter().enumerate() {
            if let Err(source) = self.sessions.delete_session(id).await {
                let err = PlanError::PartialDelete {
                    planned: ids.len(),
                    deleted,
                    source,
                };
                tracing::error!(exam = %exam.document_id(), session = %id, error = %err, "plan deletion failed");
                return Err(err);
            }
        }

        tracing::info!(exam = %exam.document_id(), sessions = ids.len(), ?unlink, "revision plan deleted");
        Ok(PlanOutcome::Deleted {
            sessions: ids,
            unlink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use revise_core::model::ExamDraft;
    use revise_core::time::fixed_clock;
    use storage::memory::{InMemoryRepository, MemoryBehavior};

    fn service(repo: &InMemoryRepository) -> PlanService {
        PlanService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(repo.clone()))
            .with_zone(PlanZone::utc())
    }

    async fn exam(repo: &InMemoryRepository, weight: f64) -> Exam {
        let draft = ExamDraft {
            code: "MAT".into(),
            name: "Maths".into(),
            scheduled_at: Some(Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap()),
            weight: Some(weight),
        };
        repo.create_exam(&draft.validate().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn created_sessions_carry_tags_comment_and_zero_progress() {
        let repo = InMemoryRepository::new();
        let exam = exam(&repo, 25.0).await;

        let outcome = service(&repo).create_plan(&exam).await.unwrap();
        let PlanOutcome::Created { sessions, link } = outcome else {
            panic!("expected a created plan");
        };
        assert_eq!(link, LinkStrategy::Connect);
        assert_eq!(sessions.len(), 3);

        let millis = fixed_clock().epoch_millis();
        for (index, session) in sessions.iter().enumerate() {
            assert_eq!(session.tag(), SessionTag::derive(millis, index));
            assert_eq!(session.progress(), 0);
            assert_eq!(session.comment(), Some("Auto-generated revision session for Maths"));
        }
        assert_eq!(
            sessions[0].start(),
            Utc.with_ymd_and_hms(2024, 6, 6, 18, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn exam_without_weight_is_skipped_without_writes() {
        let repo = InMemoryRepository::new();
        let exam = exam(&repo, 25.0).await;
        let unweighted = Exam::from_persisted(
            exam.id(),
            exam.document_id().clone(),
            exam.code(),
            exam.reference(),
            exam.name(),
            exam.scheduled_at(),
            None,
        )
        .unwrap();

        let outcome = service(&repo).create_plan(&unweighted).await.unwrap();
        assert_eq!(outcome, PlanOutcome::MissingPrerequisites);
        assert_eq!(repo.session_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_refetches_ids_when_exam_snapshot_has_none() {
        let repo = InMemoryRepository::new();
        let exam = exam(&repo, 15.0).await;
        let service = service(&repo);
        service.create_plan(&exam).await.unwrap();

        // `exam` was read before the plan existed
        let outcome = service.delete_plan(&exam).await.unwrap();
        let PlanOutcome::Deleted { sessions, unlink } = outcome else {
            panic!("expected a deleted plan");
        };
        assert_eq!(sessions.len(), 2);
        assert_eq!(unlink, UnlinkStrategy::Disconnect);
        assert_eq!(repo.session_count().unwrap(), 0);
        assert!(
            repo.requests()
                .unwrap()
                .iter()
                .any(|r| r.starts_with("linked_ids"))
        );
    }

    #[tokio::test]
    async fn failing_creation_reports_sessions_already_written() {
        let repo = InMemoryRepository::with_behavior(MemoryBehavior {
            fail_session_create_after: Some(1),
            ..MemoryBehavior::default()
        });
        let exam = exam(&repo, 30.0).await;

        let err = service(&repo).create_plan(&exam).await.unwrap_err();
        match err {
            PlanError::PartialCreate {
                planned, created, ..
            } => {
                assert_eq!(planned, 3);
                assert_eq!(created.len(), 1);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(repo.session_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn disconnect_refusal_falls_back_to_clear() {
        let repo = InMemoryRepository::with_behavior(MemoryBehavior {
            reject_disconnect: true,
            ..MemoryBehavior::default()
        });
        let exam = exam(&repo, 10.0).await;
        let service = service(&repo);
        service.create_plan(&exam).await.unwrap();
        let exam = repo.get_exam(exam.document_id()).await.unwrap();

        let outcome = service.delete_plan(&exam).await.unwrap();
        assert!(matches!(
            outcome,
            PlanOutcome::Deleted {
                unlink: UnlinkStrategy::Clear,
                ..
            }
        ));
        let linked = repo
            .linked_ids(exam.document_id(), &RelationField::new("sessions"))
            .await
            .unwrap();
        assert!(linked.is_empty());
    }
}
