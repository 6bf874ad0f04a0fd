//! The exam board: a user's exams plus the plan actions offered on them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use revise_core::model::{DocumentId, Exam};
use serde::Serialize;
use storage::repository::{ExamQuery, ExamRepository, OwnerFilter, RelationField, SortOrder};

use crate::error::{BoardError, PlanError};
use crate::exam_service::ExamService;
use crate::plan_service::{PlanOutcome, PlanService};
use crate::relation::{RelationResolver, Resolution};

/// Exams fetched per request while loading the board.
pub const BOARD_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// A message for the user about the last board action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Delete,
}

impl Notice {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    /// Describe the result of a plan operation on `exam`.
    #[must_use]
    pub fn for_plan(
        exam: &Exam,
        action: PlanAction,
        result: Result<PlanOutcome, PlanError>,
    ) -> Self {
        let name = exam.name();
        match result {
            Ok(PlanOutcome::Created { sessions, .. }) => Self::new(
                Severity::Success,
                format!("Created {} revision sessions for {name}", sessions.len()),
            ),
            Ok(PlanOutcome::Deleted { sessions, .. }) => Self::new(
                Severity::Success,
                format!("Deleted {} revision sessions for {name}", sessions.len()),
            ),
            Ok(PlanOutcome::MissingPrerequisites) => Self::new(
                Severity::Info,
                format!("{name} needs a date and a weight before planning"),
            ),
            Ok(PlanOutcome::NothingToDelete) => Self::new(
                Severity::Info,
                format!("{name} has no revision sessions to delete"),
            ),
            Err(err) => {
                let verb = match action {
                    PlanAction::Create => "create",
                    PlanAction::Delete => "delete",
                };
                Self::new(
                    Severity::Error,
                    format!("Could not {verb} the revision plan: {}", err.user_message()),
                )
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Exam,
    Revision,
}

/// One calendar event derived from the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    pub kind: EntryKind,
    pub exam: DocumentId,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

/// How the last load restricted exams to their owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerScope {
    /// The store filtered on this relation.
    Server(RelationField),
    /// Exams were read with this relation populated and filtered locally.
    Client(RelationField),
    /// No owner relation could be read; the board is left empty.
    Unavailable,
}

/// In-memory view of one user's exams.
pub struct ExamBoard {
    exams: Arc<dyn ExamRepository>,
    exam_service: ExamService,
    plans: PlanService,
    resolver: RelationResolver,
    user_id: Option<u64>,
    owner: Option<Resolution>,
    scope: Option<OwnerScope>,
    items: Vec<Exam>,
}

impl ExamBoard {
    #[must_use]
    pub fn new(exams: Arc<dyn ExamRepository>, plans: PlanService, resolver: RelationResolver) -> Self {
        Self {
            exam_service: ExamService::new(Arc::clone(&exams)),
            exams,
            plans,
            resolver,
            user_id: None,
            owner: None,
            scope: None,
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn exams(&self) -> &[Exam] {
        &self.items
    }

    /// How the owner relation was resolved on the last load.
    #[must_use]
    pub fn owner_relation(&self) -> Option<&Resolution> {
        self.owner.as_ref()
    }

    #[must_use]
    pub fn owner_scope(&self) -> Option<&OwnerScope> {
        self.scope.as_ref()
    }

    #[must_use]
    pub fn plans(&self) -> &PlanService {
        &self.plans
    }

    /// Load every exam owned by `user_id`, replacing the current list.
    ///
    /// # Errors
    ///
    /// Returns `BoardError::Storage` if the exams cannot be read.
    pub async fn load(&mut self, user_id: u64) -> Result<&[Exam], BoardError> {
        let resolution = self.resolver.resolve_owner(self.exams.as_ref(), user_id).await;

        let (items, scope) = if resolution.confirmed {
            let filter = OwnerFilter {
                relation: resolution.field.clone(),
                user_id,
            };
            let items = self
                .fetch_all(|query| query.owner_filter = Some(filter.clone()))
                .await?;
            (items, OwnerScope::Server(resolution.field.clone()))
        } else {
            self.load_unconfirmed(user_id).await?
        };

        tracing::debug!(user_id, exams = items.len(), ?scope, "board loaded");
        self.user_id = Some(user_id);
        self.owner = Some(resolution);
        self.scope = Some(scope);
        self.items = items;
        Ok(&self.items)
    }

    /// Reload for the user of the last `load`.
    ///
    /// # Errors
    ///
    /// Returns `BoardError::NotLoaded` before the first `load`.
    pub async fn reload(&mut self) -> Result<&[Exam], BoardError> {
        let user_id = self.user_id.ok_or(BoardError::NotLoaded)?;
        self.load(user_id).await
    }

    /// Populate each owner candidate in turn and keep the user's exams. When
    /// no candidate can be populated the board stays empty.
    async fn load_unconfirmed(&self, user_id: u64) -> Result<(Vec<Exam>, OwnerScope), BoardError> {
        for field in self.resolver.candidates() {
            let owners = vec![field.clone()];
            match self
                .fetch_all(|query| query.populate_owners = owners.clone())
                .await
            {
                Ok(all) => {
                    let mine = all.into_iter().filter(|e| e.belongs_to(user_id)).collect();
                    return Ok((mine, OwnerScope::Client(field.clone())));
                }
                Err(BoardError::Storage(err)) if err.is_invalid_key() => {
                    tracing::debug!(relation = %field, "owner relation cannot be populated, trying next");
                }
                Err(err) => return Err(err),
            }
        }
        tracing::warn!(user_id, "no owner relation can be read, board left empty");
        Ok((Vec::new(), OwnerScope::Unavailable))
    }

    async fn fetch_all(
        &self,
        scope: impl Fn(&mut ExamQuery),
    ) -> Result<Vec<Exam>, BoardError> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let mut query = ExamQuery {
                page,
                page_size: BOARD_PAGE_SIZE,
                date_order: SortOrder::Asc,
                ..ExamQuery::default()
            };
            scope(&mut query);
            let result = self.exams.list_exams(&query).await?;
            let done = result.exams.is_empty() || page >= result.pagination.page_count;
            items.extend(result.exams);
            if done {
                return Ok(items);
            }
            page += 1;
        }
    }

    fn find(&self, id: &DocumentId) -> Result<&Exam, BoardError> {
        self.items
            .iter()
            .find(|exam| exam.document_id() == id)
            .ok_or_else(|| BoardError::UnknownExam(id.clone()))
    }

    /// Reload after an action. The action's notice survives a failed reload.
    async fn finish(&mut self, notice: Notice) -> Result<Notice, BoardError> {
        match self.reload().await {
            Ok(_) => Ok(notice),
            Err(BoardError::Storage(source)) => {
                tracing::error!(notice = %notice.message, error = %source, "board reload failed after action");
                Err(BoardError::ReloadFailed { notice, source })
            }
            Err(err) => Err(err),
        }
    }

    /// Create the revision plan of an exam, then reload.
    ///
    /// # Errors
    ///
    /// Returns `BoardError::UnknownExam` when the exam is not on the board and
    /// `BoardError::ReloadFailed`, carrying the action's notice, when the
    /// reload fails. Plan failures are reported through the returned `Notice`.
    pub async fn generate_plan(&mut self, id: &DocumentId) -> Result<Notice, BoardError> {
        let exam = self.find(id)?.clone();
        let notice = Notice::for_plan(&exam, PlanAction::Create, self.plans.create_plan(&exam).await);
        self.finish(notice).await
    }

    /// Delete the revision plan of an exam, then reload.
    ///
    /// # Errors
    ///
    /// Same contract as [`ExamBoard::generate_plan`].
    pub async fn delete_plan(&mut self, id: &DocumentId) -> Result<Notice, BoardError> {
        let exam = self.find(id)?.clone();
        let notice = Notice::for_plan(&exam, PlanAction::Delete, self.plans.delete_plan(&exam).await);
        self.finish(notice).await
    }

    /// Delete an exam after its revision plan, then reload. The exam is kept
    /// when its plan cannot be removed.
    ///
    /// # Errors
    ///
    /// Same contract as [`ExamBoard::generate_plan`].
    pub async fn delete_exam(&mut self, id: &DocumentId) -> Result<Notice, BoardError> {
        let exam = self.find(id)?.clone();
        let plan = self.plans.delete_plan(&exam).await;
        let notice = if plan.is_err() {
            Notice::for_plan(&exam, PlanAction::Delete, plan)
        } else {
            match self.exam_service.delete(id).await {
                Ok(()) => Notice::new(Severity::Success, format!("Deleted exam {}", exam.name())),
                Err(err) => Notice::new(
                    Severity::Error,
                    format!("Could not delete {}: {}", exam.name(), err.user_message()),
                ),
            }
        };
        self.finish(notice).await
    }

    /// Exams and their revision sessions as calendar events, in board order.
    /// Undated exams and sessions without times are skipped.
    #[must_use]
    pub fn calendar(&self) -> Vec<CalendarEntry> {
        let mut entries = Vec::new();
        for exam in &self.items {
            if let Some(at) = exam.scheduled_at() {
                entries.push(CalendarEntry {
                    kind: EntryKind::Exam,
                    exam: exam.document_id().clone(),
                    title: exam.name().to_owned(),
                    start: at,
                    end: None,
                });
            }
            for link in exam.sessions() {
                let Some(start) = link.start else {
                    continue;
                };
                entries.push(CalendarEntry {
                    kind: EntryKind::Revision,
                    exam: exam.document_id().clone(),
                    title: format!("Revision: {}", exam.name()),
                    start,
                    end: link.end,
                });
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use revise_core::model::ExamDraft;
    use revise_core::planner::PlanZone;
    use revise_core::time::{fixed_clock, fixed_now};
    use storage::memory::{InMemoryRepository, MemoryBehavior};

    fn board(repo: &InMemoryRepository) -> ExamBoard {
        let plans = PlanService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(repo.clone()))
            .with_zone(PlanZone::utc());
        ExamBoard::new(Arc::new(repo.clone()), plans, RelationResolver::default())
    }

    async fn add(repo: &InMemoryRepository, name: &str, owner: u64) -> Exam {
        let exam = repo
            .create_exam(
                &ExamDraft {
                    code: name.to_uppercase(),
                    name: name.into(),
                    scheduled_at: Some(fixed_now() + Duration::days(10)),
                    weight: Some(20.0),
                }
                .validate()
                .unwrap(),
            )
            .await
            .unwrap();
        repo.assign_owner(exam.document_id(), owner).unwrap();
        exam
    }

    #[tokio::test]
    async fn load_filters_by_owner_on_the_server() {
        let repo = InMemoryRepository::new();
        add(&repo, "mine", 7).await;
        add(&repo, "theirs", 8).await;

        let mut board = board(&repo);
        let names: Vec<_> = board.load(7).await.unwrap().iter().map(Exam::name).collect();
        assert_eq!(names, vec!["mine"]);
        assert!(board.owner_relation().unwrap().confirmed);
    }

    #[tokio::test]
    async fn unknown_relation_key_is_skipped_during_load() {
        let repo = InMemoryRepository::with_behavior(MemoryBehavior {
            owner_relation: "students".into(),
            ..MemoryBehavior::default()
        });
        add(&repo, "mine", 7).await;

        let mut board = board(&repo);
        board.load(7).await.unwrap();
        let resolution = board.owner_relation().unwrap();
        assert_eq!(resolution.field.as_str(), "students");
        assert!(resolution.confirmed);
        assert_eq!(board.exams().len(), 1);
    }

    fn board_with_candidates(repo: &InMemoryRepository, candidates: &[&str]) -> ExamBoard {
        let plans = PlanService::new(fixed_clock(), Arc::new(repo.clone()), Arc::new(repo.clone()))
            .with_zone(PlanZone::utc());
        let resolver = RelationResolver::new(candidates.iter().map(|name| RelationField::new(*name)));
        ExamBoard::new(Arc::new(repo.clone()), plans, resolver)
    }

    #[tokio::test]
    async fn refused_owner_filter_falls_back_to_local_filtering() {
        let repo = InMemoryRepository::with_behavior(MemoryBehavior {
            forbid_owner_filter: true,
            ..MemoryBehavior::default()
        });
        add(&repo, "mine", 7).await;
        add(&repo, "theirs", 8).await;

        let mut board = board(&repo);
        let names: Vec<_> = board.load(7).await.unwrap().iter().map(Exam::name).collect();
        assert_eq!(names, vec!["mine"]);
        assert!(!board.owner_relation().unwrap().confirmed);
        assert_eq!(
            board.owner_scope(),
            Some(&OwnerScope::Client(RelationField::new("eleves")))
        );
    }

    #[tokio::test]
    async fn local_filtering_tries_every_candidate() {
        let repo = InMemoryRepository::with_behavior(MemoryBehavior {
            owner_relation: "eleve".into(),
            forbid_owner_filter: true,
            ..MemoryBehavior::default()
        });
        add(&repo, "mine", 7).await;
        add(&repo, "theirs", 8).await;

        let mut board = board(&repo);
        let names: Vec<_> = board.load(7).await.unwrap().iter().map(Exam::name).collect();
        assert_eq!(names, vec!["mine"]);
        assert_eq!(
            board.owner_scope(),
            Some(&OwnerScope::Client(RelationField::new("eleve")))
        );
    }

    #[tokio::test]
    async fn unreadable_owner_relation_never_shows_other_users_exams() {
        let repo = InMemoryRepository::with_behavior(MemoryBehavior {
            owner_relation: "eleve".into(),
            ..MemoryBehavior::default()
        });
        add(&repo, "someone-elses", 99).await;

        let mut board = board_with_candidates(&repo, &["eleves", "students"]);
        assert!(board.load(7).await.unwrap().is_empty());
        assert_eq!(board.owner_scope(), Some(&OwnerScope::Unavailable));
    }

    #[tokio::test]
    async fn failed_reload_keeps_the_action_notice() {
        let repo = InMemoryRepository::new();
        let exam = add(&repo, "bio", 7).await;
        let mut board = board(&repo);
        board.load(7).await.unwrap();
        repo.set_behavior(MemoryBehavior {
            listing_unavailable: true,
            ..MemoryBehavior::default()
        })
        .unwrap();

        let err = board.generate_plan(exam.document_id()).await.unwrap_err();
        let notice = err.notice().expect("notice of the completed action");
        assert_eq!(notice.severity, Severity::Success);
        assert_eq!(notice.message, "Created 2 revision sessions for bio");
        assert!(matches!(err, BoardError::ReloadFailed { .. }));
        assert_eq!(repo.session_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn generate_plan_reloads_and_shows_sessions_in_calendar() {
        let repo = InMemoryRepository::new();
        let exam = add(&repo, "bio", 7).await;
        let mut board = board(&repo);
        board.load(7).await.unwrap();

        let notice = board.generate_plan(exam.document_id()).await.unwrap();
        assert_eq!(notice.severity, Severity::Success);
        assert_eq!(notice.message, "Created 2 revision sessions for bio");
        assert_eq!(board.exams()[0].sessions().len(), 2);

        let calendar = board.calendar();
        assert_eq!(calendar.len(), 3);
        assert_eq!(calendar[0].kind, EntryKind::Exam);
        assert!(
            calendar[1..]
                .iter()
                .all(|entry| entry.kind == EntryKind::Revision && entry.end.is_some())
        );
    }

    #[tokio::test]
    async fn delete_exam_removes_plan_first() {
        let repo = InMemoryRepository::new();
        let exam = add(&repo, "bio", 7).await;
        let mut board = board(&repo);
        board.load(7).await.unwrap();
        board.generate_plan(exam.document_id()).await.unwrap();

        let notice = board.delete_exam(exam.document_id()).await.unwrap();
        assert_eq!(notice.message, "Deleted exam bio");
        assert!(board.exams().is_empty());
        assert_eq!(repo.session_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn plan_failures_become_error_notices() {
        let repo = InMemoryRepository::with_behavior(MemoryBehavior {
            fail_session_create_after: Some(0),
            ..MemoryBehavior::default()
        });
        let exam = add(&repo, "bio", 7).await;
        let mut board = board(&repo);
        board.load(7).await.unwrap();

        let notice = board.generate_plan(exam.document_id()).await.unwrap();
        assert_eq!(notice.severity, Severity::Error);
        assert_eq!(
            notice.message,
            "Could not create the revision plan: Only 0 of 2 revision sessions were created: Internal Server Error"
        );
    }

    #[tokio::test]
    async fn actions_require_a_loaded_exam() {
        let repo = InMemoryRepository::new();
        let mut board = board(&repo);
        let err = board.delete_plan(&DocumentId::new("nope")).await.unwrap_err();
        assert!(matches!(err, BoardError::UnknownExam(_)));
        assert!(matches!(board.reload().await, Err(BoardError::NotLoaded)));
    }
}
