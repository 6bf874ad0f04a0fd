#![forbid(unsafe_code)]

pub mod board;
pub mod error;
pub mod exam_service;
pub mod plan_service;
pub mod relation;

pub use revise_core::Clock;

pub use board::{CalendarEntry, EntryKind, ExamBoard, Notice, OwnerScope, PlanAction, Severity};
pub use error::{BoardError, ExamServiceError, PlanError};
pub use exam_service::ExamService;
pub use plan_service::{PlanOutcome, PlanService};
pub use relation::{LinkStrategy, RelationResolver, Resolution, UnlinkStrategy};
