#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod planner;
pub mod time;

pub use error::Error;
pub use planner::{PlanShape, PlanZone, StudyWindow, generate_plan, plan_shape};
pub use time::Clock;
