use thiserror::Error;

use crate::model::{ExamError, ParseIdError, SessionError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Exam(#[from] ExamError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Id(#[from] ParseIdError),
}
