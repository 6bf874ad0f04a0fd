mod exam;
mod ids;
mod session;

pub use ids::{DocumentId, ExamId, ExamReference, ParseIdError, SessionId, SessionTag};

pub use exam::{Exam, ExamChanges, ExamDraft, ExamError, NewExam};
pub use session::{NewSession, SessionError, SessionLink, StudySession, MAX_PROGRESS};
