//! Pure course-progress domain: catalog model, completion sets, discrepancy
//! resolution, the unlock gate and assessment grading. No I/O lives here.

pub mod assessment;
pub mod catalog;
pub mod completion;
pub mod error;
pub mod gate;
pub mod ids;
pub mod reconcile;
pub mod toggle;

pub use error::{CourseError, InvalidOperation};
pub use ids::{AnswerId, CertificateId, ContentId, CourseId, LearnerCourse, ModuleId, QuestionId, UserId};
