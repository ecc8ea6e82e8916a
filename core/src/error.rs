use serde::{Deserialize, Serialize};

use crate::completion::CompletionKey;
use crate::ids::QuestionId;

/// Failure surfaced to the view layer by any session operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CourseError {
    /// Transport failure or timeout. Recoverable: state was rolled back or a
    /// fallback was used, and the operation may be retried.
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// The session token was rejected. Never retried internally.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid operation: {0}")]
    InvalidOperation(InvalidOperation),
    /// The learner already holds a passed attempt for this course.
    #[error("assessment already passed")]
    AlreadyPassed,
    #[error("course not complete: {0}")]
    NotComplete(String),
    #[error("assessment not passed")]
    AssessmentNotPassed,
    /// The session was torn down while the operation was in flight.
    #[error("session closed")]
    SessionClosed,
}

/// Caller errors. These are detected before any network call is made.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidOperation {
    #[error("item {0} is supplementary and cannot be completed")]
    ExtraItem(CompletionKey),
    #[error("item {0} does not exist in this course")]
    UnknownItem(CompletionKey),
    #[error("a toggle for {0} is already in flight")]
    ToggleInFlight(CompletionKey),
    #[error("progress is shown from backend totals only; reload before marking items")]
    DegradedProgress,
    #[error("{} question(s) unanswered", question_ids.len())]
    Unanswered { question_ids: Vec<QuestionId> },
    #[error("unknown question {0}")]
    UnknownQuestion(QuestionId),
    #[error("unknown answer {answer} for question {question}")]
    UnknownAnswer { question: QuestionId, answer: String },
    #[error("review rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
    #[error("this course has no assessment")]
    NoAssessment,
    #[error("attempt {0} is no longer the next attempt")]
    StaleAttempt(u32),
    #[error("attempt {0} was sealed but its submission is unconfirmed; retry it")]
    SubmissionPending(u32),
    #[error("no submission is awaiting a retry")]
    NothingToRetry,
    #[error("session has not been loaded")]
    NotLoaded,
    #[error("rejected by backend: {0}")]
    Rejected(String),
}

impl From<InvalidOperation> for CourseError {
    fn from(err: InvalidOperation) -> Self {
        CourseError::InvalidOperation(err)
    }
}

impl CourseError {
    /// Machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            CourseError::NetworkFailure(_) => codes::NETWORK_FAILURE,
            CourseError::Unauthorized(_) => codes::UNAUTHORIZED,
            CourseError::InvalidOperation(_) => codes::INVALID_OPERATION,
            CourseError::AlreadyPassed => codes::ALREADY_PASSED,
            CourseError::NotComplete(_) => codes::NOT_COMPLETE,
            CourseError::AssessmentNotPassed => codes::ASSESSMENT_NOT_PASSED,
            CourseError::SessionClosed => codes::SESSION_CLOSED,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CourseError::NetworkFailure(_))
    }

    pub fn to_api_error(&self) -> ApiError {
        let unanswered = match self {
            CourseError::InvalidOperation(InvalidOperation::Unanswered { question_ids }) => {
                serde_json::to_value(question_ids).ok()
            }
            _ => None,
        };
        ApiError {
            error: self.code().to_string(),
            message: self.to_string(),
            field: unanswered.as_ref().map(|_| "answers".to_string()),
            received: unanswered,
            docs_hint: None,
        }
    }
}

/// Structured error body, shared by the backend's responses and the CLI output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "not_complete", "unauthorized")
    pub error: String,
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the client and the backend contract
pub mod codes {
    pub const NETWORK_FAILURE: &str = "network_failure";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const INVALID_OPERATION: &str = "invalid_operation";
    pub const ALREADY_PASSED: &str = "already_passed";
    pub const NOT_COMPLETE: &str = "not_complete";
    pub const ASSESSMENT_NOT_PASSED: &str = "assessment_not_passed";
    pub const SESSION_CLOSED: &str = "session_closed";
}
