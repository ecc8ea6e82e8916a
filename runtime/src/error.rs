use coursegate_core::error::codes;
use coursegate_core::{CourseError, InvalidOperation};

/// Failure of a single call to a remote collaborator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("course not complete: {0}")]
    NotComplete(String),
    #[error("assessment not passed")]
    AssessmentNotPassed,
    #[error("assessment already passed")]
    AlreadyPassed,
    #[error("rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    /// Map a structured error code from a backend error body.
    pub fn from_code(status: u16, code: &str, message: String) -> Self {
        match code {
            codes::UNAUTHORIZED => BackendError::Unauthorized(message),
            codes::NOT_COMPLETE => BackendError::NotComplete(message),
            codes::ASSESSMENT_NOT_PASSED => BackendError::AssessmentNotPassed,
            codes::ALREADY_PASSED => BackendError::AlreadyPassed,
            _ => BackendError::Rejected { status, message },
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Network(err.to_string())
        }
    }
}

impl From<BackendError> for CourseError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Network(msg) => CourseError::NetworkFailure(msg),
            BackendError::Timeout => CourseError::NetworkFailure("request timed out".to_string()),
            BackendError::Decode(msg) => CourseError::NetworkFailure(format!("bad response: {msg}")),
            BackendError::Unauthorized(msg) => CourseError::Unauthorized(msg),
            BackendError::NotComplete(msg) => CourseError::NotComplete(msg),
            BackendError::AssessmentNotPassed => CourseError::AssessmentNotPassed,
            BackendError::AlreadyPassed => CourseError::AlreadyPassed,
            BackendError::Rejected { status, message } => {
                CourseError::InvalidOperation(InvalidOperation::Rejected(format!("{status}: {message}")))
            }
            BackendError::InvalidUrl(msg) => {
                CourseError::InvalidOperation(InvalidOperation::Rejected(format!("invalid URL: {msg}")))
            }
        }
    }
}
