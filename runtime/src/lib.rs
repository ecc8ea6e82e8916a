//! Async course session engine.
//!
//! A [`CourseSession`] binds one learner and one course to a backend and a
//! local cache. It reconciles completion state on load, applies optimistic
//! completion toggles, derives the unlock gate, and runs the assessment and
//! certificate flows.

pub mod cache;
mod certificate;
pub mod config;
pub mod error;
pub mod exam;
pub mod http;
pub mod ports;
mod progress;
pub mod session;
pub mod telemetry;
mod util;

#[cfg(test)]
mod fakes;

pub use cache::{CachedProgress, FileCache, LocalCache, MemoryCache};
pub use config::RuntimeConfig;
pub use error::BackendError;
pub use exam::SubmissionOutcome;
pub use http::HttpBackend;
pub use ports::{LearningBackend, ReviewPrompt, ReviewSubmission};
pub use session::{CourseSession, LoadReport};
