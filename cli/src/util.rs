use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use coursegate_core::{CourseError, LearnerCourse};
use coursegate_runtime::config::{default_cache_dir, resolve_token};
use coursegate_runtime::{CourseSession, FileCache, HttpBackend, ReviewPrompt, RuntimeConfig};

pub type CliSession = CourseSession<HttpBackend, FileCache>;

/// Connection settings shared by every session-backed command.
#[derive(Debug, Clone)]
pub struct SessionArgs {
    pub api_url: String,
    pub user_id: Option<String>,
    pub course_id: Option<String>,
    pub timeout_secs: u64,
    pub cache_dir: Option<PathBuf>,
}

impl SessionArgs {
    pub fn scope(&self) -> LearnerCourse {
        let user_id = self.user_id.clone().unwrap_or_else(|| {
            exit_error(
                "user_id is required",
                Some("Set --user-id or COURSEGATE_USER_ID env var"),
            )
        });
        let course_id = self.course_id.clone().unwrap_or_else(|| {
            exit_error(
                "course_id is required",
                Some("Set --course-id or COURSEGATE_COURSE_ID env var"),
            )
        });
        LearnerCourse::new(user_id, course_id)
    }

    pub fn cache(&self) -> FileCache {
        FileCache::new(self.cache_dir.clone().unwrap_or_else(default_cache_dir))
    }

    /// Build a session and run the initial load. On failure the error has
    /// already been printed and the exit code is returned.
    pub async fn open(&self) -> Result<CliSession, i32> {
        let scope = self.scope();
        let token = resolve_token().map_err(|e| print_course_error(&e.into()))?;
        let config = RuntimeConfig::new(&self.api_url)
            .with_token(token)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        let backend = HttpBackend::new(&config).map_err(|e| print_course_error(&e.into()))?;

        let session = CourseSession::new(scope, backend, self.cache())
            .with_review_prompt(Arc::new(ReviewHint));
        let report = session.load().await.map_err(|e| print_course_error(&e))?;
        tracing::debug!(source = ?report.source, verified = report.verified, failed = report.failed, "session loaded");
        Ok(session)
    }
}

/// Points the learner at the review commands once the course is finished.
struct ReviewHint;

impl ReviewPrompt for ReviewHint {
    fn open(&self, scope: &LearnerCourse) {
        tracing::info!(
            %scope,
            "course complete: run `coursegate review submit --rating <1-5>` or `coursegate review skip`"
        );
    }
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", to_pretty(&err));
    std::process::exit(4);
}

/// Print `value` to stdout and return exit code 0.
pub fn print_json<T: Serialize>(value: &T) -> i32 {
    println!("{}", to_pretty(value));
    0
}

/// Print a structured error to stderr.
///
/// Exit codes: 1=rejected (auth, gate order, already passed), 3=network
/// failure, 4=invalid operation
pub fn print_course_error(err: &CourseError) -> i32 {
    eprintln!("{}", to_pretty(&err.to_api_error()));
    match err {
        CourseError::NetworkFailure(_) => 3,
        CourseError::InvalidOperation(_) => 4,
        _ => 1,
    }
}

fn to_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!(r#"{{"error":"cli_error","message":"unserializable output: {e}"}}"#))
}

/// Read JSON from a file path or stdin (when path is "-").
pub fn read_json_from_file(path: &str) -> Result<serde_json::Value, String> {
    let raw = if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("Failed to read stdin: {e}"))?;
        buf
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in '{path}': {e}"))
}
