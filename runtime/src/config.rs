use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::util::write_private;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const API_KEY_ENV: &str = "COURSEGATE_API_KEY";

/// Connection and storage settings for a session.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    /// Upper bound for every backend call. A timeout is a network failure.
    pub request_timeout: Duration,
    pub cache_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            cache_dir: default_cache_dir(),
        }
    }
}

impl RuntimeConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coursegate")
}

/// A bearer token handed over by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub api_url: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

pub fn credentials_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coursegate");
    config_dir.join("credentials.json")
}

pub fn load_credentials() -> Option<StoredCredentials> {
    let data = std::fs::read_to_string(credentials_path()).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn save_credentials(creds: &StoredCredentials) -> Result<(), Box<dyn std::error::Error>> {
    let data = serde_json::to_string_pretty(creds)?;
    write_private(&credentials_path(), data.as_bytes())?;
    Ok(())
}

/// Resolve a bearer token (priority order):
/// 1. COURSEGATE_API_KEY env var
/// 2. stored credentials, if not expired
pub fn resolve_token() -> Result<String, BackendError> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        return Ok(key);
    }
    token_from(load_credentials(), Utc::now())
}

fn token_from(creds: Option<StoredCredentials>, now: DateTime<Utc>) -> Result<String, BackendError> {
    match creds {
        Some(creds) if now < creds.expires_at => Ok(creds.access_token),
        Some(creds) => Err(BackendError::Unauthorized(format!(
            "stored token expired at {}; obtain a new one from your identity provider",
            creds.expires_at
        ))),
        None => Err(BackendError::Unauthorized(format!(
            "no credentials found; set {API_KEY_ENV} or store a token"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(expires_at: DateTime<Utc>) -> StoredCredentials {
        StoredCredentials {
            api_url: DEFAULT_API_URL.to_string(),
            access_token: "tok".to_string(),
            expires_at,
        }
    }

    #[test]
    fn expired_or_missing_credentials_are_unauthorized() {
        let now = Utc::now();
        assert_eq!(
            token_from(Some(creds(now + chrono::Duration::minutes(5))), now),
            Ok("tok".to_string())
        );
        assert!(matches!(
            token_from(Some(creds(now - chrono::Duration::minutes(5))), now),
            Err(BackendError::Unauthorized(_))
        ));
        assert!(matches!(token_from(None, now), Err(BackendError::Unauthorized(_))));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = RuntimeConfig::new("https://learn.example")
            .with_token("t")
            .with_timeout(Duration::from_secs(2));
        assert_eq!(config.api_url, "https://learn.example");
        assert_eq!(config.api_token.as_deref(), Some("t"));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
    }
}
