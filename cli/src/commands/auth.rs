use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde_json::json;

use coursegate_runtime::config::{
    API_KEY_ENV, StoredCredentials, credentials_path, load_credentials, save_credentials,
};

use crate::util::{exit_error, print_json};

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store a bearer token issued by your identity provider
    StoreToken {
        /// Access token
        #[arg(long)]
        token: String,
        /// Token expiry (RFC3339)
        #[arg(long)]
        expires_at: String,
    },
    /// Show which credentials would be used
    Status,
}

pub fn run(api_url: &str, command: AuthCommands) -> i32 {
    match command {
        AuthCommands::StoreToken { token, expires_at } => store_token(api_url, token, &expires_at),
        AuthCommands::Status => status(),
    }
}

fn store_token(api_url: &str, access_token: String, expires_at: &str) -> i32 {
    let expires_at: DateTime<Utc> = match DateTime::parse_from_rfc3339(expires_at) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(e) => exit_error(
            &format!("Invalid --expires-at '{expires_at}': {e}"),
            Some("Use RFC3339, e.g. 2026-01-31T12:00:00Z"),
        ),
    };
    let creds = StoredCredentials {
        api_url: api_url.to_string(),
        access_token,
        expires_at,
    };
    if let Err(e) = save_credentials(&creds) {
        exit_error(&format!("Failed to store credentials: {e}"), None);
    }
    print_json(&json!({
        "status": "stored",
        "path": credentials_path(),
        "expires_at": creds.expires_at,
    }))
}

fn status() -> i32 {
    if std::env::var(API_KEY_ENV).is_ok() {
        return print_json(&json!({ "method": "api_key (env)", "variable": API_KEY_ENV }));
    }
    match load_credentials() {
        Some(creds) => print_json(&json!({
            "method": "stored_token",
            "api_url": creds.api_url,
            "expires_at": creds.expires_at,
            "expired": Utc::now() >= creds.expires_at,
        })),
        None => print_json(&json!({ "method": null })),
    }
}
