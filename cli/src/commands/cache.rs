use clap::Subcommand;
use serde_json::json;

use coursegate_runtime::LocalCache;

use crate::util::{SessionArgs, exit_error, print_json};

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show the cached progress for the learner and course
    Show,
    /// Delete the cached progress for the learner and course
    Clear,
}

pub fn run(args: &SessionArgs, command: CacheCommands) -> i32 {
    let scope = args.scope();
    let cache = args.cache();
    match command {
        CacheCommands::Show => print_json(&json!({
            "dir": cache.dir(),
            "entry": cache.load(&scope),
        })),
        CacheCommands::Clear => match cache.clear(&scope) {
            Ok(()) => print_json(&json!({ "status": "cleared", "scope": scope.to_string() })),
            Err(e) => exit_error(&format!("Failed to clear cache: {e}"), None),
        },
    }
}
