use clap::Subcommand;
use serde_json::json;

use coursegate_core::CourseError;
use coursegate_core::completion::CompletionKey;

use crate::util::{CliSession, SessionArgs, print_course_error, print_json};

#[derive(Subcommand)]
pub enum ProgressCommands {
    /// Reconcile and show course progress
    Show,
    /// Mark an item complete, or incomplete if it already is
    Toggle {
        /// Module id
        #[arg(long)]
        module: String,
        /// Item position within the module (0-based)
        #[arg(long)]
        index: u32,
    },
}

pub async fn run(args: &SessionArgs, command: ProgressCommands) -> i32 {
    let session = match args.open().await {
        Ok(session) => session,
        Err(code) => return code,
    };
    match command {
        ProgressCommands::Show => show(&session),
        ProgressCommands::Toggle { module, index } => {
            toggle(&session, CompletionKey::new(module, index)).await
        }
    }
}

fn show(session: &CliSession) -> i32 {
    match summary(session) {
        Ok(summary) => print_json(&summary),
        Err(e) => print_course_error(&e),
    }
}

fn summary(session: &CliSession) -> Result<serde_json::Value, CourseError> {
    Ok(json!({
        "source": session.progress_source()?,
        "snapshot": session.snapshot()?,
        "backend_completed": session.backend_aggregate()?.map(|a| a.completed_count),
        "modules": session.module_progress()?,
        "next_item": session.next_item()?.map(|key| key.to_string()),
        "gate": session.gate_state()?,
    }))
}

async fn toggle(session: &CliSession, key: CompletionKey) -> i32 {
    match session.toggle_completion(key.clone()).await {
        Ok(snapshot) => print_json(&json!({
            "item": key.to_string(),
            "completed": session.completion_set().is_ok_and(|set| set.contains(&key)),
            "snapshot": snapshot,
            "backend_completed": session
                .backend_aggregate()
                .ok()
                .flatten()
                .map(|a| a.completed_count),
            "gate": session.gate_state().ok(),
        })),
        Err(e) => print_course_error(&e),
    }
}
