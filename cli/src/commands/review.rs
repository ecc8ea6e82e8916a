use clap::Subcommand;
use serde_json::json;

use coursegate_runtime::ReviewSubmission;

use crate::util::{SessionArgs, print_course_error, print_json};

#[derive(Subcommand)]
pub enum ReviewCommands {
    /// Rate the course
    Submit {
        /// Star rating, 1 to 5
        #[arg(long)]
        rating: u8,
        /// Optional free-text comment
        #[arg(long)]
        comment: Option<String>,
    },
    /// Skip the review and move on to the exam
    Skip,
}

pub async fn run(args: &SessionArgs, command: ReviewCommands) -> i32 {
    let session = match args.open().await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let result = match command {
        ReviewCommands::Submit { rating, comment } => {
            session
                .submit_review(ReviewSubmission { rating, comment })
                .await
        }
        ReviewCommands::Skip => session.skip_review().await,
    };
    match result {
        Ok(state) => print_json(&json!({
            "state": state,
            "allowed_actions": state.allowed_actions(),
        })),
        Err(e) => print_course_error(&e),
    }
}
