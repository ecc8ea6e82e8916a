use std::collections::BTreeMap;

use clap::Subcommand;
use serde_json::json;

use coursegate_core::assessment::AttemptDraft;
use coursegate_core::{AnswerId, CourseError, QuestionId};

use crate::util::{SessionArgs, exit_error, print_course_error, print_json, read_json_from_file};

#[derive(Subcommand)]
pub enum ExamCommands {
    /// Open a new attempt and print its questions
    Start,
    /// Answer and submit an attempt
    Submit {
        /// JSON object mapping question id to selected answer ids, or "-"
        /// for stdin. Example: {"q1": ["a2"], "q2": ["a1", "a3"]}
        #[arg(long)]
        answers: String,
    },
}

pub async fn run(args: &SessionArgs, command: ExamCommands) -> i32 {
    // Parse input before touching the network.
    let answers = match &command {
        ExamCommands::Submit { answers } => Some(parse_answers(answers)),
        ExamCommands::Start => None,
    };

    let session = match args.open().await {
        Ok(session) => session,
        Err(code) => return code,
    };
    let draft = match session.start_attempt().await {
        Ok(draft) => draft,
        Err(e) => return print_course_error(&e),
    };

    let Some(answers) = answers else {
        return print_json(&json!({
            "attempt_number": draft.attempt_number(),
            "questions": draft.questions(),
        }));
    };

    let draft = match fill(draft, &answers) {
        Ok(draft) => draft,
        Err(e) => return print_course_error(&e),
    };
    let mut result = session.submit_attempt(draft).await;
    if result.as_ref().is_err_and(CourseError::is_retryable) {
        // Same attempt id, so the backend records it at most once.
        result = session.retry_submission().await;
    }
    match result {
        Ok(outcome) => {
            let gate = session.gate_state().ok();
            print_json(&json!({ "result": outcome, "gate": gate }))
        }
        Err(e) => print_course_error(&e),
    }
}

fn parse_answers(path: &str) -> BTreeMap<QuestionId, Vec<AnswerId>> {
    let value = read_json_from_file(path).unwrap_or_else(|e| exit_error(&e, None));
    serde_json::from_value(value).unwrap_or_else(|e| {
        exit_error(
            &format!("Invalid answers: {e}"),
            Some("Expected an object of question id to an array of answer ids"),
        )
    })
}

fn fill(
    mut draft: AttemptDraft,
    answers: &BTreeMap<QuestionId, Vec<AnswerId>>,
) -> Result<AttemptDraft, CourseError> {
    for (question, selected) in answers {
        draft.respond(question, selected)?;
    }
    Ok(draft)
}
