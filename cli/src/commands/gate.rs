use serde_json::json;

use crate::util::{SessionArgs, print_course_error, print_json};

/// Show the unlock state and the actions currently available.
pub async fn run(args: &SessionArgs) -> i32 {
    let session = match args.open().await {
        Ok(session) => session,
        Err(code) => return code,
    };
    match session.gate_state() {
        Ok(state) => print_json(&json!({
            "state": state,
            "allowed_actions": state.allowed_actions(),
            "snapshot": session.snapshot().ok(),
        })),
        Err(e) => print_course_error(&e),
    }
}
