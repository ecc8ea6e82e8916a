use serde_json::json;

use crate::util::{SessionArgs, print_course_error, print_json};

pub async fn run(args: &SessionArgs) -> i32 {
    let session = match args.open().await {
        Ok(session) => session,
        Err(code) => return code,
    };
    match session.request_certificate().await {
        Ok(certificate_id) => print_json(&json!({
            "certificate_id": certificate_id,
            "scope": session.scope().to_string(),
        })),
        Err(e) => print_course_error(&e),
    }
}
