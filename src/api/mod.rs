pub mod routes;

// Re-export route handlers for convenience
pub use routes::schedules;
pub use routes::scheduler;

use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::database::Database;
use crate::error::ScrapePulseError;
use crate::scheduler::Scheduler;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub scheduler: Scheduler,
}

/// Every handler resolves to an envelope payload plus a status code.
pub type ApiResponse = Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)>;

/// Success envelope with the payload under the given key
/// (`data`, `schedules`, `runs`).
pub(crate) fn success(status: StatusCode, key: &str, payload: Value) -> (StatusCode, Json<Value>) {
    let mut body = serde_json::Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    body.insert(key.to_string(), payload);
    (status, Json(Value::Object(body)))
}

/// Error envelope. The internal error kind picks the HTTP status; only the
/// message is exposed.
pub(crate) fn failure(err: &ScrapePulseError) -> (StatusCode, Json<Value>) {
    let status = match err {
        ScrapePulseError::Validation(_) | ScrapePulseError::ScheduleConfig(_) => {
            StatusCode::BAD_REQUEST
        }
        ScrapePulseError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
}

/// Deserialize a request body, folding malformed input into the 400 envelope.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(
    body: Value,
) -> Result<T, (StatusCode, Json<Value>)> {
    serde_json::from_value(body).map_err(|e| {
        failure(&ScrapePulseError::Validation(format!(
            "invalid request body: {e}"
        )))
    })
}

/// Guard that a referenced job exists.
pub(crate) fn require_job(
    db: &Database,
    job_id: &str,
) -> Result<crate::jobs::ScheduledJob, (StatusCode, Json<Value>)> {
    match crate::jobs::ScheduledJob::get_by_id(db, job_id) {
        Ok(Some(job)) => Ok(job),
        Ok(None) => Err(failure(&ScrapePulseError::NotFound(format!(
            "scheduled job {job_id}"
        )))),
        Err(e) => Err(failure(&e)),
    }
}
