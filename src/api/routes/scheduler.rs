use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{failure, parse_body, success, ApiResponse, AppState};
use crate::error::ScrapePulseError;
use crate::runs::JobRun;

/// Request body for POST /api/scheduler/status
#[derive(Debug, Deserialize)]
pub struct SchedulerActionRequest {
    pub action: String,
}

/// GET /api/scheduler/status
/// Scheduler registration state plus global run statistics
pub async fn get_status(State(state): State<AppState>) -> ApiResponse {
    let status = state.scheduler.status();
    let stats = JobRun::stats(&state.db, None).map_err(|e| failure(&e))?;

    let mut payload = serde_json::to_value(&status).unwrap_or_default();
    if let Some(obj) = payload.as_object_mut() {
        obj.insert(
            "stats".to_string(),
            serde_json::to_value(&stats).unwrap_or_default(),
        );
    }

    Ok(success(StatusCode::OK, "data", payload))
}

/// POST /api/scheduler/status
/// Body { "action": "start" | "stop" }
pub async fn post_status(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResponse {
    let request: SchedulerActionRequest = parse_body(body)?;

    match request.action.as_str() {
        "start" => {
            let registered = state.scheduler.start().await.map_err(|e| failure(&e))?;
            Ok(success(
                StatusCode::OK,
                "data",
                json!({ "running": true, "registeredJobs": registered }),
            ))
        }
        "stop" => {
            state.scheduler.stop().await;
            Ok(success(StatusCode::OK, "data", json!({ "running": false })))
        }
        other => Err(failure(&ScrapePulseError::Validation(format!(
            "unknown action '{other}', expected 'start' or 'stop'"
        )))),
    }
}

/// POST /api/scheduler/reload
/// Drop all job handles and re-register from the store
pub async fn reload(State(state): State<AppState>) -> ApiResponse {
    let registered = state.scheduler.reload().await.map_err(|e| failure(&e))?;
    Ok(success(
        StatusCode::OK,
        "data",
        json!({ "registeredJobs": registered }),
    ))
}

/// POST /api/startup
/// One-shot boot: the store is migrated at process start; this starts the
/// scheduler (idempotently) and reports how many jobs registered
pub async fn startup(State(state): State<AppState>) -> ApiResponse {
    let registered = state.scheduler.start().await.map_err(|e| failure(&e))?;
    Ok(success(
        StatusCode::OK,
        "data",
        json!({ "registeredJobs": registered }),
    ))
}
