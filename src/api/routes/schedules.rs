use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::{failure, parse_body, require_job, success, ApiResponse, AppState};
use crate::jobs::{CreateJobParams, JobType, ScheduledJob, UpdateJobParams};
use crate::recurrence::{ScheduleConfig, ScheduleKind};
use crate::runs::JobRun;

/// Runs returned by the history endpoint when no limit is given.
const DEFAULT_RUN_LIMIT: u32 = 50;

/// Request body for creating a schedule
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    pub name: String,
    pub job_type: JobType,
    #[serde(default)]
    pub job_config: Option<Value>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub urls: Option<Vec<String>>,
    pub api_endpoint: String,
    pub schedule_type: ScheduleKind,
    pub schedule_config: ScheduleConfig,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Request body for updating a schedule; absent fields are left unchanged
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScheduleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub job_config: Option<Value>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub urls: Option<Vec<String>>,
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub schedule_type: Option<ScheduleKind>,
    #[serde(default)]
    pub schedule_config: Option<ScheduleConfig>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<u32>,
}

/// POST /api/schedules
/// Create a schedule; active schedules register with the scheduler right away
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> ApiResponse {
    let request: CreateScheduleRequest = parse_body(body)?;

    let params = CreateJobParams {
        name: request.name,
        job_type: request.job_type,
        job_config: request.job_config.unwrap_or_else(|| json!({})),
        url: request.url,
        urls: request.urls,
        api_endpoint: request.api_endpoint,
        schedule_type: request.schedule_type,
        schedule_config: request.schedule_config,
        timezone: request.timezone.unwrap_or_else(|| "UTC".to_string()),
        is_active: request.is_active.unwrap_or(true),
    };

    let job = ScheduledJob::create(&state.db, params).map_err(|e| failure(&e))?;

    if job.is_active {
        state.scheduler.schedule_job(&job).map_err(|e| failure(&e))?;
    }

    log::info!("Created schedule '{}' ({})", job.name, job.job_id);
    Ok(success(
        StatusCode::CREATED,
        "data",
        serde_json::to_value(&job).unwrap_or_default(),
    ))
}

/// GET /api/schedules
pub async fn list_schedules(State(state): State<AppState>) -> ApiResponse {
    let jobs = ScheduledJob::list_all(&state.db).map_err(|e| failure(&e))?;
    Ok(success(
        StatusCode::OK,
        "schedules",
        serde_json::to_value(&jobs).unwrap_or_default(),
    ))
}

/// GET /api/schedules/{id}
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResponse {
    let job = require_job(&state.db, &job_id)?;
    Ok(success(
        StatusCode::OK,
        "data",
        serde_json::to_value(&job).unwrap_or_default(),
    ))
}

/// PUT /api/schedules/{id}
/// Partial update; the registration follows the updated active flag
pub async fn update_schedule(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResponse {
    let request: UpdateScheduleRequest = parse_body(body)?;

    let params = UpdateJobParams {
        name: request.name,
        job_type: request.job_type,
        job_config: request.job_config,
        url: request.url,
        urls: request.urls,
        api_endpoint: request.api_endpoint,
        schedule_type: request.schedule_type,
        schedule_config: request.schedule_config,
        timezone: request.timezone,
        is_active: request.is_active,
    };

    let job = ScheduledJob::update(&state.db, &job_id, params).map_err(|e| failure(&e))?;

    if job.is_active {
        state.scheduler.schedule_job(&job).map_err(|e| failure(&e))?;
    } else {
        state.scheduler.unschedule_job(&job_id);
    }

    log::info!("Updated schedule '{}' ({})", job.name, job.job_id);
    Ok(success(
        StatusCode::OK,
        "data",
        serde_json::to_value(&job).unwrap_or_default(),
    ))
}

/// DELETE /api/schedules/{id}
/// Unregister and delete; runs cascade with the row
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResponse {
    state.scheduler.unschedule_job(&job_id);
    ScheduledJob::delete(&state.db, &job_id).map_err(|e| failure(&e))?;

    log::info!("Deleted schedule {job_id}");
    Ok(success(StatusCode::OK, "data", json!({ "deleted": true })))
}

/// POST /api/schedules/{id}/run
/// Manual trigger, under the same single-flight rules as a scheduled tick
pub async fn run_schedule(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResponse {
    let run = state
        .scheduler
        .execute_job_manually(&job_id)
        .await
        .map_err(|e| failure(&e))?;

    Ok(success(
        StatusCode::OK,
        "data",
        serde_json::to_value(&run).unwrap_or_default(),
    ))
}

/// GET /api/schedules/{id}/runs?limit=N
/// Most recent runs, newest first
pub async fn list_schedule_runs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> ApiResponse {
    require_job(&state.db, &job_id)?;

    let limit = query.limit.unwrap_or(DEFAULT_RUN_LIMIT);
    let runs = JobRun::list_for_job(&state.db, &job_id, limit).map_err(|e| failure(&e))?;

    Ok(success(
        StatusCode::OK,
        "runs",
        serde_json::to_value(&runs).unwrap_or_default(),
    ))
}
