use axum::{
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::api::{self, AppState};
use crate::error::ScrapePulseError;

pub struct WebServer {
    host: String,
    port: u16,
    state: AppState,
}

impl WebServer {
    pub fn new(host: String, port: u16, state: AppState) -> Self {
        Self { host, port, state }
    }

    pub async fn start(&self) -> Result<(), ScrapePulseError> {
        let app = self.create_router();

        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ScrapePulseError::Error(format!("Invalid address: {}", e)))?;

        println!("🚀 ScrapePulse server starting on http://{}", addr);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ScrapePulseError::Error(format!("Failed to bind to {}: {}", addr, e)))?;

        axum::serve(listener, app)
            .await
            .map_err(|e| ScrapePulseError::Error(format!("Server error: {}", e)))?;

        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            // Health check
            .route("/health", get(health_check))
            // Schedule CRUD + manual trigger + run history
            .route(
                "/api/schedules",
                post(api::schedules::create_schedule).get(api::schedules::list_schedules),
            )
            .route(
                "/api/schedules/{id}",
                get(api::schedules::get_schedule)
                    .put(api::schedules::update_schedule)
                    .delete(api::schedules::delete_schedule),
            )
            .route("/api/schedules/{id}/run", post(api::schedules::run_schedule))
            .route(
                "/api/schedules/{id}/runs",
                get(api::schedules::list_schedule_runs),
            )
            // Scheduler lifecycle
            .route(
                "/api/scheduler/status",
                get(api::scheduler::get_status).post(api::scheduler::post_status),
            )
            .route("/api/scheduler/reload", post(api::scheduler::reload))
            .route("/api/startup", post(api::scheduler::startup))
            .with_state(self.state.clone())
    }
}

async fn health_check() -> Result<(StatusCode, Html<String>), StatusCode> {
    Ok((
        StatusCode::OK,
        Html("<h1>ScrapePulse</h1><p>✅ Server is running</p>".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::runner::JobRunner;
    use crate::scheduler::Scheduler;
    use axum::Json;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn spawn_remote_mock() -> String {
        let app = Router::new().route(
            "/v1/scrape",
            post(|| async { Json(json!({"data": {"markdown": "# scraped"}})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Bind the management API itself on an ephemeral port.
    async fn spawn_api() -> (String, AppState) {
        let db = Database::open_in_memory().unwrap();
        let runner = JobRunner::new().with_poll_interval(Duration::from_millis(1));
        let scheduler = Scheduler::new(db.clone(), runner);
        let state = AppState { db, scheduler };

        let server = WebServer::new("127.0.0.1".to_string(), 0, state.clone());
        let router = server.create_router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (format!("http://{addr}"), state)
    }

    fn create_payload(endpoint: &str) -> Value {
        json!({
            "name": "docs scrape",
            "jobType": "scrape",
            "jobConfig": { "formats": ["markdown"] },
            "url": "https://example.com/docs",
            "apiEndpoint": endpoint,
            "scheduleType": "daily",
            "scheduleConfig": { "time": "09:30" },
            "timezone": "America/New_York"
        })
    }

    #[tokio::test]
    async fn test_schedule_crud_round_trip() {
        let remote = spawn_remote_mock().await;
        let (base, _state) = spawn_api().await;
        let http = reqwest::Client::new();

        // Create
        let created: Value = http
            .post(format!("{base}/api/schedules"))
            .json(&create_payload(&remote))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(created["success"], json!(true));
        let job = &created["data"];
        let job_id = job["jobId"].as_str().unwrap().to_string();
        assert_eq!(job["timezone"], json!("America/New_York"));
        assert_eq!(job["isActive"], json!(true));
        assert!(job["nextRunAt"].is_string());

        // List
        let listed: Value = http
            .get(format!("{base}/api/schedules"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed["schedules"].as_array().unwrap().len(), 1);

        // Fetch one
        let fetched: Value = http
            .get(format!("{base}/api/schedules/{job_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(fetched["data"]["name"], json!("docs scrape"));

        // Update
        let updated: Value = http
            .put(format!("{base}/api/schedules/{job_id}"))
            .json(&json!({ "name": "renamed", "isActive": false }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["data"]["name"], json!("renamed"));
        assert_eq!(updated["data"]["isActive"], json!(false));

        // Delete
        let response = http
            .delete(format!("{base}/api/schedules/{job_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let response = http
            .get(format!("{base}/api/schedules/{job_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_create_and_update_persist_timestamp_anchored_next_run() {
        let (base, state) = spawn_api().await;
        let http = reqwest::Client::new();

        // Scheduler running, as after the one-shot boot.
        http.post(format!("{base}/api/startup"))
            .send()
            .await
            .unwrap();

        // Create through the full HTTP path; registration must leave the
        // persisted next_run_at anchored on created_at.
        let created: Value = http
            .post(format!("{base}/api/schedules"))
            .json(&create_payload("http://remote.invalid"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let job_id = created["data"]["jobId"].as_str().unwrap().to_string();

        let job = crate::jobs::ScheduledJob::get_by_id(&state.db, &job_id)
            .unwrap()
            .unwrap();
        assert_eq!(
            job.next_run_at,
            Some(job.next_fire_after(job.created_at).unwrap())
        );

        // Update through the full HTTP path; the recomputation anchor is the
        // refreshed updated_at.
        let updated: Value = http
            .put(format!("{base}/api/schedules/{job_id}"))
            .json(&json!({ "scheduleConfig": { "time": "23:45" } }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["success"], json!(true));

        let job = crate::jobs::ScheduledJob::get_by_id(&state.db, &job_id)
            .unwrap()
            .unwrap();
        assert_eq!(
            job.next_run_at,
            Some(job.next_fire_after(job.updated_at).unwrap())
        );
    }

    #[tokio::test]
    async fn test_create_validation_errors_use_envelope() {
        let (base, _state) = spawn_api().await;
        let http = reqwest::Client::new();

        // Missing url for a scrape job
        let response = http
            .post(format!("{base}/api/schedules"))
            .json(&json!({
                "name": "broken",
                "jobType": "scrape",
                "apiEndpoint": "http://remote.invalid",
                "scheduleType": "hourly",
                "scheduleConfig": {}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], json!(false));

        // Ill-formed schedule config
        let response = http
            .post(format!("{base}/api/schedules"))
            .json(&json!({
                "name": "broken",
                "jobType": "scrape",
                "url": "https://example.com",
                "apiEndpoint": "http://remote.invalid",
                "scheduleType": "daily",
                "scheduleConfig": {}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_manual_run_and_history_endpoints() {
        let remote = spawn_remote_mock().await;
        let (base, _state) = spawn_api().await;
        let http = reqwest::Client::new();

        let created: Value = http
            .post(format!("{base}/api/schedules"))
            .json(&create_payload(&remote))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let job_id = created["data"]["jobId"].as_str().unwrap().to_string();

        let run: Value = http
            .post(format!("{base}/api/schedules/{job_id}/run"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(run["success"], json!(true));
        assert_eq!(run["data"]["status"], json!("completed"));
        assert_eq!(run["data"]["runType"], json!("manual"));
        assert_eq!(run["data"]["resultData"], json!({"markdown": "# scraped"}));

        let history: Value = http
            .get(format!("{base}/api/schedules/{job_id}/runs?limit=10"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(history["runs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_lifecycle_endpoints() {
        let (base, _state) = spawn_api().await;
        let http = reqwest::Client::new();

        // Startup registers zero jobs on an empty store.
        let booted: Value = http
            .post(format!("{base}/api/startup"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(booted["data"]["registeredJobs"], json!(0));

        let status: Value = http
            .get(format!("{base}/api/scheduler/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["data"]["running"], json!(true));
        assert_eq!(status["data"]["count"], json!(0));
        assert!(status["data"]["stats"]["total"].is_number());

        let reloaded: Value = http
            .post(format!("{base}/api/scheduler/reload"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reloaded["success"], json!(true));

        let stopped: Value = http
            .post(format!("{base}/api/scheduler/status"))
            .json(&json!({ "action": "stop" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["data"]["running"], json!(false));

        let response = http
            .post(format!("{base}/api/scheduler/status"))
            .json(&json!({ "action": "sideways" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
