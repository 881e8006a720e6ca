//! Outbound execution of a scheduled job against the remote scraping service.
//!
//! The runner is free of persistence concerns: it turns a `ScheduledJob` into
//! one or more HTTP calls and returns the terminal result or a typed error.
//! The scheduler wraps invocations with run bookkeeping. No retries happen
//! inside a run; the schedule itself is the retry policy.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::ScrapePulseError;
use crate::jobs::{JobType, ScheduledJob};

/// Hard per-call timeout for scrape/crawl/batch requests.
const SCRAPE_TIMEOUT_SECS: u64 = 300;
/// Hard per-call timeout for map requests.
const MAP_TIMEOUT_SECS: u64 = 120;
/// Delay between status polls for async crawl/batch jobs.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Poll budget: ~10 minutes at the production interval.
const MAX_POLL_ATTEMPTS: u32 = 120;
/// Longest remote body excerpt carried into error messages.
const MAX_BODY_SNIPPET: usize = 200;

/// Executes scheduled jobs against their remote endpoint.
#[derive(Clone)]
pub struct JobRunner {
    client: Client,
    poll_interval: Duration,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRunner {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the poll delay. Tests shrink this so poll-mode paths run in
    /// milliseconds; production uses the 5-second default.
    #[allow(dead_code)]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Perform the outbound call(s) for one run. Cancelling `cancel` aborts
    /// in-flight HTTP and polling promptly.
    pub async fn execute(
        &self,
        job: &ScheduledJob,
        cancel: &CancellationToken,
    ) -> Result<Value, ScrapePulseError> {
        let endpoint = job.api_endpoint.trim_end_matches('/');

        match job.job_type {
            JobType::Scrape => {
                let mut body = Self::scrape_options(&job.job_config);
                body.insert("url".to_string(), json!(self.require_url(job)?));

                let response = self
                    .send(
                        self.client.post(format!("{endpoint}/v1/scrape")).json(&body),
                        SCRAPE_TIMEOUT_SECS,
                        cancel,
                    )
                    .await?;
                Ok(extract(&response, &["data"]))
            }
            JobType::Crawl => {
                let mut body = Map::new();
                body.insert("url".to_string(), json!(self.require_url(job)?));
                if let Some(limit) = job.job_config.get("limit") {
                    body.insert("limit".to_string(), limit.clone());
                }
                let options = Self::scrape_options(&job.job_config);
                if !options.is_empty() {
                    body.insert("scrapeOptions".to_string(), Value::Object(options));
                }

                let response = self
                    .send(
                        self.client.post(format!("{endpoint}/v1/crawl")).json(&body),
                        SCRAPE_TIMEOUT_SECS,
                        cancel,
                    )
                    .await?;

                match response.get("id").and_then(Value::as_str) {
                    Some(id) => {
                        self.poll_until_terminal(&format!("{endpoint}/v1/crawl/{id}"), id, cancel)
                            .await
                    }
                    None => Ok(extract(&response, &["data"])),
                }
            }
            JobType::Map => {
                let body = json!({ "url": self.require_url(job)? });
                let response = self
                    .send(
                        self.client.post(format!("{endpoint}/v1/map")).json(&body),
                        MAP_TIMEOUT_SECS,
                        cancel,
                    )
                    .await?;
                Ok(extract(&response, &["links", "data"]))
            }
            JobType::Batch => {
                let urls = job.urls.as_ref().filter(|u| !u.is_empty()).ok_or_else(|| {
                    ScrapePulseError::Validation("batch job has no urls".to_string())
                })?;
                let mut body = Self::scrape_options(&job.job_config);
                body.insert("urls".to_string(), json!(urls));

                let response = self
                    .send(
                        self.client
                            .post(format!("{endpoint}/v1/batch/scrape"))
                            .json(&body),
                        SCRAPE_TIMEOUT_SECS,
                        cancel,
                    )
                    .await?;

                match response.get("id").and_then(Value::as_str) {
                    Some(id) => {
                        self.poll_until_terminal(
                            &format!("{endpoint}/v1/batch/scrape/{id}"),
                            id,
                            cancel,
                        )
                        .await
                    }
                    None => Ok(extract(&response, &["data"])),
                }
            }
        }
    }

    fn require_url<'a>(&self, job: &'a ScheduledJob) -> Result<&'a str, ScrapePulseError> {
        job.url
            .as_deref()
            .ok_or_else(|| ScrapePulseError::Validation("job has no url".to_string()))
    }

    /// Project the remote scrape options out of `job_config`. Only fields the
    /// caller actually set are forwarded, so the remote applies its own
    /// defaults for everything else. waitFor/timeout are declared in seconds
    /// and sent in milliseconds.
    fn scrape_options(config: &Value) -> Map<String, Value> {
        let mut options = Map::new();
        let Some(obj) = config.as_object() else {
            return options;
        };

        for key in ["formats", "onlyMainContent", "includeTags", "excludeTags"] {
            if let Some(value) = obj.get(key) {
                options.insert(key.to_string(), value.clone());
            }
        }
        for key in ["waitFor", "timeout"] {
            if let Some(seconds) = obj.get(key).and_then(Value::as_f64) {
                options.insert(key.to_string(), json!((seconds * 1000.0).round() as u64));
            }
        }
        options
    }

    /// Poll an async job's status URL until it reports a terminal state.
    async fn poll_until_terminal(
        &self,
        status_url: &str,
        remote_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, ScrapePulseError> {
        for attempt in 0..MAX_POLL_ATTEMPTS {
            if attempt > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(ScrapePulseError::Interrupted(
                            "scheduler shutdown".to_string(),
                        ))
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }

            let body = self
                .send(self.client.get(status_url), SCRAPE_TIMEOUT_SECS, cancel)
                .await?;

            match body.get("status").and_then(Value::as_str) {
                Some("completed") => {
                    return Ok(body.get("data").cloned().unwrap_or(Value::Null))
                }
                Some("failed") => {
                    let message = body
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("remote job failed");
                    return Err(ScrapePulseError::Remote(message.to_string()));
                }
                // Anything else (scraping, processing, ...) means keep waiting.
                _ => {}
            }
        }

        Err(ScrapePulseError::PollTimeout(remote_id.to_string()))
    }

    /// Send one request with the hard timeout, racing cancellation, and parse
    /// the body leniently as JSON. Non-2xx statuses map to the typed remote
    /// error taxonomy.
    async fn send(
        &self,
        request: RequestBuilder,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<Value, ScrapePulseError> {
        let round_trip = async {
            let response = match request
                .timeout(Duration::from_secs(timeout_secs))
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(ScrapePulseError::LocalTimeout(timeout_secs))
                }
                Err(e) => return Err(ScrapePulseError::Http(e)),
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) if e.is_timeout() => {
                    return Err(ScrapePulseError::LocalTimeout(timeout_secs))
                }
                Err(e) => return Err(ScrapePulseError::Http(e)),
            };

            if !status.is_success() {
                return Err(Self::status_error(status, &text));
            }

            serde_json::from_str(&text).map_err(|_| {
                ScrapePulseError::Remote(format!(
                    "invalid JSON response: {}",
                    truncate(&text, MAX_BODY_SNIPPET)
                ))
            })
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                Err(ScrapePulseError::Interrupted("scheduler shutdown".to_string()))
            }
            result = round_trip => result,
        }
    }

    fn status_error(status: StatusCode, body: &str) -> ScrapePulseError {
        let detail = format!(
            "{} {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("unknown"),
            truncate(body, MAX_BODY_SNIPPET)
        );

        match status.as_u16() {
            408 => ScrapePulseError::RemoteTimeout(detail),
            429 => ScrapePulseError::RemoteRateLimited(detail),
            500..=599 => ScrapePulseError::RemoteUnavailable(detail),
            _ => ScrapePulseError::Remote(detail),
        }
    }
}

/// First present key wins; the whole body is the fallback. Remote envelopes
/// vary, so unknown shapes pass through untouched.
fn extract(body: &Value, keys: &[&str]) -> Value {
    for key in keys {
        if let Some(value) = body.get(key) {
            return value.clone();
        }
    }
    body.clone()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
