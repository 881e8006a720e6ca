//! Scheduler lifecycle and dispatch.
//!
//! The scheduler owns the map of registered cron handles, one dispatch task
//! per active job. Each dispatch task sleeps until the job's next fire
//! instant and then runs a tick; because the sleep target comes from the same
//! `next_fire_after` computation that is persisted as `next_run_at`, the
//! dispatcher and the stored prediction cannot drift apart.
//!
//! Per job id, execution is single-flight: a tick that lands while a run for
//! the same job is still in flight is dropped with a warning. Different jobs
//! execute in parallel, each on its own tokio task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::database::Database;
use crate::error::ScrapePulseError;
use crate::jobs::ScheduledJob;
use crate::recurrence::CronSpec;
use crate::runner::JobRunner;
use crate::runs::{JobRun, RunType};

/// Nightly run-history cleanup, 02:00 UTC.
const CLEANUP_CRON: &str = "0 2 * * *";
/// How long `stop` waits for in-flight executions to abort.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Snapshot of the scheduler's registration state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub count: usize,
    pub ids: Vec<String>,
}

/// Process-wide scheduler. Constructed explicitly at boot and injected where
/// needed, so tests can spin up isolated instances.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    db: Database,
    runner: JobRunner,
    /// Registered cron handles by job id.
    handles: Mutex<HashMap<String, JobHandle>>,
    /// Handle for the internal cleanup task.
    cleanup: Mutex<Option<JobHandle>>,
    /// Per-job single-flight locks.
    run_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Root token for the current start/stop cycle; job tokens are children.
    shutdown: Mutex<CancellationToken>,
    running: AtomicBool,
}

struct JobHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerInner {
    fn run_lock(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.run_locks
            .lock()
            .expect("run lock map poisoned")
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }

    fn current_shutdown(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .expect("shutdown token poisoned")
            .clone()
    }
}

impl Scheduler {
    pub fn new(db: Database, runner: JobRunner) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                db,
                runner,
                handles: Mutex::new(HashMap::new()),
                cleanup: Mutex::new(None),
                run_locks: Mutex::new(HashMap::new()),
                shutdown: Mutex::new(CancellationToken::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Start the scheduler: sweep orphaned runs, register every active job,
    /// and arm the nightly cleanup. Idempotent; a second call is a no-op that
    /// reports the current registration count.
    pub async fn start(&self) -> Result<usize, ScrapePulseError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return Ok(self.inner.handles.lock().expect("handle map poisoned").len());
        }

        // Runs left 'running' by a dead process are failed before anything
        // can fire. Missed ticks are not replayed: miss and continue.
        self.recover_orphan_runs()?;

        let jobs = ScheduledJob::list_active(&self.inner.db)?;
        let mut registered = 0;
        for job in jobs {
            match self.schedule_job_from_now(&job) {
                Ok(()) => registered += 1,
                Err(e) => error!("Job '{}' could not be registered: {e}", job.job_id),
            }
        }

        self.spawn_cleanup_task();

        info!("Scheduler started with {registered} registered job(s)");
        Ok(registered)
    }

    /// Unregister everything, cancel in-flight executions, and wait (bounded)
    /// for them to finish aborting.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping scheduler");

        // Cancel the whole cycle, then install a fresh token so manual runs
        // triggered after the stop are governed by the next cycle.
        let token = {
            let mut guard = self.inner.shutdown.lock().expect("shutdown token poisoned");
            let old = guard.clone();
            *guard = CancellationToken::new();
            old
        };
        token.cancel();

        let handles: Vec<JobHandle> = self
            .inner
            .handles
            .lock()
            .expect("handle map poisoned")
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        let cleanup = self.inner.cleanup.lock().expect("cleanup handle poisoned").take();

        let drain = async {
            for handle in handles {
                let _ = handle.task.await;
            }
            if let Some(handle) = cleanup {
                let _ = handle.task.await;
            }
        };

        if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
            warn!("Scheduler shutdown deadline elapsed with executions still aborting");
        }
        info!("Scheduler stopped");
    }

    /// Register (or re-register) a job's cron handle. A paused job is only
    /// unregistered.
    ///
    /// Create and update have already computed and persisted `next_run_at`
    /// against the row's own `created_at`/`updated_at`; registering with that
    /// same instant keeps the stored prediction exact instead of overwriting
    /// it with a recomputation from a later clock sample.
    pub fn schedule_job(&self, job: &ScheduledJob) -> Result<(), ScrapePulseError> {
        self.unschedule_job(&job.job_id);

        if !job.is_active {
            return Ok(());
        }

        let next = match job.next_run_at {
            Some(next) => next,
            None => {
                let next = job.next_fire_after(Utc::now())?;
                ScheduledJob::set_next_run_at(&self.inner.db, &job.job_id, next)?;
                next
            }
        };

        self.register(job, next)
    }

    /// Registration for the restart/reload path: the stored `next_run_at`
    /// may predate process downtime, so trust the cron derivation and
    /// recompute from now. Ticks missed while down are skipped, not
    /// replayed.
    fn schedule_job_from_now(&self, job: &ScheduledJob) -> Result<(), ScrapePulseError> {
        self.unschedule_job(&job.job_id);

        if !job.is_active {
            return Ok(());
        }

        let next = job.next_fire_after(Utc::now())?;
        ScheduledJob::set_next_run_at(&self.inner.db, &job.job_id, next)?;

        self.register(job, next)
    }

    fn register(
        &self,
        job: &ScheduledJob,
        next: chrono::DateTime<Utc>,
    ) -> Result<(), ScrapePulseError> {
        if !self.inner.running.load(Ordering::SeqCst) {
            debug!(
                "Scheduler not running; job '{}' will register at next start",
                job.job_id
            );
            return Ok(());
        }

        let cancel = self.inner.current_shutdown().child_token();
        let task = tokio::spawn(Self::dispatch_loop(
            Arc::clone(&self.inner),
            job.clone(),
            cancel.clone(),
            next,
        ));
        self.inner
            .handles
            .lock()
            .expect("handle map poisoned")
            .insert(job.job_id.clone(), JobHandle { cancel, task });

        info!(
            "Registered job '{}' ({}) - {} schedule in {}, next fire {}",
            job.name,
            job.job_id,
            job.schedule_type.as_str(),
            job.timezone,
            next.to_rfc3339()
        );
        Ok(())
    }

    /// Remove a job's cron handle if present. Idempotent.
    pub fn unschedule_job(&self, job_id: &str) {
        if let Some(handle) = self
            .inner
            .handles
            .lock()
            .expect("handle map poisoned")
            .remove(job_id)
        {
            handle.cancel.cancel();
            info!("Unregistered job '{job_id}'");
        }
    }

    /// Fire a job now, outside its cadence. The run shares the per-job
    /// single-flight lock with scheduled ticks, so a manual trigger while a
    /// run is in flight is rejected rather than queued. The job's
    /// `next_run_at` is recomputed afterwards; its cadence is otherwise
    /// unaffected.
    pub async fn execute_job_manually(&self, job_id: &str) -> Result<JobRun, ScrapePulseError> {
        let job = ScheduledJob::get_by_id(&self.inner.db, job_id)?
            .ok_or_else(|| ScrapePulseError::NotFound(format!("scheduled job {job_id}")))?;
        if !job.is_active {
            return Err(ScrapePulseError::Validation(format!(
                "job '{}' is paused",
                job.name
            )));
        }

        let lock = self.inner.run_lock(job_id);
        let _guard = lock.try_lock().map_err(|_| {
            ScrapePulseError::Validation(format!("job '{}' already has a run in flight", job.name))
        })?;

        let cancel = self.inner.current_shutdown().child_token();
        Self::perform_run(&self.inner, &job, RunType::Manual, &cancel).await
    }

    /// Drop every job handle (cleanup stays armed) and re-register from the
    /// store. Returns the number of registered jobs.
    pub async fn reload(&self) -> Result<usize, ScrapePulseError> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(ScrapePulseError::Validation(
                "scheduler is not running".to_string(),
            ));
        }
        info!("Reloading schedules from store");

        let handles: Vec<JobHandle> = self
            .inner
            .handles
            .lock()
            .expect("handle map poisoned")
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &handles {
            handle.cancel.cancel();
        }

        let jobs = ScheduledJob::list_active(&self.inner.db)?;
        let mut registered = 0;
        for job in jobs {
            match self.schedule_job_from_now(&job) {
                Ok(()) => registered += 1,
                Err(e) => error!("Job '{}' could not be re-registered: {e}", job.job_id),
            }
        }

        info!("Reload complete: {registered} job(s) registered");
        Ok(registered)
    }

    pub fn status(&self) -> SchedulerStatus {
        let handles = self.inner.handles.lock().expect("handle map poisoned");
        let mut ids: Vec<String> = handles.keys().cloned().collect();
        ids.sort();
        SchedulerStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            count: ids.len(),
            ids,
        }
    }

    fn recover_orphan_runs(&self) -> Result<(), ScrapePulseError> {
        let swept = JobRun::fail_orphans(&self.inner.db, "interrupted by restart")?;
        if swept > 0 {
            warn!("Marked {swept} orphaned run(s) as failed after restart");
        }
        Ok(())
    }

    /// One dispatch task per registered job: sleep to the next fire, tick,
    /// repeat. The first fire instant is the one registration persisted;
    /// subsequent fires are recomputed from each tick's completion. Exits
    /// when cancelled or when the tick discovers the job no longer exists
    /// (or was paused) in the store.
    async fn dispatch_loop(
        inner: Arc<SchedulerInner>,
        job: ScheduledJob,
        cancel: CancellationToken,
        first_fire: chrono::DateTime<Utc>,
    ) {
        let job_id = job.job_id.clone();
        let mut next = first_fire;

        loop {
            let delay = (next - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            if !Self::run_tick(&inner, &job_id, &cancel).await {
                break;
            }

            next = match job.next_fire_after(Utc::now()) {
                Ok(next) => next,
                Err(e) => {
                    error!("Job '{job_id}': cannot compute next fire, unregistering: {e}");
                    break;
                }
            };
        }

        // Self-deregistration. A cancelled task never reaches this point with
        // an uncancelled token, so a replacement handle under the same id is
        // left alone.
        if !cancel.is_cancelled() {
            inner
                .handles
                .lock()
                .expect("handle map poisoned")
                .remove(&job_id);
        }
    }

    /// One scheduled fire. Returns false when the handle should unregister
    /// itself (job deleted or paused since registration).
    async fn run_tick(
        inner: &Arc<SchedulerInner>,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> bool {
        // Re-read the job: the handle may have outlived deletion or
        // deactivation.
        let job = match ScheduledJob::get_by_id(&inner.db, job_id) {
            Ok(Some(job)) if job.is_active => job,
            Ok(_) => {
                warn!("Job '{job_id}' is gone or paused; unregistering its handle");
                return false;
            }
            Err(e) => {
                error!("Job '{job_id}': tick skipped, store read failed: {e}");
                return true;
            }
        };

        let lock = inner.run_lock(job_id);
        let guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Job '{job_id}': previous run still in flight, dropping this tick");
                return true;
            }
        };

        if let Err(e) = Self::perform_run(inner, &job, RunType::Scheduled, cancel).await {
            error!("Job '{job_id}': run bookkeeping failed: {e}");
        }
        drop(guard);

        true
    }

    /// The single run path shared by scheduled ticks and manual triggers:
    /// create the run row, execute, record the terminal state, then advance
    /// `last_run_at`/`next_run_at`. The next fire is anchored on completion,
    /// so a long run shifts the following tick rather than stacking up.
    async fn perform_run(
        inner: &Arc<SchedulerInner>,
        job: &ScheduledJob,
        run_type: RunType,
        cancel: &CancellationToken,
    ) -> Result<JobRun, ScrapePulseError> {
        let run = JobRun::create(&inner.db, &job.job_id, run_type)?;
        JobRun::mark_running(&inner.db, &run.run_id)?;
        info!(
            "Job '{}': {} run {} started",
            job.name,
            run_type.as_str(),
            run.run_id
        );

        let started = Instant::now();
        let outcome = inner.runner.execute(job, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        match &outcome {
            Ok(result) => {
                JobRun::complete(&inner.db, &run.run_id, result, elapsed_ms)?;
                info!("Job '{}': run {} completed in {elapsed_ms}ms", job.name, run.run_id);
            }
            Err(e) => {
                JobRun::fail(&inner.db, &run.run_id, &e.to_string(), elapsed_ms)?;
                warn!("Job '{}': run {} failed after {elapsed_ms}ms: {e}", job.name, run.run_id);
            }
        }

        let now = Utc::now();
        let next = job.next_fire_after(now)?;
        ScheduledJob::update_last_run_time(&inner.db, &job.job_id, now, next)?;

        JobRun::get_by_id(&inner.db, &run.run_id)?
            .ok_or_else(|| ScrapePulseError::NotFound(format!("job run {}", run.run_id)))
    }

    fn spawn_cleanup_task(&self) {
        let spec = CronSpec::parse(CLEANUP_CRON).expect("cleanup cron expression is valid");
        let cancel = self.inner.current_shutdown().child_token();
        let inner = Arc::clone(&self.inner);
        let loop_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = spec.next_after(now, chrono_tz::UTC) else {
                    return;
                };
                let delay = (next - now).to_std().unwrap_or_default();

                tokio::select! {
                    _ = loop_cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                match JobRun::cleanup_old(&inner.db) {
                    Ok(0) => debug!("Run cleanup: nothing to delete"),
                    Ok(n) => info!("Run cleanup deleted {n} old job run(s)"),
                    Err(e) => error!("Run cleanup failed: {e}"),
                }
            }
        });

        *self.inner.cleanup.lock().expect("cleanup handle poisoned") =
            Some(JobHandle { cancel, task });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::scrape_job_params;
    use crate::runs::RunStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn_mock(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn ok_scrape_router() -> Router {
        Router::new().route(
            "/v1/scrape",
            post(|| async { Json(json!({"data": {"markdown": "# result"}})) }),
        )
    }

    fn test_scheduler() -> Scheduler {
        let db = Database::open_in_memory().unwrap();
        let runner = JobRunner::new().with_poll_interval(Duration::from_millis(1));
        Scheduler::new(db, runner)
    }

    fn db(scheduler: &Scheduler) -> &Database {
        &scheduler.inner.db
    }

    #[tokio::test]
    async fn test_manual_execution_records_completed_run() {
        let endpoint = spawn_mock(ok_scrape_router()).await;
        let scheduler = test_scheduler();
        let job =
            ScheduledJob::create(db(&scheduler), scrape_job_params("manual", &endpoint)).unwrap();

        let run = scheduler.execute_job_manually(&job.job_id).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.run_type, RunType::Manual);
        assert_eq!(run.result_data, Some(json!({"markdown": "# result"})));
        assert!(run.completed_at.is_some());
        assert!(run.execution_time_ms.unwrap() >= 0);

        // last_run_at and next_run_at advanced together.
        let reloaded = ScheduledJob::get_by_id(db(&scheduler), &job.job_id)
            .unwrap()
            .unwrap();
        let last = reloaded.last_run_at.expect("last_run_at should be set");
        let next = reloaded.next_run_at.expect("next_run_at should be set");
        assert!(next > last);
    }

    #[tokio::test]
    async fn test_manual_execution_failure_is_recorded_not_propagated() {
        let app = Router::new().route(
            "/v1/scrape",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let endpoint = spawn_mock(app).await;
        let scheduler = test_scheduler();
        let job =
            ScheduledJob::create(db(&scheduler), scrape_job_params("failing", &endpoint)).unwrap();

        let run = scheduler.execute_job_manually(&job.job_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let message = run.error_message.unwrap();
        assert!(message.contains("503"), "error should carry the status: {message}");
        assert!(run.result_data.is_none());

        // The failure does not unregister or poison anything: a second
        // trigger works.
        let second = scheduler.execute_job_manually(&job.job_id).await.unwrap();
        assert_eq!(second.status, RunStatus::Failed);
        assert_eq!(
            JobRun::stats(db(&scheduler), Some(&job.job_id)).unwrap().failed,
            2
        );
    }

    #[tokio::test]
    async fn test_manual_execution_requires_existing_active_job() {
        let scheduler = test_scheduler();

        let missing = scheduler.execute_job_manually("no-such-job").await;
        assert!(matches!(missing, Err(ScrapePulseError::NotFound(_))));

        let mut params = scrape_job_params("paused", "http://remote.invalid");
        params.is_active = false;
        let job = ScheduledJob::create(db(&scheduler), params).unwrap();
        let paused = scheduler.execute_job_manually(&job.job_id).await;
        assert!(matches!(paused, Err(ScrapePulseError::Validation(_))));
    }

    #[tokio::test]
    async fn test_single_flight_rejects_concurrent_manual_runs() {
        let app = Router::new().route(
            "/v1/scrape",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Json(json!({"data": "slow"}))
            }),
        );
        let endpoint = spawn_mock(app).await;
        let scheduler = test_scheduler();
        let job =
            ScheduledJob::create(db(&scheduler), scrape_job_params("slow", &endpoint)).unwrap();

        let first = {
            let scheduler = scheduler.clone();
            let job_id = job.job_id.clone();
            tokio::spawn(async move { scheduler.execute_job_manually(&job_id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = scheduler.execute_job_manually(&job.job_id).await;
        assert!(
            matches!(second, Err(ScrapePulseError::Validation(_))),
            "overlapping manual trigger should be rejected"
        );

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, RunStatus::Completed);

        // Exactly one run row was written.
        assert_eq!(
            JobRun::stats(db(&scheduler), Some(&job.job_id)).unwrap().total,
            1
        );
    }

    #[tokio::test]
    async fn test_start_recovers_orphan_runs() {
        let scheduler = test_scheduler();
        let job = ScheduledJob::create(
            db(&scheduler),
            scrape_job_params("orphaned", "http://remote.invalid"),
        )
        .unwrap();

        // Simulate a crash mid-execution: a run left in 'running'.
        let orphan = JobRun::create(db(&scheduler), &job.job_id, RunType::Scheduled).unwrap();
        JobRun::mark_running(db(&scheduler), &orphan.run_id).unwrap();

        scheduler.start().await.unwrap();

        let recovered = JobRun::get_by_id(db(&scheduler), &orphan.run_id)
            .unwrap()
            .unwrap();
        assert_eq!(recovered.status, RunStatus::Failed);
        assert_eq!(recovered.error_message.as_deref(), Some("interrupted by restart"));
        assert!(recovered.completed_at.is_some());
        assert!(recovered.execution_time_ms.unwrap() >= 0);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_start_registers_only_active_jobs_and_is_idempotent() {
        let scheduler = test_scheduler();
        let active = ScheduledJob::create(
            db(&scheduler),
            scrape_job_params("active", "http://remote.invalid"),
        )
        .unwrap();
        let mut paused_params = scrape_job_params("paused", "http://remote.invalid");
        paused_params.is_active = false;
        ScheduledJob::create(db(&scheduler), paused_params).unwrap();

        let registered = scheduler.start().await.unwrap();
        assert_eq!(registered, 1);

        let status = scheduler.status();
        assert!(status.running);
        assert_eq!(status.count, 1);
        assert_eq!(status.ids, vec![active.job_id.clone()]);

        // Second start is a no-op.
        assert_eq!(scheduler.start().await.unwrap(), 1);

        scheduler.stop().await;
        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.count, 0);
    }

    #[tokio::test]
    async fn test_schedule_job_preserves_create_anchored_next_run() {
        let scheduler = test_scheduler();
        scheduler.start().await.unwrap();

        let job = ScheduledJob::create(
            db(&scheduler),
            scrape_job_params("registered", "http://remote.invalid"),
        )
        .unwrap();
        // The HTTP create handler registers right after inserting.
        scheduler.schedule_job(&job).unwrap();

        // Registration must not overwrite the value create computed against
        // created_at, even when the two clock samples straddle a minute
        // boundary.
        let reloaded = ScheduledJob::get_by_id(db(&scheduler), &job.job_id)
            .unwrap()
            .unwrap();
        assert_eq!(
            reloaded.next_run_at,
            Some(job.next_fire_after(job.created_at).unwrap())
        );
        assert_eq!(scheduler.status().count, 1);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_start_recomputes_stale_next_run_at() {
        let scheduler = test_scheduler();
        let job = ScheduledJob::create(
            db(&scheduler),
            scrape_job_params("stale", "http://remote.invalid"),
        )
        .unwrap();

        // Simulate downtime: the persisted next fire is long past.
        db(&scheduler)
            .conn()
            .execute(
                "UPDATE scheduled_jobs SET next_run_at = ? WHERE job_id = ?",
                rusqlite::params!["2020-01-01T00:00:00.000Z", job.job_id],
            )
            .unwrap();

        scheduler.start().await.unwrap();

        // Restart trusts the cron derivation, not the stored value; the
        // missed ticks are skipped, not replayed.
        let reloaded = ScheduledJob::get_by_id(db(&scheduler), &job.job_id)
            .unwrap()
            .unwrap();
        let next = reloaded.next_run_at.expect("registration persists next_run_at");
        assert!(next > Utc::now());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_unschedule_is_idempotent_and_updates_status() {
        let scheduler = test_scheduler();
        let job = ScheduledJob::create(
            db(&scheduler),
            scrape_job_params("transient", "http://remote.invalid"),
        )
        .unwrap();

        scheduler.start().await.unwrap();
        assert_eq!(scheduler.status().count, 1);

        scheduler.unschedule_job(&job.job_id);
        assert_eq!(scheduler.status().count, 0);
        scheduler.unschedule_job(&job.job_id); // no-op

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_jobs() {
        let scheduler = test_scheduler();
        scheduler.start().await.unwrap();
        assert_eq!(scheduler.status().count, 0);

        ScheduledJob::create(
            db(&scheduler),
            scrape_job_params("added-later", "http://remote.invalid"),
        )
        .unwrap();

        let registered = scheduler.reload().await.unwrap();
        assert_eq!(registered, 1);
        assert_eq!(scheduler.status().count, 1);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_reload_requires_running_scheduler() {
        let scheduler = test_scheduler();
        assert!(matches!(
            scheduler.reload().await,
            Err(ScrapePulseError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_cancels_inflight_run() {
        let app = Router::new().route(
            "/v1/scrape",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Json(Value::Null)
            }),
        );
        let endpoint = spawn_mock(app).await;
        let scheduler = test_scheduler();
        let job =
            ScheduledJob::create(db(&scheduler), scrape_job_params("hung", &endpoint)).unwrap();

        scheduler.start().await.unwrap();

        let in_flight = {
            let scheduler = scheduler.clone();
            let job_id = job.job_id.clone();
            tokio::spawn(async move { scheduler.execute_job_manually(&job_id).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stopped_at = Instant::now();
        scheduler.stop().await;
        assert!(
            stopped_at.elapsed() < Duration::from_secs(5),
            "stop should not wait for the remote"
        );

        let run = in_flight.await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.unwrap().contains("interrupted"));
    }
}
