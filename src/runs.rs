use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::{parse_sql_time, sql_time, Database};
use crate::error::ScrapePulseError;

/// Runs older than this are eligible for deletion by the nightly cleanup.
const RUN_RETENTION_DAYS: i64 = 30;

/// How a run was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    Scheduled,
    Manual,
}

impl RunType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Run lifecycle. Terminal states are `Completed` and `Failed`; a run
/// transitions to a terminal state exactly once and is never mutated after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One execution attempt of a scheduled job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub run_id: String,
    pub job_id: String,
    pub run_type: RunType,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_data: Option<Value>,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Run counts grouped by status.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunStats {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

const RUN_COLUMNS: &str = "run_id, job_id, run_type, status, started_at, completed_at, \
     result_data, error_message, execution_time_ms, created_at";

impl JobRun {
    /// Insert a fresh `pending` run row for a fire.
    pub fn create(
        db: &Database,
        job_id: &str,
        run_type: RunType,
    ) -> Result<Self, ScrapePulseError> {
        let now = Utc::now();
        let run = JobRun {
            run_id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            run_type,
            status: RunStatus::Pending,
            started_at: now,
            completed_at: None,
            result_data: None,
            error_message: None,
            execution_time_ms: None,
            created_at: now,
        };

        db.conn().execute(
            "INSERT INTO job_runs (
                run_id, job_id, run_type, status, started_at, completed_at,
                result_data, error_message, execution_time_ms, created_at
            ) VALUES (?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, ?)",
            params![
                run.run_id,
                run.job_id,
                run.run_type.as_str(),
                run.status.as_str(),
                sql_time(run.started_at),
                sql_time(run.created_at),
            ],
        )?;

        Ok(run)
    }

    /// Transition a pending run to `running`.
    pub fn mark_running(db: &Database, run_id: &str) -> Result<(), ScrapePulseError> {
        db.conn().execute(
            "UPDATE job_runs SET status = ? WHERE run_id = ?",
            params![RunStatus::Running.as_str(), run_id],
        )?;
        Ok(())
    }

    /// Terminal transition: completed with its result payload.
    pub fn complete(
        db: &Database,
        run_id: &str,
        result_data: &Value,
        execution_time_ms: i64,
    ) -> Result<(), ScrapePulseError> {
        db.conn().execute(
            "UPDATE job_runs SET status = ?, completed_at = ?, result_data = ?,
                execution_time_ms = ?
             WHERE run_id = ?",
            params![
                RunStatus::Completed.as_str(),
                sql_time(Utc::now()),
                result_data.to_string(),
                execution_time_ms,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Terminal transition: failed with an error message.
    pub fn fail(
        db: &Database,
        run_id: &str,
        error_message: &str,
        execution_time_ms: i64,
    ) -> Result<(), ScrapePulseError> {
        db.conn().execute(
            "UPDATE job_runs SET status = ?, completed_at = ?, error_message = ?,
                execution_time_ms = ?
             WHERE run_id = ?",
            params![
                RunStatus::Failed.as_str(),
                sql_time(Utc::now()),
                error_message,
                execution_time_ms,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_by_id(db: &Database, run_id: &str) -> Result<Option<Self>, ScrapePulseError> {
        db.conn()
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE run_id = ?"),
                [run_id],
                Self::from_row,
            )
            .optional()
            .map_err(ScrapePulseError::Database)
    }

    /// Most recent runs for a job, newest first.
    pub fn list_for_job(
        db: &Database,
        job_id: &str,
        limit: u32,
    ) -> Result<Vec<Self>, ScrapePulseError> {
        let conn = db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE job_id = ?
             ORDER BY started_at DESC LIMIT ?"
        ))?;

        let rows = stmt.query_map(params![job_id, limit], Self::from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Runs still marked `running`; at startup these are orphans from a
    /// process that died mid-execution.
    pub fn list_running(db: &Database) -> Result<Vec<Self>, ScrapePulseError> {
        let conn = db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE status = ? ORDER BY started_at ASC"
        ))?;

        let rows = stmt.query_map([RunStatus::Running.as_str()], Self::from_row)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Fail every orphaned `running` row in one transaction. Called at
    /// startup before any job registers; returns how many were swept.
    pub fn fail_orphans(db: &Database, message: &str) -> Result<usize, ScrapePulseError> {
        let orphans = Self::list_running(db)?;
        if orphans.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        db.immediate_transaction(|conn| {
            for run in &orphans {
                let elapsed_ms = (now - run.started_at).num_milliseconds().max(0);
                conn.execute(
                    "UPDATE job_runs SET status = ?, completed_at = ?, error_message = ?,
                        execution_time_ms = ?
                     WHERE run_id = ? AND status = ?",
                    params![
                        RunStatus::Failed.as_str(),
                        sql_time(now),
                        message,
                        elapsed_ms,
                        run.run_id,
                        RunStatus::Running.as_str(),
                    ],
                )?;
            }
            Ok(())
        })?;

        Ok(orphans.len())
    }

    /// Delete runs created more than the retention window ago.
    /// Returns the number of deleted rows.
    pub fn cleanup_old(db: &Database) -> Result<usize, ScrapePulseError> {
        let cutoff = Utc::now() - Duration::days(RUN_RETENTION_DAYS);
        let deleted = db.conn().execute(
            "DELETE FROM job_runs WHERE created_at < ?",
            [sql_time(cutoff)],
        )?;
        Ok(deleted)
    }

    /// Run counts grouped by status, globally or for one job.
    pub fn stats(db: &Database, job_id: Option<&str>) -> Result<JobRunStats, ScrapePulseError> {
        let conn = db.conn();

        let counts: Vec<(String, i64)> = match job_id {
            Some(id) => {
                let mut stmt = conn.prepare(
                    "SELECT status, COUNT(*) FROM job_runs WHERE job_id = ? GROUP BY status",
                )?;
                let rows = stmt.query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM job_runs GROUP BY status")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };

        let mut stats = JobRunStats::default();
        for (status, count) in counts {
            stats.total += count;
            match RunStatus::parse(&status) {
                Some(RunStatus::Pending) => stats.pending = count,
                Some(RunStatus::Running) => stats.running = count,
                Some(RunStatus::Completed) => stats.completed = count,
                Some(RunStatus::Failed) => stats.failed = count,
                None => {}
            }
        }

        Ok(stats)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let run_type_str: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let started_at: String = row.get(4)?;
        let completed_at: Option<String> = row.get(5)?;
        let result_data_str: Option<String> = row.get(6)?;
        let created_at: String = row.get(9)?;

        Ok(JobRun {
            run_id: row.get(0)?,
            job_id: row.get(1)?,
            run_type: RunType::parse(&run_type_str).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    2,
                    "run_type".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            status: RunStatus::parse(&status_str).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    3,
                    "status".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            started_at: parse_sql_time(4, started_at)?,
            completed_at: completed_at.map(|s| parse_sql_time(5, s)).transpose()?,
            result_data: result_data_str
                .map(|s| {
                    serde_json::from_str(&s).map_err(|_| {
                        rusqlite::Error::InvalidColumnType(
                            6,
                            "result_data".to_string(),
                            rusqlite::types::Type::Text,
                        )
                    })
                })
                .transpose()?,
            error_message: row.get(7)?,
            execution_time_ms: row.get(8)?,
            created_at: parse_sql_time(9, created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::scrape_job_params;
    use crate::jobs::ScheduledJob;
    use serde_json::json;

    fn db_with_job() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let job = ScheduledJob::create(&db, scrape_job_params("runs", "http://remote")).unwrap();
        (db, job.job_id)
    }

    #[test]
    fn test_run_lifecycle_pending_running_completed() {
        let (db, job_id) = db_with_job();

        let run = JobRun::create(&db, &job_id, RunType::Scheduled).unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        JobRun::mark_running(&db, &run.run_id).unwrap();
        let loaded = JobRun::get_by_id(&db, &run.run_id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);

        JobRun::complete(&db, &run.run_id, &json!({"pages": 3}), 1234).unwrap();
        let loaded = JobRun::get_by_id(&db, &run.run_id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.result_data, Some(json!({"pages": 3})));
        assert_eq!(loaded.execution_time_ms, Some(1234));
        assert!(loaded.completed_at.is_some());
        assert!(loaded.error_message.is_none());
    }

    #[test]
    fn test_failed_run_records_error_only() {
        let (db, job_id) = db_with_job();

        let run = JobRun::create(&db, &job_id, RunType::Manual).unwrap();
        JobRun::fail(&db, &run.run_id, "remote unavailable: 503", 88).unwrap();

        let loaded = JobRun::get_by_id(&db, &run.run_id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(loaded.run_type, RunType::Manual);
        assert_eq!(
            loaded.error_message.as_deref(),
            Some("remote unavailable: 503")
        );
        assert!(loaded.result_data.is_none());
        assert!(loaded.completed_at.is_some());
        assert!(loaded.execution_time_ms.unwrap() >= 0);
    }

    #[test]
    fn test_list_for_job_is_newest_first_with_limit() {
        let (db, job_id) = db_with_job();

        for i in 0..5 {
            let run = JobRun::create(&db, &job_id, RunType::Scheduled).unwrap();
            // Space the started_at values out deterministically.
            db.conn()
                .execute(
                    "UPDATE job_runs SET started_at = ? WHERE run_id = ?",
                    params![format!("2024-01-0{}T00:00:00.000Z", i + 1), run.run_id],
                )
                .unwrap();
        }

        let runs = JobRun::list_for_job(&db, &job_id, 3).unwrap();
        assert_eq!(runs.len(), 3);
        assert!(runs[0].started_at > runs[1].started_at);
        assert!(runs[1].started_at > runs[2].started_at);
    }

    #[test]
    fn test_list_running_finds_orphans() {
        let (db, job_id) = db_with_job();

        let orphan = JobRun::create(&db, &job_id, RunType::Scheduled).unwrap();
        JobRun::mark_running(&db, &orphan.run_id).unwrap();

        let finished = JobRun::create(&db, &job_id, RunType::Scheduled).unwrap();
        JobRun::complete(&db, &finished.run_id, &json!(null), 10).unwrap();

        let running = JobRun::list_running(&db).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].run_id, orphan.run_id);
    }

    #[test]
    fn test_cleanup_deletes_only_old_runs() {
        let (db, job_id) = db_with_job();

        let old = JobRun::create(&db, &job_id, RunType::Scheduled).unwrap();
        let recent = JobRun::create(&db, &job_id, RunType::Scheduled).unwrap();

        let stale = Utc::now() - Duration::days(31);
        db.conn()
            .execute(
                "UPDATE job_runs SET created_at = ? WHERE run_id = ?",
                params![sql_time(stale), old.run_id],
            )
            .unwrap();

        let deleted = JobRun::cleanup_old(&db).unwrap();
        assert_eq!(deleted, 1);
        assert!(JobRun::get_by_id(&db, &old.run_id).unwrap().is_none());
        assert!(JobRun::get_by_id(&db, &recent.run_id).unwrap().is_some());
    }

    #[test]
    fn test_stats_group_by_status() {
        let (db, job_id) = db_with_job();

        let a = JobRun::create(&db, &job_id, RunType::Scheduled).unwrap();
        JobRun::complete(&db, &a.run_id, &json!([]), 5).unwrap();
        let b = JobRun::create(&db, &job_id, RunType::Scheduled).unwrap();
        JobRun::fail(&db, &b.run_id, "boom", 5).unwrap();
        let c = JobRun::create(&db, &job_id, RunType::Manual).unwrap();
        JobRun::complete(&db, &c.run_id, &json!([]), 5).unwrap();

        let stats = JobRun::stats(&db, None).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 0);

        let scoped = JobRun::stats(&db, Some(&job_id)).unwrap();
        assert_eq!(scoped.total, 3);
        let unscoped = JobRun::stats(&db, Some("missing-job")).unwrap();
        assert_eq!(unscoped.total, 0);
    }

    #[test]
    fn test_cascade_delete_removes_runs() {
        let (db, job_id) = db_with_job();

        let run = JobRun::create(&db, &job_id, RunType::Scheduled).unwrap();
        ScheduledJob::delete(&db, &job_id).unwrap();

        assert!(JobRun::get_by_id(&db, &run.run_id).unwrap().is_none());
        assert!(JobRun::list_for_job(&db, &job_id, 50).unwrap().is_empty());
    }
}
