use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::database::{parse_sql_time, sql_time, Database};
use crate::error::ScrapePulseError;
use crate::recurrence::{self, ScheduleConfig, ScheduleKind};

/// Which remote operation a scheduled job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Scrape,
    Crawl,
    Map,
    Batch,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Crawl => "crawl",
            Self::Map => "map",
            Self::Batch => "batch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scrape" => Some(Self::Scrape),
            "crawl" => Some(Self::Crawl),
            "map" => Some(Self::Map),
            "batch" => Some(Self::Batch),
            _ => None,
        }
    }

    /// Batch jobs target a list of URLs; the other kinds target exactly one.
    pub fn takes_url_list(self) -> bool {
        matches!(self, Self::Batch)
    }
}

/// A user-defined schedule binding a scraping operation to a recurrence rule.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub job_id: String,
    pub name: String,
    pub job_type: JobType,
    pub job_config: Value,
    pub url: Option<String>,
    pub urls: Option<Vec<String>>,
    pub api_endpoint: String,
    pub schedule_type: ScheduleKind,
    pub schedule_config: ScheduleConfig,
    pub timezone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Fields accepted when creating a job.
#[derive(Debug, Clone)]
pub struct CreateJobParams {
    pub name: String,
    pub job_type: JobType,
    pub job_config: Value,
    pub url: Option<String>,
    pub urls: Option<Vec<String>>,
    pub api_endpoint: String,
    pub schedule_type: ScheduleKind,
    pub schedule_config: ScheduleConfig,
    pub timezone: String,
    pub is_active: bool,
}

/// Partial update; absent fields keep their stored values.
#[derive(Debug, Clone, Default)]
pub struct UpdateJobParams {
    pub name: Option<String>,
    pub job_type: Option<JobType>,
    pub job_config: Option<Value>,
    pub url: Option<String>,
    pub urls: Option<Vec<String>>,
    pub api_endpoint: Option<String>,
    pub schedule_type: Option<ScheduleKind>,
    pub schedule_config: Option<ScheduleConfig>,
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
}

const JOB_COLUMNS: &str = "job_id, name, job_type, job_config, url, urls, api_endpoint, \
     schedule_type, schedule_config, timezone, is_active, \
     created_at, updated_at, last_run_at, next_run_at";

impl ScheduledJob {
    /// Validate internal consistency: the url/urls rule for the job type,
    /// non-empty display fields, a resolvable timezone, and a schedule
    /// config that satisfies its schedule type.
    pub fn validate(&self) -> Result<(), ScrapePulseError> {
        if self.name.trim().is_empty() {
            return Err(ScrapePulseError::Validation(
                "'name' cannot be empty".to_string(),
            ));
        }
        if self.api_endpoint.trim().is_empty() {
            return Err(ScrapePulseError::Validation(
                "'apiEndpoint' cannot be empty".to_string(),
            ));
        }

        if self.job_type.takes_url_list() {
            match &self.urls {
                Some(urls) if !urls.is_empty() => {}
                _ => {
                    return Err(ScrapePulseError::Validation(
                        "batch jobs require a non-empty 'urls' list".to_string(),
                    ))
                }
            }
            if self.url.is_some() {
                return Err(ScrapePulseError::Validation(
                    "batch jobs must not set 'url'".to_string(),
                ));
            }
        } else {
            match &self.url {
                Some(url) if !url.trim().is_empty() => {}
                _ => {
                    return Err(ScrapePulseError::Validation(format!(
                        "{} jobs require 'url'",
                        self.job_type.as_str()
                    )))
                }
            }
            if self.urls.is_some() {
                return Err(ScrapePulseError::Validation(format!(
                    "{} jobs must not set 'urls'",
                    self.job_type.as_str()
                )));
            }
        }

        if !self.job_config.is_object() {
            return Err(ScrapePulseError::Validation(
                "'jobConfig' must be an object".to_string(),
            ));
        }

        recurrence::parse_timezone(&self.timezone)?;
        recurrence::build_cron_spec(self.schedule_type, &self.schedule_config)?;
        Ok(())
    }

    /// Next fire instant for this job after `reference`.
    pub fn next_fire_after(
        &self,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ScrapePulseError> {
        recurrence::next_fire_after(
            self.schedule_type,
            &self.schedule_config,
            &self.timezone,
            reference,
        )
    }

    /// Insert a new job, assigning its id and computing the initial
    /// `next_run_at` from the creation instant.
    pub fn create(db: &Database, params: CreateJobParams) -> Result<Self, ScrapePulseError> {
        let now = Utc::now();
        let mut job = ScheduledJob {
            job_id: Uuid::new_v4().to_string(),
            name: params.name,
            job_type: params.job_type,
            job_config: params.job_config,
            url: params.url,
            urls: params.urls,
            api_endpoint: params.api_endpoint,
            schedule_type: params.schedule_type,
            schedule_config: params.schedule_config,
            timezone: params.timezone,
            is_active: params.is_active,
            created_at: now,
            updated_at: now,
            last_run_at: None,
            next_run_at: None,
        };

        job.validate()?;
        job.next_run_at = Some(job.next_fire_after(now)?);

        db.conn().execute(
            "INSERT INTO scheduled_jobs (
                job_id, name, job_type, job_config, url, urls, api_endpoint,
                schedule_type, schedule_config, timezone, is_active,
                created_at, updated_at, last_run_at, next_run_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                job.job_id,
                job.name,
                job.job_type.as_str(),
                job.job_config.to_string(),
                job.url,
                job.urls
                    .as_ref()
                    .map(|u| serde_json::to_string(u).unwrap_or_default()),
                job.api_endpoint,
                job.schedule_type.as_str(),
                serde_json::to_string(&job.schedule_config).unwrap_or_default(),
                job.timezone,
                job.is_active,
                sql_time(job.created_at),
                sql_time(job.updated_at),
                Option::<String>::None,
                job.next_run_at.map(sql_time),
            ],
        )?;

        Ok(job)
    }

    pub fn get_by_id(db: &Database, job_id: &str) -> Result<Option<Self>, ScrapePulseError> {
        Self::get_by_id_on(&db.conn(), job_id).map_err(ScrapePulseError::Database)
    }

    fn get_by_id_on(
        conn: &rusqlite::Connection,
        job_id: &str,
    ) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE job_id = ?"),
            [job_id],
            Self::from_row,
        )
        .optional()
    }

    pub fn list_all(db: &Database) -> Result<Vec<Self>, ScrapePulseError> {
        Self::list_where(db, "1=1")
    }

    pub fn list_active(db: &Database) -> Result<Vec<Self>, ScrapePulseError> {
        Self::list_where(db, "is_active = 1")
    }

    fn list_where(db: &Database, predicate: &str) -> Result<Vec<Self>, ScrapePulseError> {
        let conn = db.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE {predicate} ORDER BY created_at DESC"
        ))?;

        let rows = stmt.query_map([], Self::from_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Partial update. `updated_at` is refreshed; `next_run_at` is recomputed
    /// only while the job remains active - deactivating leaves it untouched
    /// until re-activation.
    pub fn update(
        db: &Database,
        job_id: &str,
        patch: UpdateJobParams,
    ) -> Result<Self, ScrapePulseError> {
        db.immediate_transaction(|conn| {
            let mut job = Self::get_by_id_on(conn, job_id)?
                .ok_or_else(|| ScrapePulseError::NotFound(format!("scheduled job {job_id}")))?;

            job.apply_patch(patch);
            job.validate()?;

            let now = Utc::now();
            job.updated_at = now;
            if job.is_active {
                job.next_run_at = Some(job.next_fire_after(now)?);
            }

            conn.execute(
                "UPDATE scheduled_jobs SET
                    name = ?, job_type = ?, job_config = ?, url = ?, urls = ?,
                    api_endpoint = ?, schedule_type = ?, schedule_config = ?,
                    timezone = ?, is_active = ?, updated_at = ?, next_run_at = ?
                WHERE job_id = ?",
                params![
                    job.name,
                    job.job_type.as_str(),
                    job.job_config.to_string(),
                    job.url,
                    job.urls
                        .as_ref()
                        .map(|u| serde_json::to_string(u).unwrap_or_default()),
                    job.api_endpoint,
                    job.schedule_type.as_str(),
                    serde_json::to_string(&job.schedule_config).unwrap_or_default(),
                    job.timezone,
                    job.is_active,
                    sql_time(job.updated_at),
                    job.next_run_at.map(sql_time),
                    job.job_id,
                ],
            )?;

            Ok(job)
        })
    }

    fn apply_patch(&mut self, patch: UpdateJobParams) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(job_type) = patch.job_type {
            self.job_type = job_type;
        }
        if let Some(job_config) = patch.job_config {
            self.job_config = job_config;
        }
        if let Some(url) = patch.url {
            self.url = Some(url);
        }
        if let Some(urls) = patch.urls {
            self.urls = Some(urls);
        }
        if let Some(api_endpoint) = patch.api_endpoint {
            self.api_endpoint = api_endpoint;
        }
        if let Some(schedule_type) = patch.schedule_type {
            self.schedule_type = schedule_type;
        }
        if let Some(schedule_config) = patch.schedule_config {
            self.schedule_config = schedule_config;
        }
        if let Some(timezone) = patch.timezone {
            self.timezone = timezone;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }

        // Exactly one of url/urls is meaningful for the effective type;
        // drop the stale counterpart after a type switch.
        if self.job_type.takes_url_list() {
            self.url = None;
        } else {
            self.urls = None;
        }
    }

    /// Delete the job; runs cascade via the foreign key.
    pub fn delete(db: &Database, job_id: &str) -> Result<(), ScrapePulseError> {
        let rows_affected = db
            .conn()
            .execute("DELETE FROM scheduled_jobs WHERE job_id = ?", [job_id])?;

        if rows_affected == 0 {
            return Err(ScrapePulseError::NotFound(format!("scheduled job {job_id}")));
        }
        Ok(())
    }

    /// Write `last_run_at`, `next_run_at`, and `updated_at` in one step.
    pub fn update_last_run_time(
        db: &Database,
        job_id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), ScrapePulseError> {
        db.conn().execute(
            "UPDATE scheduled_jobs SET last_run_at = ?, next_run_at = ?, updated_at = ?
             WHERE job_id = ?",
            params![
                sql_time(last_run_at),
                sql_time(next_run_at),
                sql_time(Utc::now()),
                job_id,
            ],
        )?;
        Ok(())
    }

    /// Persist a freshly computed `next_run_at` (registration time).
    pub fn set_next_run_at(
        db: &Database,
        job_id: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), ScrapePulseError> {
        db.conn().execute(
            "UPDATE scheduled_jobs SET next_run_at = ?, updated_at = ? WHERE job_id = ?",
            params![sql_time(next_run_at), sql_time(Utc::now()), job_id],
        )?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let job_type_str: String = row.get(2)?;
        let job_config_str: String = row.get(3)?;
        let urls_str: Option<String> = row.get(5)?;
        let schedule_type_str: String = row.get(7)?;
        let schedule_config_str: String = row.get(8)?;
        let created_at: String = row.get(11)?;
        let updated_at: String = row.get(12)?;
        let last_run_at: Option<String> = row.get(13)?;
        let next_run_at: Option<String> = row.get(14)?;

        Ok(ScheduledJob {
            job_id: row.get(0)?,
            name: row.get(1)?,
            job_type: JobType::parse(&job_type_str).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    2,
                    "job_type".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            job_config: serde_json::from_str(&job_config_str).map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    3,
                    "job_config".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            url: row.get(4)?,
            urls: urls_str
                .map(|s| {
                    serde_json::from_str(&s).map_err(|_| {
                        rusqlite::Error::InvalidColumnType(
                            5,
                            "urls".to_string(),
                            rusqlite::types::Type::Text,
                        )
                    })
                })
                .transpose()?,
            api_endpoint: row.get(6)?,
            schedule_type: ScheduleKind::parse(&schedule_type_str).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    7,
                    "schedule_type".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            schedule_config: serde_json::from_str(&schedule_config_str).map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    8,
                    "schedule_config".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?,
            timezone: row.get(9)?,
            is_active: row.get(10)?,
            created_at: parse_sql_time(11, created_at)?,
            updated_at: parse_sql_time(12, updated_at)?,
            last_run_at: last_run_at.map(|s| parse_sql_time(13, s)).transpose()?,
            next_run_at: next_run_at.map(|s| parse_sql_time(14, s)).transpose()?,
        })
    }
}
