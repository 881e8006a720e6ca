//! Recurrence rules: schedule kinds, cron derivation, and next-fire computation.
//!
//! The set of recurrence rules is closed - callers never supply raw cron
//! strings. `build_cron_spec` derives a 5-field expression from a validated
//! `ScheduleConfig`, and `CronSpec::next_after` interprets that expression in
//! the job's IANA timezone. The scheduler sleeps on `next_fire_after`, so the
//! dispatcher and the persisted `next_run_at` always agree.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::ScrapePulseError;

/// Schedule kind: interval, hourly, daily, weekly, or monthly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Interval,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl ScheduleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "interval" => Some(Self::Interval),
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

/// Unit for interval-based schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Minutes,
    Hours,
    Days,
}

/// Kind-specific schedule configuration.
///
/// Which fields are required depends on the schedule kind; `build_cron_spec`
/// enforces the shape and rejects anything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Interval schedules: repeat every N units (N >= 1).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<IntervalUnit>,

    /// Daily/weekly/monthly schedules: 'HH:MM' 24-hour time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,

    /// Weekly schedules: days of week, 0..6 with Sunday = 0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<u8>>,

    /// Monthly schedules: day of month, 1..31.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<u8>,
}

/// Derive the 5-field cron expression for a schedule.
///
/// | kind | expression |
/// |---|---|
/// | interval (minutes) | `*/N * * * *` |
/// | interval (hours) | `0 */N * * *` |
/// | interval (days) | `0 0 */N * *` |
/// | hourly | `0 * * * *` |
/// | daily | `MM HH * * *` |
/// | weekly | `MM HH * * d1,d2,...` |
/// | monthly | `MM HH DATE * *` |
pub fn build_cron_spec(
    kind: ScheduleKind,
    config: &ScheduleConfig,
) -> Result<String, ScrapePulseError> {
    match kind {
        ScheduleKind::Interval => {
            let interval = config.interval.ok_or_else(|| {
                ScrapePulseError::ScheduleConfig("interval schedule requires 'interval'".to_string())
            })?;
            let unit = config.unit.ok_or_else(|| {
                ScrapePulseError::ScheduleConfig("interval schedule requires 'unit'".to_string())
            })?;
            if interval < 1 {
                return Err(ScrapePulseError::ScheduleConfig(
                    "'interval' must be at least 1".to_string(),
                ));
            }
            let (max, expr) = match unit {
                IntervalUnit::Minutes => (59, format!("*/{interval} * * * *")),
                IntervalUnit::Hours => (23, format!("0 */{interval} * * *")),
                IntervalUnit::Days => (31, format!("0 0 */{interval} * *")),
            };
            if interval > max {
                return Err(ScrapePulseError::ScheduleConfig(format!(
                    "'interval' must be 1-{max} for unit {unit:?}"
                )));
            }
            Ok(expr)
        }
        ScheduleKind::Hourly => Ok("0 * * * *".to_string()),
        ScheduleKind::Daily => {
            let (hours, minutes) = parse_time_of_day(require_time(config)?)?;
            Ok(format!("{minutes} {hours} * * *"))
        }
        ScheduleKind::Weekly => {
            let (hours, minutes) = parse_time_of_day(require_time(config)?)?;
            let days = config.days.as_ref().ok_or_else(|| {
                ScrapePulseError::ScheduleConfig("weekly schedule requires 'days'".to_string())
            })?;
            if days.is_empty() {
                return Err(ScrapePulseError::ScheduleConfig(
                    "'days' cannot be empty".to_string(),
                ));
            }
            let mut sorted: Vec<u8> = days.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.iter().any(|d| *d > 6) {
                return Err(ScrapePulseError::ScheduleConfig(
                    "'days' entries must be 0-6 (Sunday = 0)".to_string(),
                ));
            }
            let day_list: Vec<String> = sorted.iter().map(|d| d.to_string()).collect();
            Ok(format!("{minutes} {hours} * * {}", day_list.join(",")))
        }
        ScheduleKind::Monthly => {
            let (hours, minutes) = parse_time_of_day(require_time(config)?)?;
            let date = config.date.ok_or_else(|| {
                ScrapePulseError::ScheduleConfig("monthly schedule requires 'date'".to_string())
            })?;
            if !(1..=31).contains(&date) {
                return Err(ScrapePulseError::ScheduleConfig(format!(
                    "'date' must be 1-31, got {date}"
                )));
            }
            Ok(format!("{minutes} {hours} {date} * *"))
        }
    }
}

fn require_time(config: &ScheduleConfig) -> Result<&str, ScrapePulseError> {
    config.time.as_deref().ok_or_else(|| {
        ScrapePulseError::ScheduleConfig("schedule requires 'time' in HH:MM format".to_string())
    })
}

/// Parse 'HH:MM' into (hours, minutes), validating ranges.
fn parse_time_of_day(time: &str) -> Result<(u32, u32), ScrapePulseError> {
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 2 {
        return Err(ScrapePulseError::ScheduleConfig(format!(
            "'time' must be in HH:MM format, got: {time}"
        )));
    }

    let hours: u32 = parts[0].parse().map_err(|_| {
        ScrapePulseError::ScheduleConfig(format!("invalid hours in 'time': {}", parts[0]))
    })?;
    let minutes: u32 = parts[1].parse().map_err(|_| {
        ScrapePulseError::ScheduleConfig(format!("invalid minutes in 'time': {}", parts[1]))
    })?;

    if hours >= 24 {
        return Err(ScrapePulseError::ScheduleConfig(format!(
            "hours must be 0-23, got: {hours}"
        )));
    }
    if minutes >= 60 {
        return Err(ScrapePulseError::ScheduleConfig(format!(
            "minutes must be 0-59, got: {minutes}"
        )));
    }

    Ok((hours, minutes))
}

/// Resolve an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, ScrapePulseError> {
    name.parse::<Tz>()
        .map_err(|_| ScrapePulseError::ScheduleConfig(format!("invalid timezone: {name}")))
}

/// A parsed 5-field cron expression: minute, hour, day-of-month, month,
/// day-of-week (0-6, Sunday = 0).
#[derive(Debug, Clone)]
pub struct CronSpec {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

/// A single cron field. The closed set of schedule kinds only ever produces
/// wildcards, single values, lists, and steps.
#[derive(Debug, Clone)]
enum CronField {
    Any,
    Value(u32),
    List(Vec<u32>),
    Step(u32),
}

impl CronField {
    /// `min` is the field's lower bound; steps match offsets from it.
    fn matches(&self, value: u32, min: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Value(v) => *v == value,
            Self::List(values) => values.contains(&value),
            Self::Step(step) => (value - min) % step == 0,
        }
    }
}

impl CronSpec {
    pub fn parse(expr: &str) -> Result<Self, ScrapePulseError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(ScrapePulseError::ScheduleConfig(format!(
                "cron expression must have 5 fields: {expr}"
            )));
        }

        Ok(Self {
            minute: Self::parse_field(parts[0], 0, 59)?,
            hour: Self::parse_field(parts[1], 0, 23)?,
            day: Self::parse_field(parts[2], 1, 31)?,
            month: Self::parse_field(parts[3], 1, 12)?,
            weekday: Self::parse_field(parts[4], 0, 6)?,
        })
    }

    fn parse_field(field: &str, min: u32, max: u32) -> Result<CronField, ScrapePulseError> {
        if field == "*" {
            return Ok(CronField::Any);
        }

        if let Some(step_str) = field.strip_prefix("*/") {
            let step: u32 = step_str.parse().map_err(|_| {
                ScrapePulseError::ScheduleConfig(format!("invalid step value: {field}"))
            })?;
            if step == 0 || step > max {
                return Err(ScrapePulseError::ScheduleConfig(format!(
                    "step value must be 1-{max}: {field}"
                )));
            }
            return Ok(CronField::Step(step));
        }

        if field.contains(',') {
            let values: Result<Vec<u32>, ScrapePulseError> = field
                .split(',')
                .map(|v| {
                    let num: u32 = v.parse().map_err(|_| {
                        ScrapePulseError::ScheduleConfig(format!("invalid list value: {v}"))
                    })?;
                    if num < min || num > max {
                        return Err(ScrapePulseError::ScheduleConfig(format!(
                            "value must be {min}-{max}: {v}"
                        )));
                    }
                    Ok(num)
                })
                .collect();
            return Ok(CronField::List(values?));
        }

        let value: u32 = field.parse().map_err(|_| {
            ScrapePulseError::ScheduleConfig(format!("invalid numeric value: {field}"))
        })?;
        if value < min || value > max {
            return Err(ScrapePulseError::ScheduleConfig(format!(
                "value must be {min}-{max}: {field}"
            )));
        }
        Ok(CronField::Value(value))
    }

    /// Check the expression against a civil time in the job's zone.
    fn matches_civil(&self, local: &DateTime<Tz>) -> bool {
        self.minute.matches(local.minute(), 0)
            && self.hour.matches(local.hour(), 0)
            && self.day.matches(local.day(), 1)
            && self.month.matches(local.month(), 1)
            && self.weekday.matches(local.weekday().num_days_from_sunday(), 0)
    }

    /// Smallest instant strictly after `after` whose civil time in `tz`
    /// matches the expression, as UTC.
    ///
    /// Scans forward one minute at a time for up to 366 days. Stepping in UTC
    /// and matching in the zone makes DST gaps and nonexistent month days
    /// (monthly date=31 in a 30-day month) fall out naturally: those civil
    /// times simply never appear, so they are skipped rather than clamped.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let mut candidate = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))?
            + Duration::minutes(1);

        for _ in 0..(366 * 24 * 60) {
            if self.matches_civil(&candidate.with_timezone(&tz)) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Compute the next fire instant for a schedule after the reference instant.
///
/// The result is anchored on `after`; the scheduler passes the completion
/// time of the previous run, so a long-running execution shifts the next
/// tick later than the nominal cron instant (drift semantics).
pub fn next_fire_after(
    kind: ScheduleKind,
    config: &ScheduleConfig,
    timezone: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScrapePulseError> {
    let tz = parse_timezone(timezone)?;
    let expr = build_cron_spec(kind, config)?;
    let spec = CronSpec::parse(&expr)?;
    spec.next_after(after, tz).ok_or_else(|| {
        ScrapePulseError::ScheduleConfig(format!("schedule '{expr}' never fires"))
    })
}
