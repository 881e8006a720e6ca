use thiserror::Error;

/// Errors surfaced anywhere in scrapepulse.
///
/// The remote-facing variants (`Remote*`, `LocalTimeout`, `PollTimeout`)
/// describe why a single run failed and are recorded on the run row rather
/// than propagated; the schedule simply retries at its next fire.
#[derive(Error, Debug)]
pub enum ScrapePulseError {
    /// Caller-supplied input failed validation (HTTP 400).
    #[error("{0}")]
    Validation(String),

    /// A referenced row does not exist (HTTP 404).
    #[error("{0} not found")]
    NotFound(String),

    /// schedule_config does not satisfy the shape required by schedule_type.
    #[error("invalid schedule config: {0}")]
    ScheduleConfig(String),

    /// Remote service returned a non-2xx status other than 408/429/5xx.
    #[error("remote error: {0}")]
    Remote(String),

    /// Remote service returned 408.
    #[error("remote timeout: {0}")]
    RemoteTimeout(String),

    /// Remote service returned 429.
    #[error("remote rate limited: {0}")]
    RemoteRateLimited(String),

    /// Remote service returned 5xx.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The local hard timeout elapsed before the remote responded.
    #[error("request timed out after {0}s")]
    LocalTimeout(u64),

    /// The async job never reached a terminal status within the poll budget.
    #[error("job {0} did not complete within the polling budget")]
    PollTimeout(String),

    /// Run was aborted by scheduler shutdown.
    #[error("run interrupted: {0}")]
    Interrupted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Error(String),
}
