pub const CREATE_SCHEMA_SQL: &str = r#"
BEGIN TRANSACTION;

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', '1');

-- Scheduled jobs: one row per user-defined schedule
CREATE TABLE IF NOT EXISTS scheduled_jobs (
    job_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    job_type TEXT NOT NULL,            -- 'scrape' | 'crawl' | 'map' | 'batch'
    job_config TEXT NOT NULL,          -- JSON object of operation options
    url TEXT DEFAULT NULL,             -- set for scrape/crawl/map jobs
    urls TEXT DEFAULT NULL,            -- JSON array of strings, set for batch jobs
    api_endpoint TEXT NOT NULL,        -- base URL of the remote scraping service
    schedule_type TEXT NOT NULL,       -- 'interval' | 'hourly' | 'daily' | 'weekly' | 'monthly'
    schedule_config TEXT NOT NULL,     -- JSON object, shape depends on schedule_type
    timezone TEXT NOT NULL DEFAULT 'UTC',  -- IANA zone name
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,          -- RFC 3339, UTC
    updated_at TEXT NOT NULL,          -- RFC 3339, UTC
    last_run_at TEXT DEFAULT NULL,     -- RFC 3339, UTC
    next_run_at TEXT DEFAULT NULL      -- RFC 3339, UTC (advisory; recomputed after every run)
);

CREATE INDEX IF NOT EXISTS idx_jobs_active ON scheduled_jobs (is_active);
CREATE INDEX IF NOT EXISTS idx_jobs_created ON scheduled_jobs (created_at);

-- Job runs: one row per fire (scheduled or manual)
CREATE TABLE IF NOT EXISTS job_runs (
    run_id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    run_type TEXT NOT NULL,            -- 'scheduled' | 'manual'
    status TEXT NOT NULL,              -- 'pending' | 'running' | 'completed' | 'failed'
    started_at TEXT NOT NULL,          -- RFC 3339, UTC
    completed_at TEXT DEFAULT NULL,    -- RFC 3339, UTC; set once on terminal transition
    result_data TEXT DEFAULT NULL,     -- JSON payload returned by the remote
    error_message TEXT DEFAULT NULL,   -- set iff status = 'failed'
    execution_time_ms INTEGER DEFAULT NULL,
    created_at TEXT NOT NULL,          -- RFC 3339, UTC; drives the 30-day cleanup
    FOREIGN KEY (job_id) REFERENCES scheduled_jobs(job_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_runs_job ON job_runs (job_id, started_at);
CREATE INDEX IF NOT EXISTS idx_runs_status ON job_runs (status);
CREATE INDEX IF NOT EXISTS idx_runs_created ON job_runs (created_at);

COMMIT;
"#;
