use crate::{error::ScrapePulseError, schema::CREATE_SCHEMA_SQL};
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

const DB_FILENAME: &str = "scrapepulse.db";
const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Shared handle to the embedded SQLite database.
///
/// All mutations funnel through a single connection guarded by a mutex;
/// WAL mode keeps readers concurrent with the writer.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_dir: Option<PathBuf>) -> Result<Self, ScrapePulseError> {
        let db_dir = db_dir.ok_or_else(|| {
            ScrapePulseError::Error("Could not determine database directory".to_string())
        })?;

        if !db_dir.is_dir() {
            std::fs::create_dir_all(&db_dir)?;
        }

        let db_path = db_dir.join(DB_FILENAME);

        info!("Opening database: {}", db_path.display());
        let conn = Connection::open(&db_path)?;
        Self::from_connection(conn)
    }

    /// In-memory database for tests.
    #[allow(dead_code)]
    pub fn open_in_memory() -> Result<Self, ScrapePulseError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, ScrapePulseError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Run `f` inside a BEGIN IMMEDIATE transaction, committing on Ok and
    /// rolling back on Err.
    pub fn immediate_transaction<T, F>(&self, f: F) -> Result<T, ScrapePulseError>
    where
        F: FnOnce(&Connection) -> Result<T, ScrapePulseError>,
    {
        let mut guard = self.conn.lock().expect("database mutex poisoned");
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    fn ensure_schema(&self) -> Result<(), ScrapePulseError> {
        let conn = self.conn();

        let table_exists: bool = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='meta'",
                [],
                |row| row.get::<_, i32>(0),
            )
            .map(|count| count > 0)
            .unwrap_or(false);

        if !table_exists {
            info!("Database is uninitialized - creating schema at version {CURRENT_SCHEMA_VERSION}");
            conn.execute_batch(CREATE_SCHEMA_SQL)?;
            info!("Database successfully initialized");
            return Ok(());
        }

        let db_version_str: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_version_str = match db_version_str {
            Some(s) => s,
            None => return Err(ScrapePulseError::Error("Schema version missing".to_string())),
        };

        let db_version: u32 = db_version_str
            .parse()
            .map_err(|_| ScrapePulseError::Error("Schema version mismatch".to_string()))?;

        // Future schema versions upgrade here, one step per version.
        if db_version != CURRENT_SCHEMA_VERSION {
            return Err(ScrapePulseError::Error(
                "No valid database update available".to_string(),
            ));
        }

        Ok(())
    }
}

/// Uniform RFC 3339 rendering for stored instants. A fixed precision keeps
/// lexicographic comparison in SQL equivalent to chronological order.
pub fn sql_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored RFC 3339 instant back out of a row.
pub fn parse_sql_time(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            rusqlite::Error::InvalidColumnType(idx, "timestamp".to_string(), rusqlite::types::Type::Text)
        })
}
