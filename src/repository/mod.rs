//! Repository layer for database persistence.
//!
//! SQLite via rusqlite; each repository owns its table definitions and the
//! `DbContext` is the entry point that hands them out.

pub mod automation;
pub mod proposal;
pub mod record;
pub mod run_log;

pub use automation::AutomationRepository;
pub use proposal::ProposalRepository;
pub use record::RecordRepository;
pub use run_log::{CompletionPolicy, RunLogRepository};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

/// Errors surfaced by the repository layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("run log {0} already finalized")]
    AlreadyFinalized(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Open a connection with the pragmas every repository relies on.
pub(crate) fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA foreign_keys = ON;",
    )?;
    Ok(conn)
}

/// True when an insert failed only because a uniqueness constraint held.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Database context providing repository access.
#[derive(Debug, Clone)]
pub struct DbContext {
    db_path: PathBuf,
}

impl DbContext {
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Create all tables and indexes.
    pub fn init_schema(&self) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute_batch(AutomationRepository::SCHEMA)?;
        conn.execute_batch(RunLogRepository::SCHEMA)?;
        conn.execute_batch(ProposalRepository::SCHEMA)?;
        conn.execute_batch(RecordRepository::SCHEMA)?;
        Ok(())
    }

    pub fn automations(&self) -> AutomationRepository {
        AutomationRepository::new(&self.db_path)
    }

    pub fn run_logs(&self) -> RunLogRepository {
        RunLogRepository::new(&self.db_path)
    }

    pub fn proposals(&self) -> ProposalRepository {
        ProposalRepository::new(&self.db_path)
    }

    pub fn records(&self) -> RecordRepository {
        RecordRepository::new(&self.db_path)
    }
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
