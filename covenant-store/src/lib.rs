//! SQLite persistence for the Covenant Protocol governance core.
//!
//! One store implements the persistence seams the domain crates
//! define: [`auditor::AuditStore`], [`governance::ProposalStore`], and
//! [`governance::TaskStore`], plus catalog snapshot persistence.
//! Multi-step writes run inside a single transaction; the task-start
//! conditional commit performs its invariant checks in the same
//! transaction that flips the task to `executing`.

pub mod audit;
pub mod catalog_store;
pub mod governance_store;
pub mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

/// Error types for the relational store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored data failed to deserialize
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// SQLite-backed store for the governance core.
///
/// Cheap to clone; clones share one connection guarded by a mutex, so
/// every multi-statement operation is serialized and transactional.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (and migrate) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// Open an in-memory store, for tests and canary rehearsals.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![schema::SCHEMA_VERSION, Utc::now().to_rfc3339()],
        )?;

        info!(version = schema::SCHEMA_VERSION, "Store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store mutex poisoned")
    }
}

/// Render a timestamp for storage.
pub(crate) fn ts(time: DateTime<Utc>) -> String {
    time.to_rfc3339()
}

/// Render an optional timestamp for storage.
pub(crate) fn ts_opt(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(ts)
}

/// Parse a stored timestamp.
pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

/// Parse an optional stored timestamp.
pub(crate) fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(&r)).transpose()
}
