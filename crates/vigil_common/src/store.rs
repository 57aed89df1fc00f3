//! SQLite store shared by the snapshot log, failure state and audit log.
//!
//! Schema:
//! - snapshots: append-only, one row per service per poll
//! - failure_state: one row per service, upserted by change detection
//! - action_audit_log: append-only, one row per approved execution

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Default database location
pub const DEFAULT_DB_PATH: &str = "/var/lib/vigil/vigil.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    service_name TEXT NOT NULL,
    status INTEGER NOT NULL,
    raw_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_service ON snapshots(service_name, id);
CREATE INDEX IF NOT EXISTS idx_snapshots_timestamp ON snapshots(timestamp);

CREATE TABLE IF NOT EXISTS failure_state (
    service_name TEXT PRIMARY KEY,
    last_status INTEGER NOT NULL,
    times_failed INTEGER NOT NULL DEFAULT 0,
    last_checked TEXT NOT NULL,
    last_snapshot_id INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS action_audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    action_type TEXT NOT NULL,
    service_name TEXT NOT NULL,
    command TEXT NOT NULL,
    user_approved INTEGER NOT NULL,
    exit_code INTEGER NOT NULL,
    output TEXT,
    error_message TEXT
);
"#;

/// Handle to the persisted state. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // A missing directory surfaces as the open error below.
                let _ = std::fs::create_dir_all(parent);
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        debug!(path = %path.display(), "opened state database");
        Self::init(conn)
    }

    /// In-memory database, used by tests and dry runs
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }
}
