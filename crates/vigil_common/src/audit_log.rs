//! Action audit log - one row per approved execution attempt.
//!
//! Append-only. Suggestions and rejections never reach this table. The
//! command column holds the exact string handed to the runner, unredacted,
//! so an attempt can be replayed forensically.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::action_catalog::ActionType;
use crate::error::StoreResult;
use crate::store::Store;

/// Default page size for audit queries
pub const DEFAULT_AUDIT_LIMIT: usize = 50;

/// A persisted execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action_type: String,
    pub service: String,
    pub command: String,
    pub approved: bool,
    pub exit_code: i32,
    /// Captured output on success
    pub output: Option<String>,
    /// Error text on failure or timeout
    pub error: Option<String>,
}

/// Fields of a record before it is stored
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub action_type: ActionType,
    pub service: &'a str,
    pub command: &'a str,
    pub approved: bool,
    pub exit_code: i32,
    pub output: Option<&'a str>,
    pub error: Option<&'a str>,
}

impl Store {
    /// Append one record; returns its id
    pub fn append_audit(&self, entry: &AuditEntry<'_>) -> StoreResult<i64> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO action_audit_log
                    (timestamp, action_type, service_name, command, user_approved,
                     exit_code, output, error_message)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    Utc::now(),
                    entry.action_type.as_str(),
                    entry.service,
                    entry.command,
                    entry.approved,
                    entry.exit_code,
                    entry.output,
                    entry.error
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent records, newest first
    pub fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, timestamp, action_type, service_name, command,
                       user_approved, exit_code, output, error_message
                FROM action_audit_log
                ORDER BY id DESC
                LIMIT ?1
                "#,
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(AuditRecord {
                        id: row.get(0)?,
                        timestamp: row.get(1)?,
                        action_type: row.get(2)?,
                        service: row.get(3)?,
                        command: row.get(4)?,
                        approved: row.get(5)?,
                        exit_code: row.get(6)?,
                        output: row.get(7)?,
                        error: row.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn audit_count(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM action_audit_log", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}
