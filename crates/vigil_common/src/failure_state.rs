//! Failure State Table - last-known classification memory per service.
//!
//! Owned by the change detector, which is the only writer. One row per
//! service, created on the first observed failure and never deleted.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::store::Store;

/// Persisted failure memory for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureState {
    pub service: String,
    pub last_status: i64,
    /// Number of polls in which the service was observed failing
    pub times_failed: u64,
    pub last_checked: DateTime<Utc>,
    /// Snapshot this row last consumed, so one poll is never counted twice
    pub last_snapshot_id: i64,
}

impl FailureState {
    /// State after observing `status` in snapshot `snapshot_id`.
    /// `previous` is the existing row, if any.
    pub fn advance(
        previous: Option<&FailureState>,
        service: &str,
        status: i64,
        snapshot_id: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let prior_failures = previous.map(|p| p.times_failed).unwrap_or(0);
        Self {
            service: service.to_string(),
            last_status: status,
            times_failed: prior_failures + u64::from(status != 0),
            last_checked: now,
            last_snapshot_id: snapshot_id,
        }
    }

    pub fn is_failing(&self) -> bool {
        self.last_status != 0
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            service: row.get(0)?,
            last_status: row.get(1)?,
            times_failed: row.get::<_, i64>(2)? as u64,
            last_checked: row.get(3)?,
            last_snapshot_id: row.get(4)?,
        })
    }
}

impl Store {
    /// Failure state for one service, if it has ever failed
    pub fn failure_state(&self, service: &str) -> StoreResult<Option<FailureState>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT service_name, last_status, times_failed, last_checked, last_snapshot_id
                     FROM failure_state WHERE service_name = ?1",
                    params![service],
                    FailureState::from_row,
                )
                .optional()?)
        })
    }

    /// All failure state rows, ordered by service name
    pub fn failure_states(&self) -> StoreResult<Vec<FailureState>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT service_name, last_status, times_failed, last_checked, last_snapshot_id
                 FROM failure_state ORDER BY service_name",
            )?;
            let rows = stmt
                .query_map([], FailureState::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Insert or replace the row for `state.service`
    pub fn upsert_failure_state(&self, state: &FailureState) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT INTO failure_state
                    (service_name, last_status, times_failed, last_checked, last_snapshot_id)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(service_name) DO UPDATE SET
                    last_status = excluded.last_status,
                    times_failed = excluded.times_failed,
                    last_checked = excluded.last_checked,
                    last_snapshot_id = excluded.last_snapshot_id
                "#,
                params![
                    &state.service,
                    state.last_status,
                    state.times_failed as i64,
                    state.last_checked,
                    state.last_snapshot_id
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_counts_only_failures() {
        let now = Utc::now();
        let first = FailureState::advance(None, "smbd", 1, 1, now);
        assert_eq!(first.times_failed, 1);

        let healthy = FailureState::advance(Some(&first), "smbd", 0, 2, now);
        assert_eq!(healthy.times_failed, 1);
        assert!(!healthy.is_failing());

        let again = FailureState::advance(Some(&healthy), "smbd", 4, 3, now);
        assert_eq!(again.times_failed, 2);
        assert_eq!(again.last_status, 4);
    }

    #[test]
    fn test_upsert_keeps_one_row_per_service() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        let first = FailureState::advance(None, "smbd", 1, 1, now);
        store.upsert_failure_state(&first).unwrap();
        let second = FailureState::advance(Some(&first), "smbd", 1, 2, now);
        store.upsert_failure_state(&second).unwrap();

        let rows = store.failure_states().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].times_failed, 2);
        assert_eq!(rows[0].last_snapshot_id, 2);
        assert_eq!(store.failure_state("missing").unwrap(), None);
    }
}
