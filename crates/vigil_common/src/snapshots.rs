//! Snapshot Store - append-only log of poll observations.
//!
//! The external poller writes one row per service per cycle. Change detection
//! and reporting only read. Retention is the daemon's business
//! (`prune_snapshots_older_than`), never the detector's.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::Store;

/// Observation handed to the store by the poller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub service: String,
    /// 0 = healthy; any other value is an opaque failure code
    pub status: i64,
    /// Raw metrics payload as reported by the monitored host
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NewSnapshot {
    pub fn new(service: &str, status: i64, payload: serde_json::Value) -> Self {
        Self {
            service: service.to_string(),
            status,
            payload,
        }
    }
}

/// A persisted observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub id: i64,
    pub service: String,
    pub status: i64,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl ServiceSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.status == 0
    }
}

/// Latest known status of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: i64,
    pub last_checked: DateTime<Utc>,
}

/// One row of a service's status history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub status: i64,
    pub healthy: bool,
}

/// Status history for a service over a window, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistory {
    pub service: String,
    pub total_checks: usize,
    pub failures: usize,
    pub entries: Vec<HistoryEntry>,
}

struct RawSnapshot {
    id: i64,
    timestamp: DateTime<Utc>,
    service: String,
    status: i64,
    raw_json: String,
}

impl RawSnapshot {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            service: row.get(2)?,
            status: row.get(3)?,
            raw_json: row.get(4)?,
        })
    }

    /// The payload is opaque poller data; an unparseable one is kept as a string
    fn decode(self) -> ServiceSnapshot {
        let payload = match serde_json::from_str(&self.raw_json) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(service = %self.service, id = self.id, "unparseable snapshot payload: {}", e);
                serde_json::Value::String(self.raw_json)
            }
        };
        ServiceSnapshot {
            id: self.id,
            service: self.service,
            status: self.status,
            timestamp: self.timestamp,
            payload,
        }
    }
}

impl Store {
    /// Record one poll cycle. All rows share a single timestamp.
    pub fn record_cycle(&self, snapshots: &[NewSnapshot]) -> StoreResult<usize> {
        self.record_cycle_at(Utc::now(), snapshots)
    }

    /// Record one poll cycle observed at `timestamp`
    pub fn record_cycle_at(
        &self,
        timestamp: DateTime<Utc>,
        snapshots: &[NewSnapshot],
    ) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO snapshots (timestamp, service_name, status, raw_json)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for snapshot in snapshots {
                    let raw = serde_json::to_string(&snapshot.payload)?;
                    stmt.execute(params![timestamp, &snapshot.service, snapshot.status, raw])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        debug!(count = snapshots.len(), "recorded poll cycle");
        Ok(snapshots.len())
    }

    /// Most recent snapshot of every service, ordered by service name
    pub fn latest_snapshots(&self) -> StoreResult<Vec<ServiceSnapshot>> {
        let raw = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT s.id, s.timestamp, s.service_name, s.status, s.raw_json
                FROM snapshots s
                JOIN (
                    SELECT service_name, MAX(id) AS max_id
                    FROM snapshots
                    GROUP BY service_name
                ) latest ON s.id = latest.max_id
                ORDER BY s.service_name
                "#,
            )?;
            let rows = stmt
                .query_map([], RawSnapshot::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(raw.into_iter().map(RawSnapshot::decode).collect())
    }

    /// Latest status per service, for status views
    pub fn latest_statuses(&self) -> StoreResult<Vec<ServiceStatus>> {
        Ok(self
            .latest_snapshots()?
            .into_iter()
            .map(|s| ServiceStatus {
                name: s.service,
                status: s.status,
                last_checked: s.timestamp,
            })
            .collect())
    }

    /// Observations of `service` recorded at or after `since`, newest first
    pub fn history(&self, service: &str, since: DateTime<Utc>) -> StoreResult<StatusHistory> {
        let entries = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT timestamp, status FROM snapshots
                 WHERE service_name = ?1 AND timestamp >= ?2
                 ORDER BY id DESC",
            )?;
            let rows = stmt
                .query_map(params![service, since], |row| {
                    let status: i64 = row.get(1)?;
                    Ok(HistoryEntry {
                        timestamp: row.get(0)?,
                        status,
                        healthy: status == 0,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(StatusHistory {
            service: service.to_string(),
            total_checks: entries.len(),
            failures: entries.iter().filter(|e| !e.healthy).count(),
            entries,
        })
    }

    /// Total number of stored snapshots
    pub fn snapshot_count(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Delete snapshots older than `cutoff`. Returns rows removed.
    pub fn prune_snapshots_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let deleted = self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM snapshots WHERE timestamp < ?1", params![cutoff])?)
        })?;

        if deleted > 0 {
            info!(deleted, %cutoff, "pruned old snapshots");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn test_latest_snapshot_per_service() {
        let store = store();
        store
            .record_cycle(&[
                NewSnapshot::new("nginx", 0, json!({"cpu": 1})),
                NewSnapshot::new("sanoid", 1, json!({})),
            ])
            .unwrap();
        store
            .record_cycle(&[NewSnapshot::new("nginx", 32, json!({"cpu": 90}))])
            .unwrap();

        let latest = store.latest_snapshots().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].service, "nginx");
        assert_eq!(latest[0].status, 32);
        assert_eq!(latest[0].payload["cpu"], 90);
        assert_eq!(latest[1].service, "sanoid");
        assert!(!latest[1].is_healthy());
    }

    #[test]
    fn test_latest_uses_insertion_order_on_equal_timestamps() {
        let store = store();
        let ts = Utc::now();
        store
            .record_cycle_at(ts, &[NewSnapshot::new("smbd", 1, json!(null))])
            .unwrap();
        store
            .record_cycle_at(ts, &[NewSnapshot::new("smbd", 0, json!(null))])
            .unwrap();

        let statuses = store.latest_statuses().unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].status, 0);
    }

    #[test]
    fn test_history_window_and_failure_count() {
        let store = store();
        let now = Utc::now();
        store
            .record_cycle_at(now - Duration::days(10), &[NewSnapshot::new("smbd", 1, json!({}))])
            .unwrap();
        store
            .record_cycle_at(now - Duration::hours(2), &[NewSnapshot::new("smbd", 1, json!({}))])
            .unwrap();
        store
            .record_cycle_at(now - Duration::hours(1), &[NewSnapshot::new("smbd", 0, json!({}))])
            .unwrap();

        let history = store.history("smbd", now - Duration::days(7)).unwrap();
        assert_eq!(history.total_checks, 2);
        assert_eq!(history.failures, 1);
        assert!(history.entries[0].healthy);
    }

    #[test]
    fn test_unparseable_payload_is_kept_as_text() {
        let store = store();
        store
            .record_cycle(&[NewSnapshot::new("nginx", 1, json!({"cpu": 5}))])
            .unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO snapshots (timestamp, service_name, status, raw_json)
                     VALUES (?1, 'other', 0, 'not json')",
                    params![Utc::now()],
                )?;
                Ok(())
            })
            .unwrap();

        let latest = store.latest_snapshots().unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].service, "nginx");
        assert_eq!(latest[0].payload["cpu"], 5);
        assert_eq!(latest[1].service, "other");
        assert_eq!(latest[1].payload, json!("not json"));
    }

    #[test]
    fn test_prune_keeps_recent_rows() {
        let store = store();
        let now = Utc::now();
        store
            .record_cycle_at(now - Duration::days(40), &[NewSnapshot::new("a", 0, json!({}))])
            .unwrap();
        store
            .record_cycle_at(now, &[NewSnapshot::new("a", 0, json!({}))])
            .unwrap();

        let removed = store
            .prune_snapshots_older_than(now - Duration::days(30))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.snapshot_count().unwrap(), 1);
    }
}
