//! Change Detector - turns raw snapshots into a de-duplicated escalation signal.
//!
//! Per observable service whose latest snapshot is failing:
//! - no failure row, or the row says healthy -> NEW
//! - row failing with a different code -> CHANGED
//! - row failing with the same code -> ONGOING (suppressed)
//!
//! The failure row is advanced for every observable service on every poll,
//! whatever the classification, so `times_failed` counts failing polls rather
//! than escalations. Services outside the observable set are never evaluated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::StoreResult;
use crate::failure_state::FailureState;
use crate::store::Store;

/// How a failing service compares with its remembered state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    New,
    Changed,
    Ongoing,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::New => "NEW",
            Classification::Changed => "CHANGED",
            Classification::Ongoing => "ONGOING",
        }
    }

    /// NEW and CHANGED escalate; ONGOING does not
    pub fn escalates(&self) -> bool {
        !matches!(self, Classification::Ongoing)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a current status against the remembered state.
/// Returns `None` for a healthy status.
pub fn classify(previous: Option<&FailureState>, status: i64) -> Option<Classification> {
    if status == 0 {
        return None;
    }
    Some(match previous {
        None => Classification::New,
        Some(p) if p.last_status == 0 => Classification::New,
        Some(p) if p.last_status != status => Classification::Changed,
        Some(_) => Classification::Ongoing,
    })
}

/// The set of services eligible for escalation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservableServices(BTreeSet<String>);

impl ObservableServices {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(services.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, service: &str) -> bool {
        self.0.contains(service)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// One failing observable service in a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationResult {
    pub service: String,
    pub status: i64,
    pub payload: serde_json::Value,
    pub classification: Classification,
    /// True for NEW and CHANGED
    pub changed: bool,
}

/// Output of one detection pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionReport {
    /// Every failing observable service, ordered by name
    pub failures: Vec<EscalationResult>,
    /// At least one service classified NEW or CHANGED
    pub critical: bool,
}

impl DetectionReport {
    pub fn classifications(&self) -> BTreeMap<String, Classification> {
        self.failures
            .iter()
            .map(|f| (f.service.clone(), f.classification))
            .collect()
    }

    /// Services forwarded to evidence gathering and analysis
    pub fn escalated(&self) -> impl Iterator<Item = &EscalationResult> {
        self.failures.iter().filter(|f| f.changed)
    }

    pub fn ongoing(&self) -> impl Iterator<Item = &EscalationResult> {
        self.failures.iter().filter(|f| !f.changed)
    }

    pub fn is_all_healthy(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reads latest snapshots and failure memory; sole writer of failure state
pub struct ChangeDetector {
    store: Store,
    observable: Arc<ObservableServices>,
}

impl ChangeDetector {
    pub fn new(store: Store, observable: Arc<ObservableServices>) -> Self {
        Self { store, observable }
    }

    pub fn observable(&self) -> &ObservableServices {
        &self.observable
    }

    /// Run one detection pass
    pub fn detect(&self) -> StoreResult<DetectionReport> {
        self.detect_at(Utc::now())
    }

    /// Run one detection pass, stamping updated rows with `now`
    pub fn detect_at(&self, now: DateTime<Utc>) -> StoreResult<DetectionReport> {
        let mut report = DetectionReport::default();

        for snapshot in self.store.latest_snapshots()? {
            if !self.observable.contains(&snapshot.service) {
                if !snapshot.is_healthy() {
                    debug!(service = %snapshot.service, status = snapshot.status, "failing service outside observable set");
                }
                continue;
            }

            let previous = self.store.failure_state(&snapshot.service)?;
            let classification = classify(previous.as_ref(), snapshot.status);

            let already_counted = previous
                .as_ref()
                .is_some_and(|p| p.last_snapshot_id == snapshot.id);
            if !already_counted && (previous.is_some() || !snapshot.is_healthy()) {
                let next = FailureState::advance(
                    previous.as_ref(),
                    &snapshot.service,
                    snapshot.status,
                    snapshot.id,
                    now,
                );
                self.store.upsert_failure_state(&next)?;
                debug!(
                    service = %next.service,
                    last_status = next.last_status,
                    times_failed = next.times_failed,
                    "failure state advanced"
                );
            }

            if let Some(classification) = classification {
                info!(
                    service = %snapshot.service,
                    status = snapshot.status,
                    classification = %classification,
                    "failing service"
                );
                report.failures.push(EscalationResult {
                    service: snapshot.service,
                    status: snapshot.status,
                    payload: snapshot.payload,
                    classification,
                    changed: classification.escalates(),
                });
            }
        }

        report.critical = report.failures.iter().any(|f| f.changed);
        Ok(report)
    }
}
