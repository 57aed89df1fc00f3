//! One poll/detect/evidence cycle and the report it produces.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_common::{CommandRunner, DetectionReport, Evidence, StoreResult};

use crate::agent::Agent;

/// Outcome of one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub detection: DetectionReport,
    /// Non-empty evidence for escalated services, in detection order
    pub evidence: Vec<Evidence>,
    /// Analysis context for the reasoning component; empty when nothing escalated
    pub context: String,
    /// Snapshots removed by the retention sweep
    pub pruned: usize,
}

impl CycleReport {
    pub fn critical(&self) -> bool {
        self.detection.critical
    }

    /// One line per failing service, e.g. `NEW backup_job (status 1)`
    pub fn summary_lines(&self) -> Vec<String> {
        self.detection
            .failures
            .iter()
            .map(|f| format!("{} {} (status {})", f.classification, f.service, f.status))
            .collect()
    }
}

/// Status lines for escalated services followed by their evidence blocks
pub fn build_context(detection: &DetectionReport, evidence: &[Evidence]) -> String {
    let mut sections: Vec<String> = Vec::new();

    let status_lines: Vec<String> = detection
        .escalated()
        .map(|f| {
            format!(
                "Service: {} | Status: {} | Changed: {}",
                f.service, f.status, f.changed
            )
        })
        .collect();
    if !status_lines.is_empty() {
        sections.push(status_lines.join("\n"));
    }

    sections.extend(evidence.iter().filter(|e| !e.is_empty()).map(Evidence::render));
    sections.join("\n\n")
}

/// Run detection, gather evidence for escalated services and sweep old snapshots.
///
/// Only storage failures are returned as errors.
pub async fn run_cycle<R: CommandRunner>(
    agent: &Agent<R>,
    retention_days: u32,
) -> StoreResult<CycleReport> {
    let started_at = Utc::now();
    let detection = agent.detect()?;

    for failure in detection.ongoing() {
        debug!(service = %failure.service, status = failure.status, "ongoing failure suppressed");
    }

    let escalated: Vec<&str> = detection.escalated().map(|f| f.service.as_str()).collect();
    let evidence: Vec<Evidence> = agent
        .router()
        .fetch_all(&escalated)
        .await
        .into_iter()
        .filter(|e| !e.is_empty())
        .collect();

    let context = if detection.critical {
        build_context(&detection, &evidence)
    } else {
        String::new()
    };

    let pruned = if retention_days > 0 {
        let cutoff = started_at - ChronoDuration::days(i64::from(retention_days));
        agent.store().prune_snapshots_older_than(cutoff)?
    } else {
        0
    };

    if detection.critical {
        warn!(
            escalated = escalated.len(),
            evidence = evidence.len(),
            "critical cycle"
        );
    } else {
        info!(
            failing = detection.failures.len(),
            pruned, "cycle complete, nothing new"
        );
    }

    Ok(CycleReport {
        started_at,
        detection,
        evidence,
        context,
        pruned,
    })
}
