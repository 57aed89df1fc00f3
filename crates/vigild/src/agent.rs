//! Agent facade - the surface the transport layer talks to.
//!
//! Wires the store, change detector, log router and action gateway together
//! from immutable configuration. Every operation returns a value; only
//! storage failures come back as errors.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use vigil_common::snapshots::StatusHistory;
use vigil_common::{
    ActionCatalog, ActionGateway, ActionRequest, AuditRecord, ChangeDetector, Classification,
    CommandRunner, DenyList, DetectionReport, Evidence, ExecutionResult, LogRegistry, LogRouter,
    NewSnapshot, ObservableServices, RouterSettings, ServiceStatus, Store, StoreResult,
    SystemRunner,
};

use crate::config::Config;

/// `detect_failures` result: classification per failing observable service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub services: BTreeMap<String, Classification>,
    pub critical: bool,
}

impl From<&DetectionReport> for FailureSummary {
    fn from(report: &DetectionReport) -> Self {
        Self {
            services: report.classifications(),
            critical: report.critical,
        }
    }
}

/// Store health for status endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHealth {
    pub snapshots: u64,
    pub audit_records: u64,
    pub failing_services: usize,
}

pub struct Agent<R = SystemRunner> {
    store: Store,
    detector: ChangeDetector,
    router: LogRouter,
    gateway: ActionGateway<R>,
}

impl Agent<SystemRunner> {
    /// Open the configured database and build every component
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Store::open(&config.daemon.db_path)
            .with_context(|| format!("opening {}", config.daemon.db_path.display()))?;
        let registry = config.log_registry();
        let observable = config.observable_services(&registry);
        info!(
            sources = registry.len(),
            observable = observable.len(),
            "agent configured"
        );
        Ok(Self::with_runner(
            store,
            Arc::new(registry),
            Arc::new(observable),
            config.router_settings(),
            SystemRunner,
        ))
    }
}

impl<R: CommandRunner> Agent<R> {
    pub fn with_runner(
        store: Store,
        registry: Arc<LogRegistry>,
        observable: Arc<ObservableServices>,
        settings: RouterSettings,
        runner: R,
    ) -> Self {
        let detector = ChangeDetector::new(store.clone(), observable);
        let router = LogRouter::new(registry, settings);
        let gateway = ActionGateway::with_runner(
            Arc::new(ActionCatalog::standard()),
            Arc::new(DenyList::standard()),
            store.clone(),
            runner,
        );
        Self {
            store,
            detector,
            router,
            gateway,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn router(&self) -> &LogRouter {
        &self.router
    }

    pub fn gateway(&self) -> &ActionGateway<R> {
        &self.gateway
    }

    /// Ingest one poll's worth of observations
    pub fn record_cycle(&self, snapshots: &[NewSnapshot]) -> StoreResult<usize> {
        self.store.record_cycle(snapshots)
    }

    /// Full detection pass, with payloads
    pub fn detect(&self) -> StoreResult<DetectionReport> {
        self.detector.detect()
    }

    pub fn detect_failures(&self) -> StoreResult<FailureSummary> {
        self.detect().map(|report| FailureSummary::from(&report))
    }

    /// Log text for a service; empty when nothing could be retrieved
    pub async fn fetch_evidence(&self, service: &str) -> String {
        self.fetch_evidence_block(service).await.text
    }

    pub async fn fetch_evidence_block(&self, service: &str) -> Evidence {
        self.router.fetch(service).await
    }

    pub fn suggest_action(&self, action: &str, service: &str) -> ActionRequest {
        self.gateway.suggest(action, service)
    }

    pub async fn execute_action(
        &self,
        action: &str,
        service: &str,
        approved: bool,
    ) -> StoreResult<ExecutionResult> {
        self.gateway.execute(action, service, approved).await
    }

    /// Audit records, newest first
    pub fn get_audit_log(&self, limit: usize) -> StoreResult<Vec<AuditRecord>> {
        self.gateway.audit_log(limit)
    }

    pub fn latest_statuses(&self) -> StoreResult<Vec<ServiceStatus>> {
        self.store.latest_statuses()
    }

    /// Observations of one service over the last `hours`
    pub fn history(&self, service: &str, hours: i64) -> StoreResult<StatusHistory> {
        let since = Utc::now() - ChronoDuration::hours(hours.max(0));
        self.store.history(service, since)
    }

    pub fn health(&self) -> StoreResult<StoreHealth> {
        Ok(StoreHealth {
            snapshots: self.store.snapshot_count()?,
            audit_records: self.store.audit_count()?,
            failing_services: self
                .store
                .failure_states()?
                .iter()
                .filter(|state| state.is_failing())
                .count(),
        })
    }
}
