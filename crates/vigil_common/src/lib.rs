//! Vigil Common - operational-safety core for the Vigil host monitor.
//!
//! Three components carry real state and failure discipline:
//! - Change detection over persisted service snapshots
//! - Log retrieval routed by a static source registry
//! - An approval-gated, audited remediation gateway
//!
//! Everything else (HTTP transport, the reasoning service, the network poller)
//! lives outside this crate and talks to it through plain values.

pub mod action_catalog;
pub mod action_gateway;
pub mod audit_log;
pub mod change_detector;
pub mod command_runner;
pub mod error;
pub mod failure_state;
pub mod log_registry;
pub mod log_router;
pub mod snapshots;
pub mod store;

pub use action_catalog::{ActionCatalog, ActionDefinition, ActionType, DenyList};
pub use action_gateway::{ActionGateway, ActionRequest, ExecutionResult, ExecutionState};
pub use audit_log::AuditRecord;
pub use change_detector::{
    ChangeDetector, Classification, DetectionReport, EscalationResult, ObservableServices,
};
pub use command_runner::{CommandRunner, RunOutcome, SystemRunner};
pub use error::{StoreError, StoreResult};
pub use failure_state::FailureState;
pub use log_registry::{LogRegistry, LogSource, LogStrategy};
pub use log_router::{Evidence, LogRouter, RouterSettings};
pub use snapshots::{NewSnapshot, ServiceSnapshot, ServiceStatus, StatusHistory};
pub use store::Store;
