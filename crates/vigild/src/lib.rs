//! Vigil daemon library - configuration, the agent facade and the poll cycle.

pub mod agent;
pub mod config;
pub mod cycle;
pub mod logging;

pub use agent::{Agent, FailureSummary, StoreHealth};
pub use config::Config;
pub use cycle::{build_context, run_cycle, CycleReport};
