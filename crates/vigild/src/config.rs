//! Configuration management for vigild.
//!
//! Loads settings from /etc/vigil/config.toml, then /var/lib/vigil/config.toml,
//! or uses defaults. Everything here is turned into immutable core structures
//! once at start.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use vigil_common::log_registry::DEFAULT_MAX_LINES;
use vigil_common::log_router::DEFAULT_FETCH_TIMEOUT_SECS;
use vigil_common::store::DEFAULT_DB_PATH;
use vigil_common::{LogRegistry, LogSource, ObservableServices, RouterSettings};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/vigil/config.toml";

/// Fallback config file path
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/vigil/config.toml";

/// Daemon loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// SQLite database holding snapshots, failure state and the audit log
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Seconds between poll/detect cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Snapshots older than this are swept after each cycle (0 keeps everything)
    #[serde(default = "default_retention_days")]
    pub snapshot_retention_days: u32,

    /// Log filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_poll_interval() -> u64 {
    300
}

fn default_retention_days() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            poll_interval_secs: default_poll_interval(),
            snapshot_retention_days: default_retention_days(),
            log_level: default_log_level(),
        }
    }
}

/// Log retrieval settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_max_lines")]
    pub default_max_lines: usize,

    /// Per-fetch bound in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Program (plus leading arguments) used for unit-log queries
    #[serde(default = "default_journal_command")]
    pub journal_command: Vec<String>,

    /// Service -> source entries; the built-in registry is used when absent
    #[serde(default)]
    pub sources: Option<BTreeMap<String, LogSource>>,
}

fn default_max_lines() -> usize {
    DEFAULT_MAX_LINES
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_journal_command() -> Vec<String> {
    vec!["journalctl".to_string()]
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            default_max_lines: default_max_lines(),
            fetch_timeout_secs: default_fetch_timeout(),
            journal_command: default_journal_command(),
            sources: None,
        }
    }
}

/// Escalation scope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Explicit allow-list; derived from the log registry when absent
    #[serde(default)]
    pub observable_services: Option<Vec<String>>,
}

/// vigild configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub logs: LogsConfig,

    #[serde(default)]
    pub escalation: EscalationConfig,
}

impl Config {
    /// Load config from the standard locations, falling back to defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load config from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Build the log source registry
    pub fn log_registry(&self) -> LogRegistry {
        match &self.logs.sources {
            Some(sources) => LogRegistry::from_sources(sources.clone()),
            None => LogRegistry::builtin(),
        }
    }

    /// Build the escalation allow-list against an already-built registry
    pub fn observable_services(&self, registry: &LogRegistry) -> ObservableServices {
        match &self.escalation.observable_services {
            Some(services) => ObservableServices::new(services.iter().cloned()),
            None => registry.observable_services(),
        }
    }

    pub fn router_settings(&self) -> RouterSettings {
        let journal_command = if self.logs.journal_command.is_empty() {
            default_journal_command()
        } else {
            self.logs.journal_command.clone()
        };
        RouterSettings {
            default_max_lines: self.logs.default_max_lines,
            fetch_timeout: Duration::from_secs(self.logs.fetch_timeout_secs),
            journal_command,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.poll_interval_secs.max(1))
    }
}
