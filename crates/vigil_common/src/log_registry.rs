//! Log source registry - where to look for each monitored service's evidence.
//!
//! Built once at start (from the built-in table or the config file) and shared
//! read-only. Services missing from the registry are handled by the router's
//! unit-log fallback.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::change_detector::ObservableServices;

/// Line budget used when an entry does not set its own
pub const DEFAULT_MAX_LINES: usize = 100;

/// How evidence for a service is retrieved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LogStrategy {
    /// Last N lines of an append-only file
    Tail { path: PathBuf },
    /// Last N lines of the most recently modified file matching a glob
    NewestInDirectory { pattern: String },
    /// Unit log query, system-wide or in the per-user domain
    UnitLog {
        unit: String,
        #[serde(default)]
        user: bool,
    },
    /// Container logs needing elevated privilege; never fetched
    PrivilegedContainer { container: String },
}

impl LogStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            LogStrategy::Tail { .. } => "tail",
            LogStrategy::NewestInDirectory { .. } => "newest_in_directory",
            LogStrategy::UnitLog { .. } => "unit_log",
            LogStrategy::PrivilegedContainer { .. } => "privileged_container",
        }
    }

    /// Whether this source can actually produce log lines
    pub fn is_retrievable(&self) -> bool {
        !matches!(self, LogStrategy::PrivilegedContainer { .. })
    }
}

/// A registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSource {
    #[serde(flatten)]
    pub strategy: LogStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<usize>,
}

impl LogSource {
    pub fn new(strategy: LogStrategy, max_lines: usize) -> Self {
        Self {
            strategy,
            max_lines: Some(max_lines),
        }
    }

    pub fn line_budget(&self, default: usize) -> usize {
        self.max_lines.unwrap_or(default)
    }
}

/// Immutable service -> source map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRegistry {
    sources: BTreeMap<String, LogSource>,
}

impl LogRegistry {
    pub fn from_sources(sources: BTreeMap<String, LogSource>) -> Self {
        Self { sources }
    }

    /// Registry for the reference host: backups, VPN, tailnet, storage and
    /// the docker-hosted media stack.
    pub fn builtin() -> Self {
        fn tail(path: &str, lines: usize) -> LogSource {
            LogSource::new(LogStrategy::Tail { path: PathBuf::from(path) }, lines)
        }
        fn unit(unit: &str, user: bool, lines: usize) -> LogSource {
            LogSource::new(
                LogStrategy::UnitLog {
                    unit: unit.to_string(),
                    user,
                },
                lines,
            )
        }
        fn container(name: &str) -> LogSource {
            LogSource::new(
                LogStrategy::PrivilegedContainer {
                    container: name.to_string(),
                },
                100,
            )
        }

        let entries = [
            (
                "system_backup",
                LogSource::new(
                    LogStrategy::NewestInDirectory {
                        pattern: "/data/tank/backups/sys_restore/backup_log_*.log".to_string(),
                    },
                    150,
                ),
            ),
            ("nordvpn_reconnect", tail("/var/log/nordvpn-reconnect.log", 75)),
            ("nordvpn_connected", tail("/var/log/nordvpn-reconnect.log", 75)),
            ("nordvpn_status", unit("nordvpnd.service", false, 50)),
            ("nordvpnd", unit("nordvpnd.service", false, 50)),
            ("gamma_conn", unit("tailscaled.service", false, 75)),
            ("tailscaled", unit("tailscaled.service", false, 75)),
            ("network_resurrect", tail("/var/log/monit-network-restart.log", 100)),
            ("sanoid_errors", unit("sanoid.service", false, 100)),
            ("zfs_sanoid", unit("sanoid.service", false, 100)),
            ("zfs-zed", unit("zfs-zed.service", false, 100)),
            ("smbd", unit("smbd.service", false, 75)),
            ("syncthing", unit("syncthing.service", true, 75)),
            ("immich_server_running", container("immich-server")),
            ("immich_ml_running", container("immich-machine-learning")),
            ("immich_pg_running", container("immich-postgres")),
            ("immich_redis_running", container("immich-redis")),
            ("jellyfin_running", container("jellyfin")),
            ("miniflux_running", container("miniflux")),
            ("postgres_running", container("postgres")),
        ];

        Self {
            sources: entries
                .into_iter()
                .map(|(name, source)| (name.to_string(), source))
                .collect(),
        }
    }

    pub fn get(&self, service: &str) -> Option<&LogSource> {
        self.sources.get(service)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LogSource)> {
        self.sources.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Services with a retrievable diagnostic source; the default escalation scope
    pub fn observable_services(&self) -> ObservableServices {
        ObservableServices::new(
            self.sources
                .iter()
                .filter(|(_, source)| source.strategy.is_retrievable())
                .map(|(name, _)| name.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_line_budgets() {
        let registry = LogRegistry::builtin();
        assert_eq!(
            registry.get("system_backup").unwrap().line_budget(DEFAULT_MAX_LINES),
            150
        );
        assert_eq!(
            registry.get("nordvpnd").unwrap().line_budget(DEFAULT_MAX_LINES),
            50
        );
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_observable_excludes_privileged_sources() {
        let observable = LogRegistry::builtin().observable_services();
        assert!(observable.contains("system_backup"));
        assert!(observable.contains("syncthing"));
        assert!(!observable.contains("jellyfin_running"));
    }

    #[test]
    fn test_source_deserializes_from_tagged_map() {
        let source: LogSource = serde_json::from_value(serde_json::json!({
            "strategy": "unit_log",
            "unit": "syncthing.service",
            "user": true
        }))
        .unwrap();

        assert_eq!(
            source.strategy,
            LogStrategy::UnitLog {
                unit: "syncthing.service".to_string(),
                user: true
            }
        );
        assert_eq!(source.line_budget(DEFAULT_MAX_LINES), DEFAULT_MAX_LINES);
    }
}
