//! Action catalog and deny-list.
//!
//! The catalog is the ONLY set of remediation commands the agent can run.
//! Each entry is one template with a single `{service}` slot; nothing but the
//! target service name ever contributes to command text.
//!
//! The deny-list is a second, independent gate: the rendered command is
//! scanned case-insensitively for blocked substrings, which catches a service
//! name crafted to smuggle a dangerous token into an otherwise whitelisted
//! template.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Substitution slot in command templates
pub const SERVICE_SLOT: &str = "{service}";

/// Symbolic remediation intents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SystemctlRestart,
    SystemctlStop,
    SystemctlStart,
    SystemctlStatus,
    MonitMonitor,
    MonitStart,
    MonitStop,
    JournalctlView,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::SystemctlRestart,
        ActionType::SystemctlStop,
        ActionType::SystemctlStart,
        ActionType::SystemctlStatus,
        ActionType::MonitMonitor,
        ActionType::MonitStart,
        ActionType::MonitStop,
        ActionType::JournalctlView,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SystemctlRestart => "systemctl_restart",
            ActionType::SystemctlStop => "systemctl_stop",
            ActionType::SystemctlStart => "systemctl_start",
            ActionType::SystemctlStatus => "systemctl_status",
            ActionType::MonitMonitor => "monit_monitor",
            ActionType::MonitStart => "monit_start",
            ActionType::MonitStop => "monit_stop",
            ActionType::JournalctlView => "journalctl_view",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returned when a name is not in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

impl std::fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown action type: {}", self.0)
    }
}

impl FromStr for ActionType {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDefinition {
    pub action_type: ActionType,
    pub template: &'static str,
    pub description: &'static str,
}

impl ActionDefinition {
    /// Substitute the service name verbatim into the template
    pub fn render(&self, service: &str) -> String {
        self.template.replacen(SERVICE_SLOT, service, 1)
    }
}

/// Fixed remediation catalog
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    entries: BTreeMap<ActionType, ActionDefinition>,
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl ActionCatalog {
    pub fn standard() -> Self {
        let table = [
            (
                ActionType::SystemctlRestart,
                "systemctl restart {service}",
                "Restart the service to recover from transient failures",
            ),
            (
                ActionType::SystemctlStop,
                "systemctl stop {service}",
                "Stop the service to prevent cascading failures",
            ),
            (
                ActionType::SystemctlStart,
                "systemctl start {service}",
                "Start the service to bring it online",
            ),
            (
                ActionType::SystemctlStatus,
                "systemctl status {service}",
                "Get detailed systemd status information",
            ),
            (
                ActionType::MonitMonitor,
                "sudo monit monitor {service}",
                "Force Monit to re-check the service immediately",
            ),
            (
                ActionType::MonitStart,
                "sudo monit start {service}",
                "Tell Monit to bring the service online",
            ),
            (
                ActionType::MonitStop,
                "sudo monit stop {service}",
                "Tell Monit to stop monitoring the service",
            ),
            (
                ActionType::JournalctlView,
                "journalctl -u {service} -n 50",
                "View recent systemd journal logs for the service",
            ),
        ];

        Self {
            entries: table
                .into_iter()
                .map(|(action_type, template, description)| {
                    (
                        action_type,
                        ActionDefinition {
                            action_type,
                            template,
                            description,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn get(&self, action_type: ActionType) -> Option<&ActionDefinition> {
        self.entries.get(&action_type)
    }

    /// Look up by symbolic name
    pub fn lookup(&self, name: &str) -> Result<&ActionDefinition, UnknownAction> {
        let action_type = ActionType::from_str(name)?;
        self.get(action_type)
            .ok_or_else(|| UnknownAction(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionDefinition> {
        self.entries.values()
    }
}

/// Substrings that must never appear in a command
#[derive(Debug, Clone)]
pub struct DenyList {
    keywords: Vec<&'static str>,
}

impl Default for DenyList {
    fn default() -> Self {
        Self::standard()
    }
}

impl DenyList {
    pub fn standard() -> Self {
        Self {
            keywords: vec![
                // Destructive filesystem operations
                "rm", "truncate",
                // Process termination and power state
                "kill", "reboot", "shutdown", "halt",
                // Disk formatting and overwrite
                "mkfs", "dd",
                // Sensitive paths
                "/etc/", "/root/",
                // Package managers
                "apt", "pip", "npm",
                // Network interface reconfiguration
                "ifconfig", "ip route",
                // Account management
                "passwd", "useradd", "userdel",
            ],
        }
    }

    /// First blocked keyword found in `command`, if any
    pub fn first_match(&self, command: &str) -> Option<&'static str> {
        let lower = command.to_lowercase();
        self.keywords
            .iter()
            .copied()
            .find(|keyword| lower.contains(keyword))
    }

    pub fn is_blocked(&self, command: &str) -> bool {
        self.first_match(command).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_templates_verbatim() {
        let catalog = ActionCatalog::standard();
        let rendered: Vec<String> = catalog.iter().map(|d| d.render("nginx")).collect();
        assert_eq!(
            rendered,
            vec![
                "systemctl restart nginx",
                "systemctl stop nginx",
                "systemctl start nginx",
                "systemctl status nginx",
                "sudo monit monitor nginx",
                "sudo monit start nginx",
                "sudo monit stop nginx",
                "journalctl -u nginx -n 50",
            ]
        );
    }

    #[test]
    fn test_lookup_by_name() {
        let catalog = ActionCatalog::standard();
        assert_eq!(
            catalog.lookup("monit_monitor").unwrap().action_type,
            ActionType::MonitMonitor
        );
        let err = catalog.lookup("format_disk").unwrap_err();
        assert_eq!(err.to_string(), "Unknown action type: format_disk");
    }

    #[test]
    fn test_round_trip_names() {
        for action in ActionType::ALL {
            assert_eq!(action.as_str().parse::<ActionType>().unwrap(), action);
        }
    }

    #[test]
    fn test_deny_list_is_case_insensitive() {
        let deny = DenyList::standard();
        assert_eq!(deny.first_match("systemctl restart X; RM -RF /"), Some("rm"));
        assert_eq!(deny.first_match("cat /ETC/shadow"), Some("/etc/"));
        assert!(deny.is_blocked("ip route del default"));
        assert!(!deny.is_blocked("systemctl restart nginx"));
    }

    #[test]
    fn test_catalog_templates_pass_deny_list() {
        let deny = DenyList::standard();
        for definition in ActionCatalog::standard().iter() {
            assert!(
                !deny.is_blocked(definition.template),
                "template {} is self-blocking",
                definition.template
            );
        }
    }
}
