//! Action Safety Gateway - approval-gated, audited remediation.
//!
//! Lifecycle of one request:
//!
//! ```text
//! unchecked -> rejected                      (catalog or deny-list)
//!           -> allowed -> needs approval     (approved = false)
//!                      -> running -> completed | timed out | errored
//! ```
//!
//! `suggest` is pure. `execute` re-runs `suggest`, refuses without approval,
//! and otherwise runs the rendered command once with a fixed bound, writing
//! exactly one audit row whatever the outcome. There is no retry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use crate::action_catalog::{ActionCatalog, ActionType, DenyList};
use crate::audit_log::{AuditEntry, AuditRecord};
use crate::command_runner::{CommandRunner, RunOutcome, SystemRunner};
use crate::error::StoreResult;
use crate::store::Store;

/// Wall-clock bound on a remediation command
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit code recorded when no real exit code exists
pub const EXIT_CODE_SENTINEL: i32 = -1;

pub const APPROVAL_REQUIRED: &str = "approval required";

/// Result of a suggestion. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_type: String,
    pub service: String,
    /// Rendered command; absent when the action type is unknown
    pub command: Option<String>,
    pub allowed: bool,
    pub reason: String,
    /// Catalog description of the action, when known
    pub description: Option<String>,
}

/// Terminal state of an `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Rejected,
    NeedsApproval,
    Completed,
    TimedOut,
    Errored,
}

impl ExecutionState {
    /// States that ran a command and therefore wrote an audit row
    pub fn is_audited(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::TimedOut | ExecutionState::Errored
        )
    }
}

/// Outcome of an `execute` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub state: ExecutionState,
    pub exit_code: Option<i32>,
    pub output: Option<String>,
    pub error: Option<String>,
    /// The suggestion this execution was checked against
    pub request: ActionRequest,
    /// Audit row written for this attempt
    pub audit_id: Option<i64>,
}

impl ExecutionResult {
    fn refused(state: ExecutionState, reason: &str, request: ActionRequest) -> Self {
        Self {
            success: false,
            state,
            exit_code: None,
            output: None,
            error: Some(reason.to_string()),
            request,
            audit_id: None,
        }
    }

    /// Human-readable reason for a failed call
    pub fn reason(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Decide whether `action` may run against `service`. No side effects.
pub fn suggest(catalog: &ActionCatalog, deny: &DenyList, action: &str, service: &str) -> ActionRequest {
    let definition = match catalog.lookup(action) {
        Ok(definition) => definition,
        Err(unknown) => {
            return ActionRequest {
                action_type: action.to_string(),
                service: service.to_string(),
                command: None,
                allowed: false,
                reason: unknown.to_string(),
                description: None,
            };
        }
    };

    let command = definition.render(service);
    let (allowed, reason) = match (deny.first_match(&command), malformed_service(service)) {
        (Some(keyword), _) => (
            false,
            format!("Action contains blocked keyword '{}'", keyword),
        ),
        (None, Some(problem)) => (false, format!("Invalid service name: {}", problem)),
        (None, None) => (true, definition.description.to_string()),
    };

    ActionRequest {
        action_type: definition.action_type.as_str().to_string(),
        service: service.to_string(),
        command: Some(command),
        allowed,
        reason,
        description: Some(definition.description.to_string()),
    }
}

/// Commands are split on whitespace, so the service must stay a single
/// non-flag argument
fn malformed_service(service: &str) -> Option<&'static str> {
    if service.is_empty() {
        Some("empty")
    } else if service.chars().any(char::is_whitespace) {
        Some("contains whitespace")
    } else if service.starts_with('-') {
        Some("starts with '-'")
    } else {
        None
    }
}

/// Suggest/execute front door over the catalog, deny-list, runner and audit log
pub struct ActionGateway<R = SystemRunner> {
    catalog: Arc<ActionCatalog>,
    deny: Arc<DenyList>,
    store: Store,
    runner: R,
    timeout: Duration,
    service_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ActionGateway<SystemRunner> {
    pub fn new(catalog: Arc<ActionCatalog>, deny: Arc<DenyList>, store: Store) -> Self {
        Self::with_runner(catalog, deny, store, SystemRunner)
    }
}

impl<R: CommandRunner> ActionGateway<R> {
    pub fn with_runner(
        catalog: Arc<ActionCatalog>,
        deny: Arc<DenyList>,
        store: Store,
        runner: R,
    ) -> Self {
        Self {
            catalog,
            deny,
            store,
            runner,
            timeout: EXECUTION_TIMEOUT,
            service_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Override the execution bound
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn suggest(&self, action: &str, service: &str) -> ActionRequest {
        suggest(&self.catalog, &self.deny, action, service)
    }

    /// Run an action if it is allowed and approved
    pub async fn execute(
        &self,
        action: &str,
        service: &str,
        approved: bool,
    ) -> StoreResult<ExecutionResult> {
        let request = self.suggest(action, service);
        if !request.allowed {
            warn!(action, service, reason = %request.reason, "action rejected");
            let reason = request.reason.clone();
            return Ok(ExecutionResult::refused(ExecutionState::Rejected, &reason, request));
        }

        if !approved {
            info!(action, service, "action awaiting approval");
            return Ok(ExecutionResult::refused(
                ExecutionState::NeedsApproval,
                APPROVAL_REQUIRED,
                request,
            ));
        }

        // Allowed requests always carry a rendered command and a known type
        let (Some(command), Ok(action_type)) =
            (request.command.clone(), request.action_type.parse::<ActionType>())
        else {
            let reason = request.reason.clone();
            return Ok(ExecutionResult::refused(ExecutionState::Rejected, &reason, request));
        };

        let lock = self.service_lock(service);
        let guard = lock.lock().await;

        info!(action, service, command = %command, "executing approved action");
        let outcome = self.runner.run(&command, self.timeout).await;

        let (state, exit_code, output, error) = match outcome {
            RunOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                let combined = format!("{}{}", stdout, stderr);
                if exit_code == 0 {
                    (ExecutionState::Completed, exit_code, Some(combined), None)
                } else {
                    let detail = stderr.trim();
                    let error = if detail.is_empty() {
                        format!("exit code {}", exit_code)
                    } else {
                        format!("exit code {}: {}", exit_code, detail)
                    };
                    (ExecutionState::Completed, exit_code, Some(combined), Some(error))
                }
            }
            RunOutcome::TimedOut => (
                ExecutionState::TimedOut,
                EXIT_CODE_SENTINEL,
                None,
                Some(format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs_f64()
                )),
            ),
            RunOutcome::SpawnFailed(message) => (
                ExecutionState::Errored,
                EXIT_CODE_SENTINEL,
                None,
                Some(format!("Execution error: {}", message)),
            ),
        };

        let audited = self.store.append_audit(&AuditEntry {
            action_type,
            service,
            command: &command,
            approved,
            exit_code,
            // Success keeps the combined output, failure keeps the error text
            output: if error.is_none() { output.as_deref() } else { None },
            error: error.as_deref(),
        });
        drop(guard);
        self.release_service_lock(service, lock);
        let audit_id = audited?;

        let success = state == ExecutionState::Completed && exit_code == 0;
        if success {
            info!(action, service, audit_id, "action completed");
        } else {
            warn!(action, service, exit_code, audit_id, state = ?state, "action failed");
        }

        Ok(ExecutionResult {
            success,
            state,
            exit_code: Some(exit_code),
            output,
            error,
            request,
            audit_id: Some(audit_id),
        })
    }

    /// Recent audit records, newest first
    pub fn audit_log(&self, limit: usize) -> StoreResult<Vec<AuditRecord>> {
        self.store.recent_audit(limit)
    }

    fn service_lock(&self, service: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .service_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once no other execution holds or awaits it
    fn release_service_lock(&self, service: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self
            .service_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(service);
        }
    }

    #[cfg(test)]
    fn tracked_services(&self) -> usize {
        self.service_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runner returning a scripted outcome and recording what it was asked to run
    struct ScriptedRunner {
        outcome: RunOutcome,
        calls: Arc<Mutex<Vec<String>>>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl ScriptedRunner {
        fn new(outcome: RunOutcome) -> Self {
            Self {
                outcome,
                calls: Arc::new(Mutex::new(Vec::new())),
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &str, _limit: Duration) -> RunOutcome {
            self.calls.lock().unwrap().push(command.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn completed(exit_code: i32, stdout: &str, stderr: &str) -> RunOutcome {
        RunOutcome::Completed {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn gateway(outcome: RunOutcome) -> (Store, ActionGateway<ScriptedRunner>) {
        let store = Store::open_in_memory().unwrap();
        let gateway = ActionGateway::with_runner(
            Arc::new(ActionCatalog::standard()),
            Arc::new(DenyList::standard()),
            store.clone(),
            ScriptedRunner::new(outcome),
        );
        (store, gateway)
    }

    #[test]
    fn test_suggest_allowed() {
        let (_, gateway) = gateway(completed(0, "", ""));
        let request = gateway.suggest("systemctl_restart", "nginx");
        assert!(request.allowed);
        assert_eq!(request.command.as_deref(), Some("systemctl restart nginx"));
        assert_eq!(
            request.description.as_deref(),
            Some("Restart the service to recover from transient failures")
        );
    }

    #[test]
    fn test_suggest_unknown_action() {
        let (_, gateway) = gateway(completed(0, "", ""));
        let request = gateway.suggest("wipe_disk", "nginx");
        assert!(!request.allowed);
        assert!(request.command.is_none());
        assert_eq!(request.reason, "Unknown action type: wipe_disk");
    }

    #[test]
    fn test_suggest_rejects_smuggled_keyword() {
        let (_, gateway) = gateway(completed(0, "", ""));
        let request = gateway.suggest("systemctl_restart", "x; rm -rf /");
        assert!(!request.allowed);
        assert_eq!(request.command.as_deref(), Some("systemctl restart x; rm -rf /"));
        assert!(request.reason.contains("rm"));
    }

    #[test]
    fn test_suggest_rejects_extra_arguments() {
        let (_, gateway) = gateway(completed(0, "", ""));

        let request = gateway.suggest("systemctl_stop", "nginx sshd");
        assert!(!request.allowed);
        assert_eq!(request.reason, "Invalid service name: contains whitespace");

        let request = gateway.suggest("journalctl_view", "x\t--file");
        assert!(!request.allowed);
        assert_eq!(request.reason, "Invalid service name: contains whitespace");
    }

    #[test]
    fn test_suggest_rejects_flag_and_empty_service() {
        let (_, gateway) = gateway(completed(0, "", ""));

        let request = gateway.suggest("journalctl_view", "--file=/var/log/secure");
        assert!(!request.allowed);
        assert_eq!(request.reason, "Invalid service name: starts with '-'");

        assert!(!gateway.suggest("systemctl_restart", "").allowed);
        assert!(gateway.suggest("systemctl_restart", "nginx-proxy").allowed);
    }

    #[tokio::test]
    async fn test_extra_arguments_never_run() {
        let (store, gateway) = gateway(completed(0, "", ""));
        let result = gateway
            .execute("systemctl_stop", "nginx sshd", true)
            .await
            .unwrap();

        assert_eq!(result.state, ExecutionState::Rejected);
        assert_eq!(store.audit_count().unwrap(), 0);
        assert!(gateway.runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_suggest_is_deterministic() {
        let (_, gateway) = gateway(completed(0, "", ""));
        for (action, service) in [
            ("monit_monitor", "smbd"),
            ("systemctl_stop", "/etc/passwd"),
            ("nope", "smbd"),
        ] {
            assert_eq!(gateway.suggest(action, service), gateway.suggest(action, service));
        }
    }

    #[tokio::test]
    async fn test_rejected_execution_writes_no_audit() {
        let (store, gateway) = gateway(completed(0, "", ""));
        let result = gateway.execute("systemctl_stop", "db; reboot", true).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.state, ExecutionState::Rejected);
        assert!(result.audit_id.is_none());
        assert_eq!(store.audit_count().unwrap(), 0);
        assert!(gateway.runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unapproved_execution_writes_no_audit() {
        let (store, gateway) = gateway(completed(0, "", ""));
        let result = gateway.execute("systemctl_restart", "nginx", false).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.state, ExecutionState::NeedsApproval);
        assert_eq!(result.reason(), Some(APPROVAL_REQUIRED));
        assert_eq!(result.request.command.as_deref(), Some("systemctl restart nginx"));
        assert_eq!(store.audit_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_approved_success_is_audited_once() {
        let (store, gateway) = gateway(completed(0, "restarted\n", ""));
        let result = gateway.execute("systemctl_restart", "nginx", true).await.unwrap();

        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(
            gateway.runner.calls.lock().unwrap().as_slice(),
            ["systemctl restart nginx"]
        );

        let records = store.recent_audit(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "systemctl restart nginx");
        assert_eq!(records[0].output.as_deref(), Some("restarted\n"));
        assert!(records[0].error.is_none());
        assert_eq!(Some(records[0].id), result.audit_id);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure_with_error_text() {
        let (store, gateway) = gateway(completed(5, "", "Unit nginx.service not found."));
        let result = gateway.execute("systemctl_start", "nginx", true).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.state, ExecutionState::Completed);
        assert_eq!(result.exit_code, Some(5));

        let record = &store.recent_audit(1).unwrap()[0];
        assert_eq!(record.exit_code, 5);
        assert!(record.error.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_timeout_recorded_with_sentinel() {
        let (store, gateway) = gateway(RunOutcome::TimedOut);
        let result = gateway.execute("monit_start", "smbd", true).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.state, ExecutionState::TimedOut);
        assert_eq!(result.exit_code, Some(EXIT_CODE_SENTINEL));

        let record = &store.recent_audit(1).unwrap()[0];
        assert_eq!(record.exit_code, -1);
        assert!(record.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_spawn_failure_recorded_with_sentinel() {
        let (store, gateway) = gateway(RunOutcome::SpawnFailed("No such file or directory".into()));
        let result = gateway.execute("journalctl_view", "smbd", true).await.unwrap();

        assert_eq!(result.state, ExecutionState::Errored);
        let record = &store.recent_audit(1).unwrap()[0];
        assert_eq!(record.exit_code, EXIT_CODE_SENTINEL);
        assert!(record.error.as_deref().unwrap().contains("No such file"));
    }

    #[tokio::test]
    async fn test_same_service_runs_are_serialized() {
        let (store, gateway) = gateway(completed(0, "", ""));
        let gateway = Arc::new(gateway);

        let a = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.execute("systemctl_restart", "nginx", true).await })
        };
        let b = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.execute("systemctl_restart", "nginx", true).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(gateway.runner.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(store.audit_count().unwrap(), 2);
        assert_eq!(gateway.tracked_services(), 0);
    }

    #[tokio::test]
    async fn test_service_locks_released_after_run() {
        let (_, gateway) = gateway(completed(0, "", ""));
        for service in ["nginx", "smbd", "sshd"] {
            gateway.execute("systemctl_status", service, true).await.unwrap();
        }
        gateway.execute("monit_start", "smbd", false).await.unwrap();

        assert_eq!(gateway.tracked_services(), 0);
    }

    #[tokio::test]
    async fn test_real_runner_timeout_does_not_hang() {
        // Whether or not systemctl exists here, the attempt ends and is audited
        let store = Store::open_in_memory().unwrap();
        let gateway = ActionGateway::new(
            Arc::new(ActionCatalog::standard()),
            Arc::new(DenyList::standard()),
            store.clone(),
        )
        .with_timeout(Duration::from_secs(2));

        let started = std::time::Instant::now();
        let result = gateway.execute("systemctl_status", "vigil-test-unit", true).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(result.state.is_audited());
        assert_eq!(store.audit_count().unwrap(), 1);
    }
}
