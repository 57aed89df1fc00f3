//! Process execution for approved remediation commands.
//!
//! The rendered command string is split on whitespace and spawned directly,
//! without a shell, so metacharacters in a service name are inert arguments.
//! Every run is bounded by a wall-clock timeout; the child is killed when the
//! bound expires.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Maximum output captured per stream
pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// How a single run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Process exited within the bound
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// Bound expired; the process was killed
    TimedOut,
    /// The process could not be started
    SpawnFailed(String),
}

/// Seam between the gateway and the host
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str, limit: Duration) -> impl Future<Output = RunOutcome> + Send;
}

/// Runs commands on the local host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    async fn run(&self, command: &str, limit: Duration) -> RunOutcome {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return RunOutcome::SpawnFailed("empty command".to_string());
        };

        let mut cmd = Command::new(program);
        cmd.args(parts)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => RunOutcome::Completed {
                // Killed by a signal: no code
                exit_code: output.status.code().unwrap_or(-1),
                stdout: truncate_output(&output.stdout),
                stderr: truncate_output(&output.stderr),
            },
            Ok(Err(e)) => RunOutcome::SpawnFailed(e.to_string()),
            Err(_) => RunOutcome::TimedOut,
        }
    }
}

/// Lossy UTF-8 decode, capped at `MAX_OUTPUT_BYTES`
pub fn truncate_output(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut text = String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).into_owned();
    text.push_str("\n... [output truncated]");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_successful_command() {
        let outcome = SystemRunner.run("echo hello vigil", Duration::from_secs(5)).await;
        match outcome {
            RunOutcome::Completed { exit_code, stdout, .. } => {
                assert_eq!(exit_code, 0);
                assert_eq!(stdout.trim(), "hello vigil");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let outcome = SystemRunner.run("false", Duration::from_secs(5)).await;
        assert!(matches!(outcome, RunOutcome::Completed { exit_code: 1, .. }));
    }

    #[tokio::test]
    async fn test_shell_metacharacters_are_plain_arguments() {
        let outcome = SystemRunner
            .run("echo nginx;true $(id)", Duration::from_secs(5))
            .await;
        match outcome {
            RunOutcome::Completed { stdout, .. } => assert_eq!(stdout.trim(), "nginx;true $(id)"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_and_returns() {
        let started = Instant::now();
        let outcome = SystemRunner.run("sleep 10", Duration::from_millis(200)).await;
        assert_eq!(outcome, RunOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let outcome = SystemRunner
            .run("vigil-definitely-not-a-binary --flag", Duration::from_secs(5))
            .await;
        assert!(matches!(outcome, RunOutcome::SpawnFailed(_)));
    }

    #[test]
    fn test_truncate_output() {
        let big = vec![b'a'; MAX_OUTPUT_BYTES + 10];
        let text = truncate_output(&big);
        assert!(text.ends_with("[output truncated]"));
        assert_eq!(truncate_output(b"short"), "short");
    }
}
