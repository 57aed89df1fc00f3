//! Log Retrieval Router - maps a service to bounded diagnostic evidence.
//!
//! Contract: `fetch` never fails. A missing file, an empty result, the unit
//! log's "no entries" marker, a timeout or an unknown service all come back as
//! empty evidence, so one broken source cannot stall a batch.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::log_registry::{LogRegistry, LogStrategy, DEFAULT_MAX_LINES};

/// Marker printed by the unit log when a query matches nothing
pub const NO_ENTRIES_SENTINEL: &str = "-- No entries --";

/// Default per-fetch time bound
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;

/// Router tuning, fixed at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSettings {
    /// Line budget for entries without their own, and for the fallback
    pub default_max_lines: usize,
    pub fetch_timeout: Duration,
    /// Program (plus leading arguments) used for unit log queries
    pub journal_command: Vec<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            default_max_lines: DEFAULT_MAX_LINES,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            journal_command: vec!["journalctl".to_string()],
        }
    }
}

/// Which handler produced a piece of evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Tail,
    NewestInDirectory,
    UnitLog,
    PrivilegedContainer,
    UnitLogFallback,
    /// Nothing matched
    None,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceSource::Tail => "tail",
            EvidenceSource::NewestInDirectory => "newest_in_directory",
            EvidenceSource::UnitLog => "unit_log",
            EvidenceSource::PrivilegedContainer => "privileged_container",
            EvidenceSource::UnitLogFallback => "unit_log_fallback",
            EvidenceSource::None => "none",
        }
    }
}

/// Diagnostic text for one service; empty means "no evidence available"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub service: String,
    pub source: EvidenceSource,
    pub text: String,
}

impl Evidence {
    fn new(service: &str, source: EvidenceSource, text: Option<String>) -> Self {
        match text {
            Some(text) if !text.trim().is_empty() => Self {
                service: service.to_string(),
                source,
                text,
            },
            _ => Self::empty(service),
        }
    }

    pub fn empty(service: &str) -> Self {
        Self {
            service: service.to_string(),
            source: EvidenceSource::None,
            text: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Block suitable for the analysis context
    pub fn render(&self) -> String {
        format!(
            "=== Logs for {} ({}) ===\n{}",
            self.service,
            self.source.as_str(),
            self.text
        )
    }
}

/// Note returned instead of container logs
pub fn privileged_note(container: &str) -> String {
    format!(
        "Container '{}' logs require elevated (docker/sudo) privileges, which this agent deliberately does not hold. Retrieval skipped.",
        container
    )
}

/// Resolved handler for one fetch
#[derive(Debug, PartialEq, Eq)]
enum FetchPlan<'a> {
    Tail { path: &'a Path, lines: usize },
    NewestInDirectory { pattern: &'a str, lines: usize },
    UnitLog { unit: &'a str, user: bool, lines: usize },
    PrivilegedBlocked { container: &'a str },
    Fallback { units: Vec<String>, lines: usize },
}

/// Stateless strategy dispatcher over an immutable registry
#[derive(Clone)]
pub struct LogRouter {
    registry: Arc<LogRegistry>,
    settings: RouterSettings,
}

impl LogRouter {
    pub fn new(registry: Arc<LogRegistry>, settings: RouterSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &LogRegistry {
        &self.registry
    }

    fn plan<'a>(&'a self, service: &str) -> FetchPlan<'a> {
        let Some(source) = self.registry.get(service) else {
            return FetchPlan::Fallback {
                units: fallback_units(service),
                lines: self.settings.default_max_lines,
            };
        };

        let lines = source.line_budget(self.settings.default_max_lines);
        match &source.strategy {
            LogStrategy::Tail { path } => FetchPlan::Tail { path, lines },
            LogStrategy::NewestInDirectory { pattern } => {
                FetchPlan::NewestInDirectory { pattern, lines }
            }
            LogStrategy::UnitLog { unit, user } => FetchPlan::UnitLog {
                unit,
                user: *user,
                lines,
            },
            LogStrategy::PrivilegedContainer { container } => {
                FetchPlan::PrivilegedBlocked { container }
            }
        }
    }

    /// Fetch evidence for one service
    pub async fn fetch(&self, service: &str) -> Evidence {
        let evidence = match self.plan(service) {
            FetchPlan::Tail { path, lines } => {
                let path = path.to_path_buf();
                let text = self.bounded_blocking(move || tail_file(&path, lines)).await;
                Evidence::new(service, EvidenceSource::Tail, text)
            }
            FetchPlan::NewestInDirectory { pattern, lines } => {
                let pattern = pattern.to_string();
                let text = self
                    .bounded_blocking(move || {
                        newest_match(&pattern).and_then(|path| tail_file(&path, lines))
                    })
                    .await;
                Evidence::new(service, EvidenceSource::NewestInDirectory, text)
            }
            FetchPlan::UnitLog { unit, user, lines } => {
                let text = self.query_unit_log(unit, user, lines).await;
                Evidence::new(service, EvidenceSource::UnitLog, text)
            }
            FetchPlan::PrivilegedBlocked { container } => Evidence::new(
                service,
                EvidenceSource::PrivilegedContainer,
                Some(privileged_note(container)),
            ),
            FetchPlan::Fallback { units, lines } => {
                let mut found = Evidence::empty(service);
                for unit in &units {
                    if let Some(text) = self.query_unit_log(unit, false, lines).await {
                        found = Evidence::new(service, EvidenceSource::UnitLogFallback, Some(text));
                        if !found.is_empty() {
                            break;
                        }
                    }
                }
                found
            }
        };

        debug!(
            service,
            source = evidence.source.as_str(),
            lines = evidence.text.lines().count(),
            "evidence fetched"
        );
        evidence
    }

    /// Fetch evidence for several services, one at a time
    pub async fn fetch_all<S: AsRef<str>>(&self, services: &[S]) -> Vec<Evidence> {
        let mut out = Vec::with_capacity(services.len());
        for service in services {
            out.push(self.fetch(service.as_ref()).await);
        }
        out
    }

    async fn bounded_blocking<F>(&self, f: F) -> Option<String>
    where
        F: FnOnce() -> Option<String> + Send + 'static,
    {
        match timeout(self.settings.fetch_timeout, tokio::task::spawn_blocking(f)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!("log read task failed: {}", e);
                None
            }
            Err(_) => {
                warn!(timeout_ms = self.settings.fetch_timeout.as_millis() as u64, "log read timed out");
                None
            }
        }
    }

    async fn query_unit_log(&self, unit: &str, user: bool, lines: usize) -> Option<String> {
        let (program, prefix) = self.settings.journal_command.split_first()?;

        let mut cmd = Command::new(program);
        cmd.args(prefix);
        if user {
            cmd.arg("--user");
        }
        cmd.args(["-u", unit, "-n", &lines.to_string(), "--no-pager"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(self.settings.fetch_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(unit, "unit log query failed to start: {}", e);
                return None;
            }
            Err(_) => {
                warn!(unit, "unit log query timed out");
                return None;
            }
        };

        if !output.status.success() {
            debug!(unit, code = ?output.status.code(), "unit log query exited non-zero");
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.lines().any(|line| line.trim() == NO_ENTRIES_SENTINEL) {
            return None;
        }
        Some(text)
    }
}

/// Unit names tried for a service missing from the registry
fn fallback_units(service: &str) -> Vec<String> {
    let mut units = vec![service.to_string()];
    let hyphenated = service.replace('_', "-");
    if hyphenated != service {
        units.push(hyphenated);
    }
    units
}

/// Bytes read per backwards step when tailing a file
const TAIL_CHUNK_BYTES: u64 = 8 * 1024;

/// Upper bound on bytes held while looking for line breaks
const MAX_TAIL_BYTES: usize = 4 * 1024 * 1024;

/// Last `lines` lines of a file, or `None` if it cannot be read
fn tail_file(path: &Path, lines: usize) -> Option<String> {
    tail_file_chunked(path, lines, TAIL_CHUNK_BYTES).ok()
}

/// Reads backwards from the end until enough line breaks are buffered
fn tail_file_chunked(path: &Path, lines: usize, chunk: u64) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut pos = file.metadata()?.len();
    let mut buf: Vec<u8> = Vec::new();
    let mut breaks = 0usize;

    loop {
        // A trailing newline does not start another line
        let needed = lines + usize::from(buf.last() == Some(&b'\n'));
        if pos == 0 || (!buf.is_empty() && breaks >= needed) || buf.len() >= MAX_TAIL_BYTES {
            break;
        }

        let step = chunk.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut block = vec![0u8; step as usize];
        file.read_exact(&mut block)?;

        breaks += block.iter().filter(|b| **b == b'\n').count();
        block.extend_from_slice(&buf);
        buf = block;
    }

    let content = String::from_utf8_lossy(&buf);
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}

/// Most recently modified regular file matching a glob pattern
fn newest_match(pattern: &str) -> Option<PathBuf> {
    let entries = match glob::glob(pattern) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(pattern, "invalid log pattern: {}", e);
            return None;
        }
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|path| {
            let meta = std::fs::metadata(&path).ok()?;
            if !meta.is_file() {
                return None;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, path))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}
