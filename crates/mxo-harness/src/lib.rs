#![forbid(unsafe_code)]

pub mod compare;
pub mod scenario;

pub use compare::{CompareError, ComparisonResult, DEFAULT_TOLERANCE, MismatchLocation, compare};
pub use scenario::{
    RunRequest, RunnerError, Scenario, ScenarioError, ScenarioExecution, ScenarioOrchestrator,
    ScenarioOutcome, ScenarioReport, ScenarioState, TestRunner, actual_name, expected_name,
    input_name, standard_scenarios,
};

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_RUNNER_TIMEOUT: Duration = Duration::from_secs(30);

/// Explicit harness configuration, passed to the orchestrator at
/// construction. There is no process-global registry; two orchestrators
/// with different configs can coexist in one process.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub fixture_root: PathBuf,
    pub tolerance: f64,
    pub runner_timeout: Duration,
    pub log_path: Option<PathBuf>,
}

impl OracleConfig {
    #[must_use]
    pub fn new(fixture_root: impl Into<PathBuf>) -> Self {
        Self {
            fixture_root: fixture_root.into(),
            tolerance: DEFAULT_TOLERANCE,
            runner_timeout: DEFAULT_RUNNER_TIMEOUT,
            log_path: None,
        }
    }

    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    #[must_use]
    pub fn with_runner_timeout(mut self, timeout: Duration) -> Self {
        self.runner_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }
}

/// One structured log line per orchestration event, appended as JSONL.
#[derive(Debug, Clone, Serialize)]
pub struct RunLogEntry {
    pub ts_unix_ms: u128,
    pub scenario: String,
    pub namespace: String,
    pub stage: &'static str,
    pub fixture: Option<String>,
    pub seed: Option<u64>,
    pub input_digest: Option<String>,
    pub outcome: &'static str,
    pub reason_code: &'static str,
    pub detail: String,
}

#[must_use]
pub fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

/// Appends one JSON line to the configured log path. A `None` path
/// disables logging; an append failure is surfaced, never swallowed.
pub fn append_run_log(config: &OracleConfig, entry: &RunLogEntry) -> Result<(), String> {
    let Some(path) = config.log_path.as_ref() else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| format!("failed opening {}: {err}", path.display()))?;
    let line = serde_json::to_string(entry)
        .map_err(|err| format!("failed serializing run log entry: {err}"))?;
    let mut payload = line.into_bytes();
    payload.push(b'\n');
    file.write_all(&payload)
        .map_err(|err| format!("failed appending run log {}: {err}", path.display()))
}
