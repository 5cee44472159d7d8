use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

use crate::config::{Breakpoint, Config, Credentials};
use crate::evidence::ScreenshotRef;
use crate::governor::FailFastGovernor;

/// Error attached to phases skipped after a critical failure under fail-fast
pub const SKIPPED_DUE_TO_CRITICAL: &str = "Skipped due to critical failure";

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error types for harness operations
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Browser or CDP transport failure
    #[error("Browser error: {0}")]
    Browser(String),

    /// A bounded wait ran out of budget
    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    /// The target reported a build/compile error overlay
    #[error("Compile error on page: {0}")]
    CompileError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    /// Raised by the fail-fast governor; stops the remaining phases
    #[error("Critical failure: {reason}")]
    CriticalAbort { reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl HarnessError {
    pub fn is_critical_abort(&self) -> bool {
        matches!(self, HarnessError::CriticalAbort { .. })
    }
}

/// Final status of a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Passed => "passed",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Error => "error",
            PhaseStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sealed phase outcome. Never mutated once appended to the result log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    pub name: String,
    pub status: PhaseStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub details: BTreeMap<String, serde_json::Value>,
    pub error: Option<String>,
    pub screenshots: Vec<ScreenshotRef>,
    /// Whether this phase was planned as critical
    pub critical: bool,
}

impl PhaseResult {
    /// Build a result for a phase that never ran
    pub fn skipped(name: &str, critical: bool) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            status: PhaseStatus::Skipped,
            start_time: now,
            end_time: now,
            details: BTreeMap::new(),
            error: Some(SKIPPED_DUE_TO_CRITICAL.to_string()),
            screenshots: Vec::new(),
            critical,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// A phase in progress. Sealed into a [`PhaseResult`] at phase end.
#[derive(Debug, Clone)]
pub struct OpenPhase {
    pub name: String,
    pub critical: bool,
    pub start_time: DateTime<Utc>,
    pub details: BTreeMap<String, serde_json::Value>,
    pub screenshots: Vec<ScreenshotRef>,
}

impl OpenPhase {
    pub fn new(name: &str, critical: bool) -> Self {
        Self {
            name: name.to_string(),
            critical,
            start_time: Utc::now(),
            details: BTreeMap::new(),
            screenshots: Vec::new(),
        }
    }

    /// Attach a serializable detail to the phase
    pub fn detail(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.details.insert(key.to_string(), value);
    }

    pub fn seal(self, status: PhaseStatus, error: Option<String>) -> PhaseResult {
        PhaseResult {
            name: self.name,
            status,
            start_time: self.start_time,
            end_time: Utc::now(),
            details: self.details,
            error,
            screenshots: self.screenshots,
            critical: self.critical,
        }
    }
}

/// Orchestrator state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    Authenticating,
    Authenticated,
    Completed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Init => "INIT",
            RunState::Authenticating => "AUTHENTICATING",
            RunState::Authenticated => "AUTHENTICATED",
            RunState::Completed => "COMPLETED",
            RunState::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Process-wide state for one invocation.
///
/// Owned by the orchestrator. `first_access` only changes through
/// [`RunContext::mark_ready`] (called by the readiness poller on behalf of the
/// session driver) and critical state only through the embedded governor.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub credentials: Credentials,
    pub base_url: String,
    pub breakpoints: Vec<Breakpoint>,
    first_access: bool,
    warm_routes: BTreeSet<String>,
    pub governor: FailFastGovernor,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, config: &Config) -> Self {
        Self {
            run_id: run_id.into(),
            started_at: Utc::now(),
            credentials: config.target.credentials.clone(),
            base_url: config.target.base_url.trim_end_matches('/').to_string(),
            breakpoints: config.breakpoints.clone(),
            first_access: true,
            warm_routes: BTreeSet::new(),
            governor: FailFastGovernor::new(config.policy.fail_fast),
        }
    }

    pub fn first_access(&self) -> bool {
        self.first_access
    }

    /// Whether a route of this kind has already been confirmed ready
    pub fn is_warm(&self, route_kind: &str) -> bool {
        !self.first_access && self.warm_routes.contains(route_kind)
    }

    /// Record confirmed readiness. Returns true when this call ended the
    /// first-access regime.
    pub fn mark_ready(&mut self, route_kind: &str) -> bool {
        self.warm_routes.insert(route_kind.to_string());
        let flipped = self.first_access;
        self.first_access = false;
        flipped
    }

    pub fn fail_fast(&self) -> bool {
        self.governor.fail_fast()
    }

    pub fn critical_failure_occurred(&self) -> bool {
        self.governor.occurred()
    }

    /// Absolute URL for a path on the target
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Aggregated counters for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub critical_failures: usize,
    pub duration_ms: u64,
}

impl RunSummary {
    /// Recompute counters from the sealed phase list
    pub fn from_phases(phases: &[PhaseResult], critical_failures: usize, duration_ms: u64) -> Self {
        let mut summary = Self {
            critical_failures,
            duration_ms,
            ..Default::default()
        };
        for phase in phases {
            summary.record(phase.status);
        }
        summary
    }

    /// Incremental update used for live logging
    pub fn record(&mut self, status: PhaseStatus) {
        self.total += 1;
        match status {
            PhaseStatus::Passed => self.passed += 1,
            PhaseStatus::Failed => self.failed += 1,
            PhaseStatus::Error => self.errors += 1,
            PhaseStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.passed + self.failed + self.errors + self.skipped
    }

    /// `passed / total`, 0 when nothing ran
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn critical_failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.critical_failures as f64 / self.total as f64
        }
    }

    /// Same counters, ignoring duration
    pub fn same_counts(&self, other: &RunSummary) -> bool {
        self.total == other.total
            && self.passed == other.passed
            && self.failed == other.failed
            && self.errors == other.errors
            && self.skipped == other.skipped
            && self.critical_failures == other.critical_failures
    }
}
