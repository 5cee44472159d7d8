//! Backoffice harness - browser-driven validation and reporting for
//! role-gated admin backoffices.
//!
//! This crate provides:
//! - A `PageDriver` seam with a Chromium (CDP) backend and a scripted mock
//! - Adaptive readiness polling with first-access and warm budgets
//! - Breakpoint-aware UI assessment
//! - Business validators with fail-fast escalation of critical failures
//! - Evidence capture (screenshots, console, network) and JSON/HTML/text reports
//!
//! # Example
//!
//! ```rust,no_run
//! use backoffice_harness::{Config, run_suite};
//!
//! # async fn demo() -> backoffice_harness::HarnessResult<()> {
//! let config = Config::load(None)?;
//! let outcome = run_suite(&config).await?;
//! println!("{} -> {}", outcome.state, outcome.reports.html.display());
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod config;
pub mod driver;
pub mod evidence;
pub mod governor;
pub mod harness;
pub mod health;
pub mod logging;
pub mod readiness;
pub mod report;
pub mod runner;
pub mod session;
pub mod validation;
pub mod workspace;

// Re-export configuration
pub use config::{
    Breakpoint, BreakpointClass, Config, Credentials, parse_breakpoints, preset_breakpoints,
};

// Re-export harness types
pub use governor::{CriticalFailureRecord, FailFastGovernor};
pub use harness::{
    HarnessError, HarnessResult, Orchestrator, PhasePlan, PhaseResult, PhaseStatus, RunContext,
    RunState, RunSummary,
    SKIPPED_DUE_TO_CRITICAL,
};

// Re-export page backends
pub use driver::{CdpPage, LaunchOptions, MockPage, MockSite, MockView, PageDriver};

// Re-export entry points and reports
pub use health::{EnvironmentProbe, HttpProbe, StaticProbe};
pub use report::{ReportGenerator, ReportPaths, RunReport};
pub use runner::{
    LoadOutcome, RunOutcome, SuiteOutcome, run_load, run_suite, run_suites, run_with_page,
};
pub use workspace::{RunWorkspace, cleanup_old_runs, list_runs};
