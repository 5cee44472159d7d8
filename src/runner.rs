//! Entry points that wire a page backend, a workspace and the orchestrator
//! together, then write the reports.

use futures::future::BoxFuture;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use std::time::Duration;
use tracing::instrument::WithSubscriber;
use tracing::{error, info};

use crate::config::Config;
use crate::driver::{CdpPage, LaunchOptions, PageDriver};
use crate::harness::Orchestrator;
use crate::harness::types::{HarnessError, HarnessResult, RunState, RunSummary};
use crate::health::{EnvironmentProbe, HttpProbe};
use crate::logging;
use crate::report::{ReportGenerator, ReportPaths, RunReport, verified_summary};
use crate::session::INITIAL_VIEWPORT;
use crate::workspace::RunWorkspace;

/// Pending page for one load session
pub type LaunchFuture = BoxFuture<'static, HarnessResult<Arc<dyn PageDriver>>>;

/// Opens a fresh page for load session `n`
pub type PageLauncher = Arc<dyn Fn(usize) -> LaunchFuture + Send + Sync>;

/// Result of one complete run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub state: RunState,
    pub summary: RunSummary,
    pub reports: ReportPaths,
    pub report: RunReport,
}

impl RunOutcome {
    pub fn run_dir(&self) -> &PathBuf {
        &self.report.artifact_dir
    }
}

/// Launch options for a Chromium page under this configuration
pub fn launch_options(config: &Config) -> LaunchOptions {
    LaunchOptions {
        headless: config.policy.headless,
        user_data_dir: config
            .policy
            .reuse_session
            .then(|| config.artifacts.base_dir.join("browser-profile")),
        width: INITIAL_VIEWPORT.0,
        height: INITIAL_VIEWPORT.1,
        request_timeout: Duration::from_millis(config.timing.page_load_timeout_ms),
    }
}

/// Run every phase against a real browser
pub async fn run_suite(config: &Config) -> HarnessResult<RunOutcome> {
    config.validate()?;
    let workspace = RunWorkspace::new(&config.artifacts.base_dir, "run");
    let page = CdpPage::launch(&launch_options(config)).await?;
    let probe = Arc::new(HttpProbe::default());
    run_with_page(config, Arc::new(page), probe, workspace).await
}

/// Run every phase against an already opened page
pub async fn run_with_page(
    config: &Config,
    page: Arc<dyn PageDriver>,
    environment: Arc<dyn EnvironmentProbe>,
    workspace: RunWorkspace,
) -> HarnessResult<RunOutcome> {
    workspace.init()?;
    let (dispatch, _log_guard) = logging::run_dispatch(&workspace.logs_dir());
    let (report, reports) = async {
        let report = Orchestrator::new(config.clone(), page, workspace, environment)
            .run()
            .await;
        let reports = ReportGenerator::new(&config.artifacts).write_all(&report);
        (report, reports)
    }
    .with_subscriber(dispatch)
    .await;
    let reports = reports?;
    Ok(RunOutcome {
        success: report.success,
        state: report.state,
        summary: verified_summary(&report),
        reports,
        report,
    })
}

#[derive(Debug)]
pub struct SuiteEntry {
    pub name: String,
    pub outcome: Result<RunOutcome, String>,
}

impl SuiteEntry {
    pub fn passed(&self) -> bool {
        matches!(&self.outcome, Ok(o) if o.success)
    }
}

/// Results of several suites run back to back
#[derive(Debug, Default)]
pub struct SuiteOutcome {
    pub entries: Vec<SuiteEntry>,
}

impl SuiteOutcome {
    /// Drives the process exit code
    pub fn all_passed(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(SuiteEntry::passed)
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| !e.passed())
            .map(|e| e.name.as_str())
            .collect()
    }
}

/// Run named configurations one after another. A suite that cannot start
/// is recorded as failed and the rest still run.
pub async fn run_suites(suites: Vec<(String, Config)>) -> SuiteOutcome {
    let mut outcome = SuiteOutcome::default();
    for (name, config) in suites {
        info!(suite = %name, "starting suite");
        let result = run_suite(&config).await.map_err(|e| {
            error!(suite = %name, error = %e, "suite could not run");
            e.to_string()
        });
        outcome.entries.push(SuiteEntry { name, outcome: result });
    }
    outcome
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionResult {
    pub index: usize,
    pub success: bool,
    pub state: Option<RunState>,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

/// Results of concurrent independent sessions
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOutcome {
    pub run_dir: PathBuf,
    pub sessions: Vec<LoadSessionResult>,
}

impl LoadOutcome {
    pub fn passed(&self) -> usize {
        self.sessions.iter().filter(|s| s.success).count()
    }

    pub fn all_passed(&self) -> bool {
        !self.sessions.is_empty() && self.passed() == self.sessions.len()
    }
}

/// `sessions` concurrent runs, each with its own Chromium instance
pub async fn run_load(config: &Config, sessions: usize) -> HarnessResult<LoadOutcome> {
    config.validate()?;
    let options = launch_options(config);
    let launcher: PageLauncher = Arc::new(move |_| -> LaunchFuture {
        // Profiles cannot be shared between concurrent browsers
        let options = LaunchOptions {
            user_data_dir: None,
            ..options.clone()
        };
        Box::pin(async move {
            let page: Arc<dyn PageDriver> = Arc::new(CdpPage::launch(&options).await?);
            Ok(page)
        })
    });
    run_load_with(config, sessions, launcher, Arc::new(HttpProbe::default())).await
}

/// Concurrent runs with a caller supplied page launcher. Every session gets
/// its own page, run context and workspace subdirectory.
pub async fn run_load_with(
    config: &Config,
    sessions: usize,
    launcher: PageLauncher,
    environment: Arc<dyn EnvironmentProbe>,
) -> HarnessResult<LoadOutcome> {
    if sessions == 0 {
        return Err(HarnessError::Config("load run needs at least one session".to_string()));
    }
    let parent = RunWorkspace::new(&config.artifacts.base_dir, "load");
    parent.init()?;
    info!(sessions, dir = %parent.dir.display(), "starting load run");

    let mut set = JoinSet::new();
    for index in 0..sessions {
        let mut config = config.clone();
        // Every session logs in on its own page and closes it afterwards
        config.policy.reuse_session = false;
        let launcher = launcher.clone();
        let environment = environment.clone();
        let workspace = parent.child(&format!("session-{}", index));
        set.spawn(async move {
            let result: HarnessResult<RunOutcome> = async {
                let page = launcher(index).await?;
                run_with_page(&config, page, environment, workspace).await
            }
            .await;
            (index, result)
        });
    }

    let mut results = Vec::with_capacity(sessions);
    while let Some(joined) = set.join_next().await {
        let (index, result) = joined
            .map_err(|e| HarnessError::Browser(format!("load session panicked: {}", e)))?;
        let entry = match result {
            Ok(outcome) => LoadSessionResult {
                index,
                success: outcome.success,
                state: Some(outcome.state),
                summary: Some(outcome.summary),
                error: None,
            },
            Err(e) => {
                error!(session = index, error = %e, "load session failed");
                LoadSessionResult {
                    index,
                    success: false,
                    state: None,
                    summary: None,
                    error: Some(e.to_string()),
                }
            }
        };
        results.push(entry);
    }
    results.sort_by_key(|r| r.index);

    let outcome = LoadOutcome {
        run_dir: parent.dir.clone(),
        sessions: results,
    };
    std::fs::write(
        parent.dir.join("load.json"),
        serde_json::to_string_pretty(&outcome)?,
    )?;
    info!(passed = outcome.passed(), total = outcome.sessions.len(), "load run finished");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_load_budget_bounds_browser_requests() {
        let mut config = Config::defaults();
        config.timing.page_load_timeout_ms = 12_345;
        config.policy.headless = false;
        let options = launch_options(&config);
        assert_eq!(options.request_timeout, Duration::from_millis(12_345));
        assert!(!options.headless);
        assert!(options.user_data_dir.is_none());
    }

    #[test]
    fn test_reused_sessions_keep_a_browser_profile() {
        let mut config = Config::defaults();
        config.policy.reuse_session = true;
        let options = launch_options(&config);
        assert_eq!(
            options.user_data_dir,
            Some(config.artifacts.base_dir.join("browser-profile"))
        );
    }
}
