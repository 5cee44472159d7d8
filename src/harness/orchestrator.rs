//! Test session orchestrator.
//!
//! Runs the planned phases in order against one page handle. Each phase goes
//! through the [`ResultLog`], which turns everything after a fail-fast trip
//! into a skipped result, so the loop itself never decides what runs. A
//! `CriticalAbort` leaving a phase only stops further work; the remaining
//! phases are still walked so each gets its skipped record.

use chrono::Utc;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::analyzer::{self, UiAssessment, UiCheck};
use crate::config::{Breakpoint, Config};
use crate::driver::scripts::{Ack, DataPresence, FilterControls};
use crate::driver::{InputKind, PageDriver, PageScript, probe};
use crate::evidence::{EvidenceRecorder, StatusTag};
use crate::governor::REASON_ENVIRONMENT_UNAVAILABLE;
use crate::harness::results::{PhaseGate, ResultLog};
use crate::harness::types::{
    HarnessError, HarnessResult, OpenPhase, PhaseStatus, RunContext, RunState,
};
use crate::health::EnvironmentProbe;
use crate::report::RunReport;
use crate::session::{AuthOutcome, SessionDriver};
use crate::validation::{ValidationEngine, ValidationRecord, ValidationScope, ValidationType};
use crate::workspace::RunWorkspace;

/// Detail recorded when the buttons phase found nothing to click
pub const NO_CONTROLS_SAMPLED: &str = "no controls sampled";

/// What a phase does
#[derive(Debug, Clone)]
pub enum PhaseKind {
    Environment,
    Authentication,
    Navigation,
    DataLoading,
    Search,
    Filters,
    Buttons,
    CrudPresence,
    Responsive(Breakpoint),
}

impl PhaseKind {
    pub fn name(&self) -> String {
        match self {
            PhaseKind::Environment => "environment".to_string(),
            PhaseKind::Authentication => "authentication".to_string(),
            PhaseKind::Navigation => "navigation".to_string(),
            PhaseKind::DataLoading => "data-loading".to_string(),
            PhaseKind::Search => "search".to_string(),
            PhaseKind::Filters => "filters".to_string(),
            PhaseKind::Buttons => "buttons".to_string(),
            PhaseKind::CrudPresence => "crud-presence".to_string(),
            PhaseKind::Responsive(bp) => format!("responsive-{}", bp.name),
        }
    }

    /// The environment check runs before any page is loaded
    fn captures_closing_screenshot(&self) -> bool {
        !matches!(self, PhaseKind::Environment)
    }
}

#[derive(Debug, Clone)]
pub struct PlannedPhase {
    pub name: String,
    pub kind: PhaseKind,
    pub critical: bool,
}

/// Ordered phase list with criticality resolved from configuration
#[derive(Debug, Clone)]
pub struct PhasePlan {
    phases: Vec<PlannedPhase>,
}

impl PhasePlan {
    pub fn from_config(config: &Config) -> Self {
        let mut kinds = vec![
            PhaseKind::Environment,
            PhaseKind::Authentication,
            PhaseKind::Navigation,
            PhaseKind::DataLoading,
            PhaseKind::Search,
            PhaseKind::Filters,
            PhaseKind::Buttons,
            PhaseKind::CrudPresence,
        ];
        kinds.extend(config.breakpoints.iter().cloned().map(PhaseKind::Responsive));

        let phases = kinds
            .into_iter()
            .map(|kind| {
                let name = kind.name();
                let critical = config.is_critical(&name);
                PlannedPhase { name, kind, critical }
            })
            .collect();
        Self { phases }
    }

    pub fn phases(&self) -> &[PlannedPhase] {
        &self.phases
    }

    pub fn names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn is_critical(&self, name: &str) -> bool {
        self.phases.iter().any(|p| p.name == name && p.critical)
    }
}

/// How a phase body ended when it did not raise
#[derive(Debug)]
struct Verdict {
    status: PhaseStatus,
    error: Option<String>,
    /// Governor reason used when this phase is critical and did not pass
    reason: Option<String>,
}

impl Verdict {
    fn passed() -> Self {
        Self {
            status: PhaseStatus::Passed,
            error: None,
            reason: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            status: PhaseStatus::Failed,
            error: Some(message.into()),
            reason: None,
        }
    }

    fn because(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    fn from_record(record: &ValidationRecord) -> Self {
        match record.status {
            PhaseStatus::Passed => Self::passed(),
            status => Self {
                status,
                error: Some(record.message.clone()),
                reason: None,
            },
        }
    }
}

pub struct Orchestrator {
    config: Config,
    plan: PhasePlan,
    ctx: RunContext,
    session: SessionDriver,
    recorder: EvidenceRecorder,
    engine: ValidationEngine,
    log: ResultLog,
    state: RunState,
    environment: Arc<dyn EnvironmentProbe>,
    custom_checks: BTreeMap<String, Vec<UiCheck>>,
    assessments: Vec<UiAssessment>,
    attached: bool,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        page: Arc<dyn PageDriver>,
        workspace: RunWorkspace,
        environment: Arc<dyn EnvironmentProbe>,
    ) -> Self {
        let ctx = RunContext::new(workspace.id.clone(), &config);
        let recorder = EvidenceRecorder::new(
            workspace,
            &config.artifacts,
            config.policy.validate_screenshots,
        );
        Self {
            plan: PhasePlan::from_config(&config),
            session: SessionDriver::new(page, &config),
            engine: ValidationEngine::new(&config),
            ctx,
            recorder,
            log: ResultLog::new(),
            state: RunState::Init,
            environment,
            custom_checks: BTreeMap::new(),
            assessments: Vec::new(),
            attached: false,
            config,
        }
    }

    /// Extra UI checks merged into the assessment of one breakpoint
    pub fn with_custom_checks(mut self, breakpoint: &str, checks: Vec<UiCheck>) -> Self {
        self.custom_checks
            .entry(breakpoint.to_string())
            .or_default()
            .extend(checks);
        self
    }

    pub fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run every planned phase, release the page and collect the results
    pub async fn run(mut self) -> RunReport {
        let started = Instant::now();
        info!(
            run_id = %self.ctx.run_id,
            phases = self.plan.len(),
            fail_fast = self.ctx.fail_fast(),
            backend = self.session.page().source_type(),
            "starting run"
        );

        let plan = self.plan.clone();
        let mut aborted = false;
        for planned in plan.phases() {
            if let Err(e) = self.run_phase(planned).await {
                if !aborted {
                    error!(
                        phase = %planned.name,
                        error = %e,
                        "run aborted, remaining phases skipped"
                    );
                }
                aborted = true;
            }
        }
        self.state = if aborted { RunState::Aborted } else { RunState::Completed };

        if let Err(e) = self.session.shutdown().await {
            warn!(error = %e, "failed to release page");
        }
        if let Err(e) = self.recorder.write_logs() {
            warn!(error = %e, "failed to write console/network logs");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        self.finish(duration_ms)
    }

    fn finish(self, duration_ms: u64) -> RunReport {
        let mut summary = self.log.live().clone();
        summary.critical_failures = self.ctx.governor.count();
        summary.duration_ms = duration_ms;

        let stop_reason = match self.state {
            RunState::Aborted => self.ctx.governor.history().first().map(|r| r.reason.clone()),
            _ => None,
        };
        let success = self.state == RunState::Completed
            && summary.failed == 0
            && summary.errors == 0
            && summary.critical_failures == 0;

        info!(
            run_id = %self.ctx.run_id,
            state = %self.state,
            success,
            passed = summary.passed,
            failed = summary.failed,
            errors = summary.errors,
            skipped = summary.skipped,
            critical = summary.critical_failures,
            browser_errors = self.recorder.browser_error_count(),
            duration_ms,
            "run finished"
        );

        RunReport {
            run_id: self.ctx.run_id.clone(),
            source: self.session.page().source_type().to_string(),
            base_url: self.ctx.base_url.clone(),
            state: self.state,
            success,
            fail_fast: self.ctx.fail_fast(),
            first_access: self.ctx.first_access(),
            started_at: self.ctx.started_at,
            finished_at: Utc::now(),
            stop_reason,
            summary,
            critical_failures: self.ctx.governor.history().to_vec(),
            validations: self.engine.into_records(),
            assessments: self.assessments,
            integrity: self.recorder.integrity_records().to_vec(),
            console: self.recorder.console().to_vec(),
            network: self.recorder.network().to_vec(),
            artifact_dir: self.recorder.workspace().dir.clone(),
            phases: self.log.into_phases(),
        }
    }

    /// Run one phase through the result log. Returns `Err` only on
    /// `CriticalAbort`.
    async fn run_phase(&mut self, planned: &PlannedPhase) -> HarnessResult<()> {
        let gate = self
            .log
            .start_phase(&planned.name, planned.critical, &self.ctx.governor);
        let mut open = match gate {
            PhaseGate::Run(open) => open,
            PhaseGate::Skipped => return Ok(()),
        };
        self.recorder.begin_phase(&planned.name);
        let critical_before = self.ctx.governor.count();
        info!(phase = %planned.name, critical = planned.critical, "phase started");

        let (mut verdict, mut abort) = match self.execute(&planned.kind, &mut open).await {
            Ok(verdict) => (verdict, None),
            Err(e) if e.is_critical_abort() => (Verdict::failed(e.to_string()), Some(e)),
            Err(e) => {
                error!(phase = %planned.name, error = %e, "phase errored");
                (
                    Verdict {
                        status: PhaseStatus::Error,
                        error: Some(e.to_string()),
                        reason: None,
                    },
                    None,
                )
            }
        };

        let browser_errors = self.recorder.drain();
        if browser_errors > 0 {
            open.detail("browserErrors", browser_errors);
        }

        if abort.is_none() && planned.kind.captures_closing_screenshot() {
            let tag = StatusTag::for_status(verdict.status);
            let label = match &planned.kind {
                PhaseKind::Responsive(bp) => bp.name.clone(),
                _ => "state".to_string(),
            };
            let description = format!("{} {}", planned.name, verdict.status);
            let capture = self
                .recorder
                .capture_screenshot(
                    self.session.page(),
                    &mut self.ctx.governor,
                    &label,
                    tag,
                    &description,
                )
                .await;
            match capture {
                Ok(_) => {}
                Err(e) if e.is_critical_abort() => {
                    verdict = Verdict::failed(e.to_string());
                    abort = Some(e);
                }
                Err(e) => warn!(phase = %planned.name, error = %e, "closing screenshot failed"),
            }
        }
        open.screenshots = self.recorder.captures_for(&planned.name);

        let status = verdict.status;
        self.log.add_result(open.seal(status, verdict.error.clone()), &self.ctx.governor);

        if let Some(e) = abort {
            return Err(e);
        }

        // Validators and evidence checks may already have escalated this phase
        let escalated = self.ctx.governor.count() != critical_before;
        if planned.critical && status != PhaseStatus::Passed && !escalated {
            let reason = verdict
                .reason
                .unwrap_or_else(|| format!("critical phase {} {}", planned.name, status));
            self.ctx.governor.critical_failure(
                &reason,
                json!({ "phase": planned.name, "status": status, "error": verdict.error }),
            )?;
        }
        Ok(())
    }

    async fn execute(&mut self, kind: &PhaseKind, open: &mut OpenPhase) -> HarnessResult<Verdict> {
        match kind {
            PhaseKind::Environment => self.environment_phase(open).await,
            PhaseKind::Authentication => self.authentication_phase(open).await,
            PhaseKind::Navigation => self.navigation_phase(open).await,
            PhaseKind::DataLoading => self.data_loading_phase(open).await,
            PhaseKind::Search => self.search_phase(open).await,
            PhaseKind::Filters => self.filters_phase(open).await,
            PhaseKind::Buttons => self.buttons_phase(open).await,
            PhaseKind::CrudPresence => self.crud_phase(open).await,
            PhaseKind::Responsive(bp) => self.responsive_phase(bp, open).await,
        }
    }

    async fn validate(
        &mut self,
        open: &OpenPhase,
        validation_type: ValidationType,
        expected: Option<Value>,
    ) -> HarnessResult<ValidationRecord> {
        let scope = ValidationScope {
            page: self.session.page(),
            ctx: &mut self.ctx,
            recorder: &mut self.recorder,
        };
        self.engine
            .validate(scope, &open.name, validation_type, expected, open.critical)
            .await
    }

    async fn environment_phase(&mut self, open: &mut OpenPhase) -> HarnessResult<Verdict> {
        let report = self.environment.check(&self.ctx.base_url).await?;
        open.detail("environment", &report);
        if report.reachable {
            return Ok(Verdict::passed());
        }
        let message = format!(
            "{}: {}",
            REASON_ENVIRONMENT_UNAVAILABLE,
            report.error.as_deref().unwrap_or("no response")
        );
        Ok(Verdict::failed(message).because(REASON_ENVIRONMENT_UNAVAILABLE))
    }

    async fn authentication_phase(&mut self, open: &mut OpenPhase) -> HarnessResult<Verdict> {
        self.state = RunState::Authenticating;
        if !self.attached {
            let subscription = self.session.setup().await?;
            self.recorder.attach(subscription);
            self.attached = true;
        }

        let target = self.ctx.url_for(&self.config.target.start_path);
        let reused = if self.config.policy.reuse_session {
            self.session.try_reuse_session(&mut self.ctx, &target).await?
        } else {
            false
        };

        let outcome = if reused {
            AuthOutcome {
                submitted: false,
                left_login_path: true,
                protected_marker_visible: true,
                reused_session: true,
                landing_url: self.session.page().current_url().await?,
                ..Default::default()
            }
        } else {
            match self.session.authenticate(&mut self.ctx, &target).await {
                Ok(outcome) => outcome,
                Err(HarnessError::AuthenticationFailed(message)) => {
                    open.detail("firstAccess", self.ctx.first_access());
                    return Ok(Verdict::failed(message).because("authentication failed"));
                }
                Err(e) => return Err(e),
            }
        };
        open.detail("auth", &outcome);
        self.engine.set_auth_outcome(outcome);

        let record = self
            .validate(
                open,
                ValidationType::Authentication,
                Some(json!({ "leftLoginPath": true, "protectedMarkerVisible": true })),
            )
            .await?;
        open.detail("validation", &record);
        open.detail("firstAccess", self.ctx.first_access());

        let verdict = Verdict::from_record(&record).because("authentication failed");
        if verdict.status == PhaseStatus::Passed {
            self.state = RunState::Authenticated;
        }
        Ok(verdict)
    }

    async fn navigation_phase(&mut self, open: &mut OpenPhase) -> HarnessResult<Verdict> {
        let outcome = self
            .session
            .navigate(&mut self.ctx, &self.config.target.start_path)
            .await?;
        open.detail("navigation", &outcome);
        if !outcome.readiness.ready {
            return Ok(Verdict::failed(format!(
                "{} not ready after {} attempts",
                outcome.url, outcome.readiness.attempts
            )));
        }

        let record = self
            .validate(
                open,
                ValidationType::Navigation,
                Some(json!({ "urlChanged": true, "ready": true })),
            )
            .await?;
        open.detail("validation", &record);
        Ok(Verdict::from_record(&record))
    }

    async fn data_loading_phase(&mut self, open: &mut OpenPhase) -> HarnessResult<Verdict> {
        // Reload so the data requests are attributed to this phase
        let outcome = self
            .session
            .navigate(&mut self.ctx, &self.config.target.start_path)
            .await?;
        open.detail("readiness", &outcome.readiness);

        let record = self
            .validate(
                open,
                ValidationType::DataLoading,
                Some(json!({ "hasData": true, "loadingCleared": true })),
            )
            .await?;
        open.detail("validation", &record);
        Ok(Verdict::from_record(&record))
    }

    async fn search_phase(&mut self, open: &mut OpenPhase) -> HarnessResult<Verdict> {
        let term = self.config.probe.search_term.clone();
        open.detail("term", &term);
        let ack: Ack = probe(
            self.session.page(),
            &PageScript::FillInput {
                kind: InputKind::Search,
                value: term,
            },
        )
        .await?;
        if !ack.ok {
            return Ok(Verdict::failed("no search input found"));
        }

        let readiness = self.session.settle(&mut self.ctx).await?;
        let data: DataPresence = probe(self.session.page(), &PageScript::DataPresence).await?;
        self.recorder.drain();
        open.detail("readiness", &readiness);
        open.detail("results", &data);
        open.detail(
            "requests",
            self.recorder
                .requests_matching(&open.name, &self.config.probe.data_request_pattern),
        );

        if data.data_elements > 0 || data.empty_state {
            Ok(Verdict::passed())
        } else {
            Ok(Verdict::failed("search showed neither results nor an empty state"))
        }
    }

    async fn filters_phase(&mut self, open: &mut OpenPhase) -> HarnessResult<Verdict> {
        let filters: FilterControls =
            probe(self.session.page(), &PageScript::FilterControls).await?;
        open.detail("filterControls", filters.count);
        if filters.count == 0 {
            return Ok(Verdict::failed("no filter controls found"));
        }

        let ack: Ack = probe(self.session.page(), &PageScript::ClickFilter).await?;
        if !ack.ok {
            return Ok(Verdict::failed("filter control could not be activated"));
        }
        let readiness = self.session.settle(&mut self.ctx).await?;
        let data: DataPresence = probe(self.session.page(), &PageScript::DataPresence).await?;
        open.detail("readiness", &readiness);
        open.detail("results", &data);
        Ok(Verdict::passed())
    }

    async fn buttons_phase(&mut self, open: &mut OpenPhase) -> HarnessResult<Verdict> {
        // Start from the unfiltered list
        self.session
            .navigate(&mut self.ctx, &self.config.target.start_path)
            .await?;
        let record = self
            .validate(
                open,
                ValidationType::ButtonFunctionality,
                Some(json!({ "inertOnly": false })),
            )
            .await?;
        if record.actual["sampled"] == 0 {
            open.detail("warning", NO_CONTROLS_SAMPLED);
        }
        open.detail("validation", &record);
        Ok(Verdict::from_record(&record))
    }

    async fn crud_phase(&mut self, open: &mut OpenPhase) -> HarnessResult<Verdict> {
        let crud = self
            .validate(open, ValidationType::CrudOperations, Some(json!({ "anyPresent": true })))
            .await?;
        open.detail("validation", &crud);

        let form = self.validate(open, ValidationType::FormSubmission, None).await?;
        open.detail("form", &form);
        Ok(Verdict::from_record(&crud))
    }

    async fn responsive_phase(
        &mut self,
        breakpoint: &Breakpoint,
        open: &mut OpenPhase,
    ) -> HarnessResult<Verdict> {
        let stability = self.session.set_breakpoint(breakpoint).await?;
        if !stability.stable {
            warn!(
                breakpoint = %breakpoint.name,
                attempts = stability.attempts,
                "layout did not settle"
            );
        }
        open.detail("stability", &stability);

        let custom = self.custom_checks.get(&breakpoint.name).cloned().unwrap_or_default();
        let assessment = analyzer::inspect(self.session.page(), breakpoint, custom).await?;
        open.detail("layoutType", &assessment.layout_type);
        open.detail("checks", &assessment.checks);

        let verdict = if assessment.passed() {
            info!(
                breakpoint = %breakpoint.name,
                layout = ?assessment.layout_type,
                "responsive checks passed"
            );
            Verdict::passed()
        } else {
            warn!(
                breakpoint = %breakpoint.name,
                failures = %assessment.failure_summary(),
                "responsive checks failed"
            );
            Verdict::failed(assessment.failure_summary())
        };
        self.assessments.push(assessment);
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_breakpoints;

    #[test]
    fn test_plan_order_and_criticality() {
        let mut config = Config::defaults();
        config.breakpoints = parse_breakpoints("mobile,desktop").unwrap();
        let plan = PhasePlan::from_config(&config);

        assert_eq!(
            plan.names(),
            vec![
                "environment",
                "authentication",
                "navigation",
                "data-loading",
                "search",
                "filters",
                "buttons",
                "crud-presence",
                "responsive-mobile",
                "responsive-desktop",
            ]
        );
        assert!(plan.is_critical("environment"));
        assert!(plan.is_critical("authentication"));
        assert!(plan.is_critical("data-loading"));
        assert!(!plan.is_critical("search"));
        assert!(!plan.is_critical("buttons"));
    }

    #[test]
    fn test_plan_follows_configured_critical_list() {
        let mut config = Config::defaults();
        config.policy.tolerate_auth_failure = true;
        config.policy.critical_phases.push("buttons".to_string());
        let plan = PhasePlan::from_config(&config);
        assert!(!plan.is_critical("authentication"));
        assert!(plan.is_critical("buttons"));
    }

    #[test]
    fn test_verdict_from_record() {
        let record = ValidationRecord {
            phase_name: "buttons".into(),
            validation_type: ValidationType::ButtonFunctionality,
            expected: None,
            actual: Value::Null,
            status: PhaseStatus::Error,
            message: "probe failed".into(),
            evidence: BTreeMap::new(),
        };
        let verdict = Verdict::from_record(&record);
        assert_eq!(verdict.status, PhaseStatus::Error);
        assert_eq!(verdict.error.as_deref(), Some("probe failed"));
    }
}
