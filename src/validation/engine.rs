//! Business validation engine.
//!
//! `validate` dispatches on [`ValidationType`], performs the minimal
//! interaction for that kind, and compares the typed actual result against a
//! partial expectation. Failures and internal errors on critical phases are
//! escalated to the fail-fast governor.

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, info, warn};

use super::types::{
    ActualResult, AuthActual, ButtonActual, ButtonProbe, CrudActual, DataLoadingActual, FormActual,
    NavigationActual, ValidationRecord, ValidationType, compare_subset,
};
use crate::config::{Config, TimingSettings};
use crate::driver::scripts::{
    Ack, AuthMarkers, ControlInfo, CrudControls, DataPresence, FeedbackState, FormProbe, NavLink,
    OverlayState,
};
use crate::driver::{PageDriver, PageScript, goto_within, probe, url_path};
use crate::evidence::{EvidenceRecorder, StatusTag};
use crate::harness::types::{HarnessResult, PhaseStatus, RunContext};
use crate::readiness::wait_for_page_ready;
use crate::session::AuthOutcome;

/// Relative screenshot size change that counts as a visible reaction
pub const SCREENSHOT_DELTA_THRESHOLD: f64 = 0.01;

/// Shared borrows a validator needs from the orchestrator
pub struct ValidationScope<'a> {
    pub page: &'a dyn PageDriver,
    pub ctx: &'a mut RunContext,
    pub recorder: &'a mut EvidenceRecorder,
}

#[derive(Debug)]
pub struct ValidationEngine {
    login_path: String,
    data_request_pattern: String,
    button_sample_limit: usize,
    timing: TimingSettings,
    escalate: bool,
    last_auth: Option<AuthOutcome>,
    records: Vec<ValidationRecord>,
}

impl ValidationEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            login_path: config.target.login_path.clone(),
            data_request_pattern: config.probe.data_request_pattern.clone(),
            button_sample_limit: config.probe.button_sample_limit,
            timing: config.timing.clone(),
            escalate: config.policy.validate_business_logic,
            last_auth: None,
            records: Vec::new(),
        }
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.navigation_timeout_ms)
    }

    /// Remember what the session driver observed while logging in
    pub fn set_auth_outcome(&mut self, outcome: AuthOutcome) {
        self.last_auth = Some(outcome);
    }

    pub fn records(&self) -> &[ValidationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ValidationRecord> {
        self.records
    }

    /// Run one validator and record the outcome.
    ///
    /// Returns `Err` only when escalation trips fail-fast.
    pub async fn validate(
        &mut self,
        scope: ValidationScope<'_>,
        phase: &str,
        validation_type: ValidationType,
        expected: Option<Value>,
        critical: bool,
    ) -> HarnessResult<ValidationRecord> {
        let ValidationScope { page, ctx, recorder } = scope;
        let mut evidence = BTreeMap::new();

        let outcome = match validation_type {
            ValidationType::Authentication => self.check_authentication(page).await,
            ValidationType::DataLoading => self.check_data_loading(page, recorder, phase).await,
            ValidationType::ButtonFunctionality => {
                self.check_buttons(page, ctx, recorder, &mut evidence).await
            }
            ValidationType::FormSubmission => self.check_form(page).await,
            ValidationType::Navigation => self.check_navigation(page, ctx).await,
            ValidationType::CrudOperations => self.check_crud(page).await,
        };

        let (actual, status, message) = match outcome {
            Ok(actual) => {
                let actual = serde_json::to_value(&actual)?;
                let mismatches = expected
                    .as_ref()
                    .map(|e| compare_subset(e, &actual))
                    .unwrap_or_default();
                if mismatches.is_empty() {
                    (actual, PhaseStatus::Passed, format!("{} validation passed", validation_type))
                } else {
                    (actual, PhaseStatus::Failed, mismatches.join("; "))
                }
            }
            Err(e) if e.is_critical_abort() => return Err(e),
            Err(e) => (Value::Null, PhaseStatus::Error, e.to_string()),
        };

        let record = ValidationRecord {
            phase_name: phase.to_string(),
            validation_type,
            expected,
            actual,
            status,
            message,
            evidence,
        };
        self.records.push(record.clone());

        match status {
            PhaseStatus::Passed => info!(phase, validation = %validation_type, "validation passed"),
            PhaseStatus::Failed => warn!(
                phase,
                validation = %validation_type,
                message = %record.message,
                "validation failed"
            ),
            _ => error!(
                phase,
                validation = %validation_type,
                message = %record.message,
                "validation errored"
            ),
        }

        if status != PhaseStatus::Passed && critical && self.escalate {
            ctx.governor.critical_failure(
                &format!("{} validation {}", validation_type, status),
                json!({ "phase": phase, "message": record.message }),
            )?;
        }

        Ok(record)
    }

    async fn check_authentication(&self, page: &dyn PageDriver) -> HarnessResult<ActualResult> {
        let markers: AuthMarkers = probe(page, &PageScript::AuthMarkers).await?;
        let url = page.current_url().await?;
        let left = url_path(&url).trim_end_matches('/') != self.login_path.trim_end_matches('/');
        let actual = match &self.last_auth {
            Some(outcome) => AuthActual {
                login_form_present: outcome.login_form_present,
                submitted: outcome.submitted || outcome.reused_session,
                left_login_path: outcome.left_login_path && left,
                protected_marker_visible: markers.protected_marker_visible,
            },
            None => AuthActual {
                login_form_present: markers.login_form_present,
                submitted: false,
                left_login_path: left,
                protected_marker_visible: markers.protected_marker_visible,
            },
        };
        Ok(ActualResult::Authentication(actual))
    }

    async fn check_data_loading(
        &self,
        page: &dyn PageDriver,
        recorder: &mut EvidenceRecorder,
        phase: &str,
    ) -> HarnessResult<ActualResult> {
        let data: DataPresence = probe(page, &PageScript::DataPresence).await?;
        recorder.drain();
        Ok(ActualResult::DataLoading(DataLoadingActual {
            data_elements: data.data_elements,
            empty_state: data.empty_state,
            loading_cleared: data.loading_cleared,
            data_requests: recorder.requests_matching(phase, &self.data_request_pattern),
            has_data: data.data_elements > 0 || data.empty_state,
        }))
    }

    /// Poll briefly for a URL change or an open dialog after a click
    async fn observe_effect(
        &self,
        page: &dyn PageDriver,
        url_before: &str,
    ) -> HarnessResult<(bool, bool)> {
        let max_attempts = self.timing.attempts_for(self.timing.responsive_timeout_ms);
        for attempt in 1..=max_attempts {
            let url_changed = page.current_url().await? != url_before;
            let overlay: OverlayState = probe(page, &PageScript::OverlayState).await?;
            if url_changed || overlay.dialog_open {
                return Ok((url_changed, overlay.dialog_open));
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.timing.poll_interval()).await;
            }
        }
        Ok((false, false))
    }

    async fn check_buttons(
        &self,
        page: &dyn PageDriver,
        ctx: &mut RunContext,
        recorder: &mut EvidenceRecorder,
        evidence: &mut BTreeMap<String, Value>,
    ) -> HarnessResult<ActualResult> {
        let origin = page.current_url().await?;
        let controls: Vec<ControlInfo> = probe(
            page,
            &PageScript::SampleControls {
                limit: self.button_sample_limit,
            },
        )
        .await?;

        let mut probes = Vec::with_capacity(controls.len());
        let mut shots = Vec::new();
        for control in &controls {
            let label = if control.label.is_empty() {
                format!("control {}", control.index)
            } else {
                control.label.clone()
            };

            let before = recorder
                .capture_screenshot(
                    page,
                    &mut ctx.governor,
                    &format!("before {}", label),
                    StatusTag::BeforeAction,
                    "before click",
                )
                .await?;
            let url_before = page.current_url().await?;

            let ack: Ack = probe(page, &PageScript::ClickControl { index: control.index }).await?;
            let (url_changed, dialog_opened) = if ack.ok {
                self.observe_effect(page, &url_before).await?
            } else {
                (false, false)
            };

            let after = recorder
                .capture_screenshot(
                    page,
                    &mut ctx.governor,
                    &format!("after {}", label),
                    StatusTag::AfterAction,
                    "after click",
                )
                .await?;

            let before_bytes = before.reference.file_size_bytes as f64;
            let screenshot_delta = if before_bytes > 0.0 {
                (after.reference.file_size_bytes as f64 - before_bytes).abs() / before_bytes
            } else {
                0.0
            };
            let repainted = screenshot_delta > SCREENSHOT_DELTA_THRESHOLD;
            let responded = url_changed || dialog_opened || repainted;
            if !responded {
                warn!(control = %label, "control produced no observable effect");
            }

            shots.push(before.reference.file_path.clone());
            shots.push(after.reference.file_path.clone());
            probes.push(ButtonProbe {
                index: control.index,
                label,
                url_changed,
                dialog_opened,
                screenshot_delta,
                responded,
            });

            if dialog_opened {
                let _: Ack = probe(page, &PageScript::CloseOverlay).await?;
            }
            if url_changed {
                goto_within(page, &origin, self.navigation_timeout()).await?;
                wait_for_page_ready(page, ctx, &self.timing).await?;
            }
            // Sampling tags are cleared by navigation; re-tag before the next click
            if url_changed || dialog_opened {
                let _: Vec<ControlInfo> = probe(
                    page,
                    &PageScript::SampleControls {
                        limit: self.button_sample_limit,
                    },
                )
                .await?;
            }
        }

        if probes.is_empty() {
            warn!(url = %origin, "no clickable controls found to sample");
        }
        evidence.insert("screenshots".to_string(), serde_json::to_value(&shots)?);
        let responded = probes.iter().filter(|p| p.responded).count();
        Ok(ActualResult::ButtonFunctionality(ButtonActual {
            sampled: probes.len(),
            responded,
            inert: probes.iter().filter(|p| !p.responded).map(|p| p.label.clone()).collect(),
            inert_only: !probes.is_empty() && responded == 0,
            controls: probes,
        }))
    }

    async fn check_form(&self, page: &dyn PageDriver) -> HarnessResult<ActualResult> {
        let mut form: FormProbe = probe(page, &PageScript::FormProbe).await?;
        let mut opened_via_create = false;

        if !form.form_present {
            let crud: CrudControls = probe(page, &PageScript::CrudControls).await?;
            if crud.create > 0 {
                let ack: Ack = probe(page, &PageScript::ClickCreate).await?;
                if ack.ok {
                    opened_via_create = true;
                    form = probe(page, &PageScript::FormProbe).await?;
                }
            }
        }

        let mut feedback_shown = false;
        if form.submitted {
            let max_attempts = self.timing.attempts_for(self.timing.responsive_timeout_ms);
            for attempt in 1..=max_attempts {
                let feedback: FeedbackState = probe(page, &PageScript::FormFeedback).await?;
                if feedback.feedback_shown {
                    feedback_shown = true;
                    break;
                }
                if attempt < max_attempts {
                    tokio::time::sleep(self.timing.poll_interval()).await;
                }
            }
        }

        let overlay: OverlayState = probe(page, &PageScript::OverlayState).await?;
        if overlay.dialog_open {
            let _: Ack = probe(page, &PageScript::CloseOverlay).await?;
        }

        Ok(ActualResult::FormSubmission(FormActual {
            form_present: form.form_present,
            opened_via_create,
            submitted: form.submitted,
            feedback_shown,
        }))
    }

    async fn check_navigation(
        &self,
        page: &dyn PageDriver,
        ctx: &mut RunContext,
    ) -> HarnessResult<ActualResult> {
        let origin = page.current_url().await?;
        let links: Vec<NavLink> = probe(page, &PageScript::NavigationLinks).await?;
        let Some(first) = links.first() else {
            return Ok(ActualResult::Navigation(NavigationActual {
                landed_url: origin,
                ..Default::default()
            }));
        };

        let _: Ack = probe(page, &PageScript::ClickNavLink { index: first.index }).await?;
        let readiness = wait_for_page_ready(page, ctx, &self.timing).await?;
        let landed_url = page.current_url().await?;
        let url_changed = landed_url != origin;

        if url_changed {
            goto_within(page, &origin, self.navigation_timeout()).await?;
            wait_for_page_ready(page, ctx, &self.timing).await?;
        }

        Ok(ActualResult::Navigation(NavigationActual {
            links_found: links.len(),
            clicked: Some(first.href.clone()),
            url_changed,
            landed_url,
            ready: readiness.ready,
        }))
    }

    async fn check_crud(&self, page: &dyn PageDriver) -> HarnessResult<ActualResult> {
        let crud: CrudControls = probe(page, &PageScript::CrudControls).await?;
        Ok(ActualResult::CrudOperations(CrudActual {
            create: crud.create,
            edit: crud.edit,
            delete: crud.delete,
            view: crud.view,
            any_present: crud.create + crud.edit + crud.delete + crud.view > 0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::driver::{ControlEffect, MockControl, MockPage, MockSite, MockView};
    use crate::workspace::RunWorkspace;

    struct Fixture {
        _tmp: tempfile::TempDir,
        page: MockPage,
        ctx: RunContext,
        recorder: EvidenceRecorder,
        engine: ValidationEngine,
    }

    fn fixture(site: MockSite, fail_fast: bool) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::defaults();
        config.target.base_url = "http://mock.local".into();
        config.timing = TimingSettings::fast();
        config.policy.fail_fast = fail_fast;
        let ws = RunWorkspace::new(tmp.path(), "validation");
        ws.init().unwrap();
        Fixture {
            _tmp: tmp,
            page: MockPage::new(site).with_session(),
            ctx: RunContext::new("t", &config),
            recorder: EvidenceRecorder::new(ws, &config.artifacts, true),
            engine: ValidationEngine::new(&config),
        }
    }

    fn site() -> MockSite {
        MockSite::backoffice("http://mock.local", Credentials::default())
    }

    impl Fixture {
        async fn validate(
            &mut self,
            phase: &str,
            t: ValidationType,
            expected: Option<Value>,
            critical: bool,
        ) -> HarnessResult<ValidationRecord> {
            self.recorder.begin_phase(phase);
            let scope = ValidationScope {
                page: &self.page,
                ctx: &mut self.ctx,
                recorder: &mut self.recorder,
            };
            self.engine.validate(scope, phase, t, expected, critical).await
        }
    }

    #[tokio::test]
    async fn test_url_change_alone_counts_as_response() {
        let site = site().with_view(
            MockView::new("/admin/only-nav", "Only nav")
                .with_controls(vec![MockControl::new(
                    "Open",
                    ControlEffect::Navigate("/admin/users".into()),
                )]),
        );
        let mut f = fixture(site, true);
        f.page.goto("http://mock.local/admin/only-nav").await.unwrap();

        let record = f
            .validate(
                "buttons",
                ValidationType::ButtonFunctionality,
                Some(json!({ "inertOnly": false })),
                false,
            )
            .await
            .unwrap();
        assert_eq!(record.status, PhaseStatus::Passed);
        let control = &record.actual["controls"][0];
        assert_eq!(control["urlChanged"], true);
        assert_eq!(control["dialogOpened"], false);
        assert_eq!(control["responded"], true);
        assert_eq!(f.page.current_url().await.unwrap(), "http://mock.local/admin/only-nav");
    }

    #[tokio::test]
    async fn test_all_inert_controls_fail_the_expectation() {
        let site = site().with_view(
            MockView::new("/admin/inert", "Inert")
                .with_controls(vec![
                    MockControl::new("Noop", ControlEffect::Inert),
                    MockControl::new("Noop 2", ControlEffect::Inert),
                ]),
        );
        let mut f = fixture(site, true);
        f.page.goto("http://mock.local/admin/inert").await.unwrap();

        let record = f
            .validate(
                "buttons",
                ValidationType::ButtonFunctionality,
                Some(json!({ "inertOnly": false })),
                false,
            )
            .await
            .unwrap();
        assert_eq!(record.status, PhaseStatus::Failed);
        assert_eq!(record.actual["inert"].as_array().unwrap().len(), 2);
        assert!(!f.ctx.critical_failure_occurred());
    }

    #[tokio::test]
    async fn test_mixed_controls_pass_when_one_responds() {
        let mut f = fixture(site(), true);
        f.page.goto("http://mock.local/admin/users").await.unwrap();

        let record = f
            .validate(
                "buttons",
                ValidationType::ButtonFunctionality,
                Some(json!({ "inertOnly": false })),
                false,
            )
            .await
            .unwrap();
        assert_eq!(record.status, PhaseStatus::Passed);
        assert_eq!(record.actual["sampled"], 3);
        assert_eq!(record.actual["responded"], 2);
        assert_eq!(record.actual["inert"], json!(["Refresh"]));
        assert_eq!(f.recorder.integrity_records().len(), 6);
    }

    #[tokio::test]
    async fn test_data_loading_observes_requests() {
        let mut f = fixture(site(), true);
        f.recorder.attach(f.page.subscribe_events().await.unwrap());
        f.recorder.begin_phase("data-loading");
        f.page.goto("http://mock.local/admin/users").await.unwrap();

        let record = f
            .validate(
                "data-loading",
                ValidationType::DataLoading,
                Some(json!({ "hasData": true })),
                true,
            )
            .await
            .unwrap();
        assert_eq!(record.status, PhaseStatus::Passed);
        assert_eq!(record.actual["dataElements"], 10);
        assert_eq!(record.actual["dataRequests"], 1);
    }

    #[tokio::test]
    async fn test_critical_failure_escalates() {
        let empty = MockView::new("/admin/empty", "Empty").with_desktop(Default::default());
        let mut f = fixture(site().with_view(empty), true);
        f.page.goto("http://mock.local/admin/empty").await.unwrap();

        let err = f
            .validate(
                "data-loading",
                ValidationType::DataLoading,
                Some(json!({ "hasData": true })),
                true,
            )
            .await
            .unwrap_err();
        assert!(err.is_critical_abort());
        assert_eq!(f.engine.records()[0].status, PhaseStatus::Failed);
    }

    #[tokio::test]
    async fn test_form_opened_via_create() {
        let mut f = fixture(site(), true);
        f.page.goto("http://mock.local/admin/users").await.unwrap();

        let record = f
            .validate("crud-presence", ValidationType::FormSubmission, None, false)
            .await
            .unwrap();
        assert_eq!(record.status, PhaseStatus::Passed);
        assert_eq!(record.actual["openedViaCreate"], true);
        assert_eq!(record.actual["submitted"], true);
        assert_eq!(record.actual["feedbackShown"], true);
    }

    #[tokio::test]
    async fn test_navigation_and_crud() {
        let mut f = fixture(site(), true);
        f.page.goto("http://mock.local/admin").await.unwrap();

        let nav = f
            .validate(
                "navigation",
                ValidationType::Navigation,
                Some(json!({ "urlChanged": true })),
                true,
            )
            .await
            .unwrap();
        assert_eq!(nav.status, PhaseStatus::Passed);
        assert_eq!(nav.actual["landedUrl"], "http://mock.local/admin/users");

        let crud = f
            .validate(
                "crud-presence",
                ValidationType::CrudOperations,
                Some(json!({ "anyPresent": true })),
                false,
            )
            .await
            .unwrap();
        assert_eq!(crud.status, PhaseStatus::Passed);
    }
}
