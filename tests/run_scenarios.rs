//! End-to-end runs of the orchestrator against the scripted backoffice

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoffice_harness::analyzer::{LayoutMetrics, LayoutType, SidebarMetrics, assess};
use backoffice_harness::config::{Breakpoint, TimingSettings, parse_breakpoints};
use backoffice_harness::driver::{
    ConsoleLevel, ControlEffect, MockControl, MockPage, MockSite, MockView, PageDriver,
    ScreenshotMode,
};
use backoffice_harness::governor::REASON_ENVIRONMENT_UNAVAILABLE;
use backoffice_harness::health::{EnvironmentProbe, HttpProbe, StaticProbe};
use backoffice_harness::runner::{
    LaunchFuture, PageLauncher, RunOutcome, run_load_with, run_with_page,
};
use backoffice_harness::harness::orchestrator::NO_CONTROLS_SAMPLED;
use backoffice_harness::{
    Config, Credentials, PhaseStatus, RunState, RunWorkspace, SKIPPED_DUE_TO_CRITICAL,
};
use httpmock::prelude::*;
use pretty_assertions::assert_eq;

const BASE: &str = "http://backoffice.test";

fn credentials() -> Credentials {
    Credentials {
        email: "admin@example.com".to_string(),
        password: "correct-horse".to_string(),
    }
}

fn config(base_url: &str, out: &Path) -> Config {
    let mut config = Config::defaults();
    config.target.base_url = base_url.to_string();
    config.target.credentials = credentials();
    config.artifacts.base_dir = out.to_path_buf();
    config.timing = TimingSettings::fast();
    config
}

async fn run(config: &Config, page: Arc<MockPage>, probe: Arc<dyn EnvironmentProbe>) -> RunOutcome {
    let workspace = RunWorkspace::new(&config.artifacts.base_dir, "it");
    run_with_page(config, page, probe, workspace)
        .await
        .expect("run should produce reports")
}

fn statuses(outcome: &RunOutcome) -> Vec<(String, PhaseStatus)> {
    outcome
        .report
        .phases
        .iter()
        .map(|p| (p.name.clone(), p.status))
        .collect()
}

#[tokio::test]
async fn test_healthy_run_passes_every_phase() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(BASE, tmp.path());
    let page = Arc::new(MockPage::new(MockSite::backoffice(BASE, credentials())));

    let outcome = run(&config, page.clone(), Arc::new(StaticProbe(true))).await;

    assert_eq!(
        statuses(&outcome),
        vec![
            ("environment".to_string(), PhaseStatus::Passed),
            ("authentication".to_string(), PhaseStatus::Passed),
            ("navigation".to_string(), PhaseStatus::Passed),
            ("data-loading".to_string(), PhaseStatus::Passed),
            ("search".to_string(), PhaseStatus::Passed),
            ("filters".to_string(), PhaseStatus::Passed),
            ("buttons".to_string(), PhaseStatus::Passed),
            ("crud-presence".to_string(), PhaseStatus::Passed),
            ("responsive-mobile".to_string(), PhaseStatus::Passed),
            ("responsive-tablet".to_string(), PhaseStatus::Passed),
            ("responsive-desktop".to_string(), PhaseStatus::Passed),
        ]
    );
    assert!(outcome.success);
    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.summary.total, 11);
    assert!(outcome.summary.is_consistent());
    assert!(page.is_closed());

    assert!(outcome.reports.json.exists());
    assert!(outcome.reports.html.exists());
    assert!(outcome.reports.summary.exists());
    let dir = outcome.run_dir();
    assert!(dir.join("console-logs/console.json").exists());
    assert!(dir.join("network-logs/network.json").exists());
    assert!(dir.join(".run.json").exists());
}

#[tokio::test]
async fn test_valid_login_ends_first_access() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(BASE, tmp.path());
    let page = Arc::new(MockPage::new(MockSite::backoffice(BASE, credentials())));

    let outcome = run(&config, page.clone(), Arc::new(StaticProbe(true))).await;

    let auth = outcome.report.phase("authentication").unwrap();
    assert_eq!(auth.status, PhaseStatus::Passed);
    assert_eq!(auth.details["firstAccess"], false);
    assert!(!outcome.report.first_access);
    assert!(page.is_authenticated());
}

#[tokio::test]
async fn test_unreachable_environment_skips_everything_else() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config("http://127.0.0.1:1", tmp.path());
    let page = Arc::new(MockPage::new(MockSite::backoffice("http://127.0.0.1:1", credentials())));
    let probe = Arc::new(HttpProbe {
        timeout: Duration::from_secs(2),
    });

    let outcome = run(&config, page.clone(), probe).await;

    let failures = &outcome.report.critical_failures;
    assert_eq!(failures[0].reason, REASON_ENVIRONMENT_UNAVAILABLE);
    assert_eq!(outcome.state, RunState::Aborted);
    assert_eq!(outcome.report.stop_reason.as_deref(), Some(REASON_ENVIRONMENT_UNAVAILABLE));

    let phases = &outcome.report.phases;
    assert_eq!(phases[0].status, PhaseStatus::Failed);
    for phase in &phases[1..] {
        assert_eq!(phase.status, PhaseStatus::Skipped, "{} should be skipped", phase.name);
        assert_eq!(phase.error.as_deref(), Some(SKIPPED_DUE_TO_CRITICAL));
    }
    assert_eq!(page.navigation_count(), 0);
    assert!(!outcome.success);

    let html = fs::read_to_string(&outcome.reports.html).unwrap();
    assert!(html.contains("header critical"));
    assert!(html.contains(REASON_ENVIRONMENT_UNAVAILABLE));
}

#[tokio::test]
async fn test_reachable_environment_over_http() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(302).header("location", "/login");
        })
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let base = server.base_url();
    let config = config(&base, tmp.path());
    let page = Arc::new(MockPage::new(MockSite::backoffice(&base, credentials())));

    let outcome = run(&config, page, Arc::new(HttpProbe::default())).await;
    let env = outcome.report.phase("environment").unwrap();
    assert_eq!(env.status, PhaseStatus::Passed);
    assert_eq!(env.details["environment"]["status"], 302);
    assert!(outcome.success);
}

#[tokio::test]
async fn test_empty_screenshot_halts_run() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(BASE, tmp.path());
    let site =
        MockSite::backoffice(BASE, credentials()).with_screenshot_mode(ScreenshotMode::Empty);
    let page = Arc::new(MockPage::new(site));

    let outcome = run(&config, page.clone(), Arc::new(StaticProbe(true))).await;

    assert_eq!(outcome.state, RunState::Aborted);
    assert_eq!(outcome.report.stop_reason.as_deref(), Some("screenshot integrity failure"));
    let auth = outcome.report.phase("authentication").unwrap();
    assert_eq!(auth.status, PhaseStatus::Failed);
    assert!(
        outcome.report.phases[2..]
            .iter()
            .all(|p| p.status == PhaseStatus::Skipped)
    );
    // No phase after the broken capture touched the page again
    assert_eq!(page.screenshot_count(), 1);
}

#[tokio::test]
async fn test_empty_screenshot_without_fail_fast_keeps_running() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(BASE, tmp.path());
    config.policy.fail_fast = false;
    let site =
        MockSite::backoffice(BASE, credentials()).with_screenshot_mode(ScreenshotMode::Empty);

    let outcome = run(&config, Arc::new(MockPage::new(site)), Arc::new(StaticProbe(true))).await;

    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.summary.skipped, 0);
    assert!(outcome.summary.critical_failures > 0);
    assert!(!outcome.success);
}

#[tokio::test]
async fn test_url_change_alone_counts_as_button_response() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(BASE, tmp.path());
    let site = MockSite::backoffice(BASE, credentials()).with_view(
        MockView::new("/admin", "Dashboard")
            .with_nav_links(&["/admin/users"])
            .with_controls(vec![MockControl::new(
                "Open users",
                ControlEffect::Navigate("/admin/users".into()),
            )]),
    );

    let outcome = run(&config, Arc::new(MockPage::new(site)), Arc::new(StaticProbe(true))).await;

    let buttons = outcome.report.phase("buttons").unwrap();
    assert_eq!(buttons.status, PhaseStatus::Passed);
    let control = &buttons.details["validation"]["actual"]["controls"][0];
    assert_eq!(control["urlChanged"], true);
    assert_eq!(control["dialogOpened"], false);
    assert_eq!(control["responded"], true);
    // before, after, closing
    assert_eq!(buttons.screenshots.len(), 3);
}

#[tokio::test]
async fn test_inert_buttons_are_tolerated() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(BASE, tmp.path());
    let site = MockSite::backoffice(BASE, credentials()).with_view(
        MockView::new("/admin", "Dashboard")
            .with_nav_links(&["/admin/users"])
            .with_controls(vec![
                MockControl::new("Refresh", ControlEffect::Inert),
                MockControl::new("Export", ControlEffect::Inert),
            ]),
    );

    let outcome = run(&config, Arc::new(MockPage::new(site)), Arc::new(StaticProbe(true))).await;

    assert_eq!(outcome.report.phase("buttons").unwrap().status, PhaseStatus::Failed);
    assert_eq!(outcome.state, RunState::Completed);
    assert_eq!(outcome.summary.critical_failures, 0);
    assert_eq!(outcome.report.phase("crud-presence").unwrap().status, PhaseStatus::Passed);
    assert!(!outcome.success);
}

#[tokio::test]
async fn test_page_without_controls_warns_in_buttons_phase() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(BASE, tmp.path());
    let site = MockSite::backoffice(BASE, credentials())
        .with_view(MockView::new("/admin", "Dashboard").with_nav_links(&["/admin/users"]));

    let outcome = run(&config, Arc::new(MockPage::new(site)), Arc::new(StaticProbe(true))).await;

    let buttons = outcome.report.phase("buttons").unwrap();
    assert_eq!(buttons.status, PhaseStatus::Passed);
    assert_eq!(buttons.details["warning"], NO_CONTROLS_SAMPLED);
    assert_eq!(buttons.details["validation"]["actual"]["sampled"], 0);
}

#[tokio::test]
async fn test_wrong_password_aborts_at_authentication() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(BASE, tmp.path());
    let site = MockSite::backoffice(
        BASE,
        Credentials {
            email: "admin@example.com".into(),
            password: "something-else".into(),
        },
    );

    let outcome = run(&config, Arc::new(MockPage::new(site)), Arc::new(StaticProbe(true))).await;

    assert_eq!(outcome.state, RunState::Aborted);
    assert_eq!(outcome.report.stop_reason.as_deref(), Some("authentication failed"));
    assert_eq!(outcome.report.phase("authentication").unwrap().status, PhaseStatus::Failed);
    assert_eq!(outcome.report.phase("navigation").unwrap().status, PhaseStatus::Skipped);
}

#[tokio::test]
async fn test_session_reuse_skips_login_and_keeps_page_open() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(BASE, tmp.path());
    config.policy.reuse_session = true;
    let page = Arc::new(MockPage::new(MockSite::backoffice(BASE, credentials())).with_session());

    let outcome = run(&config, page.clone(), Arc::new(StaticProbe(true))).await;

    let auth = outcome.report.phase("authentication").unwrap();
    assert_eq!(auth.status, PhaseStatus::Passed);
    assert_eq!(auth.details["auth"]["reusedSession"], true);
    assert!(outcome.success);
    assert!(!page.is_closed());
}

#[tokio::test]
async fn test_mobile_breakpoint_flags_wide_sidebar() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(BASE, tmp.path());
    config.breakpoints = parse_breakpoints("mobile").unwrap();

    let mobile = LayoutMetrics {
        sidebar: Some(SidebarMetrics {
            width: 240,
            visible: true,
            overlay: false,
        }),
        has_heading: true,
        heading_visible: true,
        table_visible: true,
        table_rows: 10,
        action_buttons: 10,
        visible_action_buttons: 10,
        focusable_count: 20,
        ..Default::default()
    };
    let site = MockSite::backoffice(BASE, credentials()).with_view(
        MockView::new("/admin", "Dashboard")
            .with_nav_links(&["/admin/users"])
            .with_mobile(Some(mobile)),
    );

    let outcome = run(&config, Arc::new(MockPage::new(site)), Arc::new(StaticProbe(true))).await;

    let phase = outcome.report.phase("responsive-mobile").unwrap();
    assert_eq!(phase.status, PhaseStatus::Failed);
    assert!(phase.error.as_deref().unwrap_or_default().contains("sidebar-collapsed"));
    assert_eq!(outcome.report.assessments.len(), 1);
    assert_eq!(outcome.report.assessments[0].layout_type, LayoutType::Table);
}

#[test]
fn test_mobile_assessment_of_collapsed_card_layout() {
    let metrics = LayoutMetrics {
        sidebar: Some(SidebarMetrics {
            width: 64,
            visible: true,
            overlay: false,
        }),
        viewport_width: 375,
        document_width: 375,
        card_count: 8,
        interactive_cards: 8,
        action_buttons: 4,
        focusable_count: 12,
        ..Default::default()
    };
    let assessment = assess(&metrics, &Breakpoint::new(375, 667, "mobile", ""), Vec::new());
    assert!(assessment.passed(), "{}", assessment.failure_summary());
    assert_eq!(assessment.layout_type, LayoutType::Cards);
}

#[tokio::test]
async fn test_totals_stay_consistent_across_scenarios() {
    for (mode, reachable) in [
        (ScreenshotMode::Render, true),
        (ScreenshotMode::Empty, true),
        (ScreenshotMode::Undersized, true),
        (ScreenshotMode::Render, false),
    ] {
        let tmp = tempfile::tempdir().unwrap();
        let config = config(BASE, tmp.path());
        let site = MockSite::backoffice(BASE, credentials()).with_screenshot_mode(mode);
        let page = Arc::new(MockPage::new(site));
        let outcome = run(&config, page, Arc::new(StaticProbe(reachable))).await;
        let s = &outcome.summary;
        assert_eq!(s.total, s.passed + s.failed + s.errors + s.skipped);
        assert_eq!(s.total, outcome.report.phases.len());
    }
}

#[tokio::test]
async fn test_load_sessions_are_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(BASE, tmp.path());
    let launcher: PageLauncher = Arc::new(|_| -> LaunchFuture {
        Box::pin(async {
            let site = MockSite::backoffice(BASE, credentials());
            let page: Arc<dyn PageDriver> = Arc::new(MockPage::new(site));
            Ok(page)
        })
    });

    let outcome = run_load_with(&config, 3, launcher, Arc::new(StaticProbe(true)))
        .await
        .unwrap();

    assert_eq!(outcome.sessions.len(), 3);
    assert!(outcome.all_passed());
    for index in 0..3 {
        assert!(outcome.run_dir.join(format!("session-{}", index)).join("report.json").exists());
    }
    assert!(outcome.run_dir.join("load.json").exists());
}

#[tokio::test]
async fn test_load_sessions_close_their_pages_even_with_reuse_configured() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config(BASE, tmp.path());
    config.policy.reuse_session = true;
    let opened: Arc<Mutex<Vec<Arc<MockPage>>>> = Arc::new(Mutex::new(Vec::new()));
    let pages = opened.clone();
    let launcher: PageLauncher = Arc::new(move |_| -> LaunchFuture {
        let page = Arc::new(MockPage::new(MockSite::backoffice(BASE, credentials())));
        pages.lock().unwrap().push(page.clone());
        Box::pin(async move {
            let page: Arc<dyn PageDriver> = page;
            Ok(page)
        })
    });

    let outcome = run_load_with(&config, 3, launcher, Arc::new(StaticProbe(true)))
        .await
        .unwrap();

    assert!(outcome.all_passed());
    let opened = opened.lock().unwrap();
    assert_eq!(opened.len(), 3);
    assert!(opened.iter().all(|page| page.is_closed()));
}

#[tokio::test]
async fn test_run_log_lands_in_run_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config(BASE, tmp.path());
    let site = MockSite::backoffice(BASE, credentials()).with_view(
        MockView::new("/admin", "Dashboard")
            .with_nav_links(&["/admin/users"])
            .with_console(ConsoleLevel::Error, "TypeError: rows is undefined"),
    );

    let outcome = run(&config, Arc::new(MockPage::new(site)), Arc::new(StaticProbe(true))).await;

    let log = outcome.run_dir().join("logs").join("test.log");
    let text = fs::read_to_string(&log).unwrap();
    assert!(text.contains("run finished"));
    assert!(text.contains("TypeError: rows is undefined"));
    assert!(!tmp.path().join("logs").join("test.log").exists());
}
