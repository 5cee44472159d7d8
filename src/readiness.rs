//! Readiness poller.
//!
//! Every wait is a bounded polling loop. Page readiness asks the page for
//! error, loading, content and load-state signals on each tick; the budget is
//! long until a route of the same kind has been confirmed ready in this run,
//! short afterwards. Layout stabilization after a resize has its own, shorter
//! budget.

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::TimingSettings;
use crate::driver::scripts::{ReadinessProbe, StabilityProbe};
use crate::driver::{PageDriver, PageScript, probe, route_kind};
use crate::harness::types::{HarnessError, HarnessResult, RunContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimingRegime {
    /// Build/compile may still be running
    FirstAccess,
    Warm,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessReport {
    pub url: String,
    pub ready: bool,
    pub attempts: u32,
    pub max_attempts: u32,
    pub elapsed_ms: u64,
    pub regime: TimingRegime,
    /// This wait ended the run's first-access regime
    pub ended_first_access: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityReport {
    pub stable: bool,
    pub attempts: u32,
    pub max_attempts: u32,
    pub elapsed_ms: u64,
}

/// Wait until the current page shows real content.
///
/// A compile/build error returns [`HarnessError::CompileError`] on the first
/// tick that sees it. Exhausting the budget only warns; callers decide
/// whether unconfirmed readiness fails their phase.
pub async fn wait_for_page_ready<P>(
    page: &P,
    ctx: &mut RunContext,
    timing: &TimingSettings,
) -> HarnessResult<ReadinessReport>
where
    P: PageDriver + ?Sized,
{
    let url = page.current_url().await?;
    let kind = route_kind(&url);
    let regime = if ctx.is_warm(&kind) {
        TimingRegime::Warm
    } else {
        TimingRegime::FirstAccess
    };
    let budget_ms = match regime {
        TimingRegime::FirstAccess => timing.first_access_timeout_ms,
        TimingRegime::Warm => timing.subsequent_access_timeout_ms,
    };
    let max_attempts = timing.attempts_for(budget_ms);
    let started = Instant::now();

    let mut attempts = 0;
    while attempts < max_attempts {
        attempts += 1;
        let state: ReadinessProbe = probe(page, &PageScript::Readiness).await?;

        if state.has_error {
            error!(url = %url, text = %state.error_text, "compile error on page");
            return Err(HarnessError::CompileError(if state.error_text.is_empty() {
                url
            } else {
                state.error_text
            }));
        }

        if state.is_ready() {
            let ended_first_access = ctx.mark_ready(&kind);
            let elapsed_ms = started.elapsed().as_millis() as u64;
            info!(url = %url, attempts, elapsed_ms, ?regime, "page ready");
            return Ok(ReadinessReport {
                url,
                ready: true,
                attempts,
                max_attempts,
                elapsed_ms,
                regime,
                ended_first_access,
            });
        }

        debug!(
            attempt = attempts,
            loading = state.is_loading,
            content = state.has_content,
            "page not ready"
        );
        if attempts < max_attempts {
            tokio::time::sleep(timing.poll_interval()).await;
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    warn!(url = %url, attempts, elapsed_ms, "page readiness not confirmed within budget");
    Ok(ReadinessReport {
        url,
        ready: false,
        attempts,
        max_attempts,
        elapsed_ms,
        regime,
        ended_first_access: false,
    })
}

/// Wait for sampled structural elements to report non-zero size after a
/// viewport change. A timeout is a warning.
pub async fn wait_for_layout_stable<P>(
    page: &P,
    timing: &TimingSettings,
) -> HarnessResult<StabilityReport>
where
    P: PageDriver + ?Sized,
{
    let max_attempts = timing.attempts_for(timing.responsive_timeout_ms);
    let started = Instant::now();

    let mut attempts = 0;
    while attempts < max_attempts {
        attempts += 1;
        let state: StabilityProbe = probe(page, &PageScript::LayoutStability).await?;
        if state.is_stable() {
            return Ok(StabilityReport {
                stable: true,
                attempts,
                max_attempts,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }
        if attempts < max_attempts {
            tokio::time::sleep(timing.poll_interval()).await;
        }
    }

    warn!(attempts, "layout did not stabilize after resize");
    Ok(StabilityReport {
        stable: false,
        attempts,
        max_attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Credentials};
    use crate::driver::{MockPage, MockSite, MockView};

    fn setup(site: MockSite) -> (MockPage, RunContext, TimingSettings) {
        let ctx = RunContext::new("t", &Config::defaults());
        (MockPage::new(site).with_session(), ctx, TimingSettings::fast())
    }

    fn site() -> MockSite {
        MockSite::backoffice("http://mock.local", Credentials::default())
    }

    #[tokio::test]
    async fn test_ready_after_compile_ticks_flips_first_access() {
        let (page, mut ctx, timing) = setup(site());
        page.goto("http://mock.local/admin").await.unwrap();
        assert!(ctx.first_access());

        let report = wait_for_page_ready(&page, &mut ctx, &timing).await.unwrap();
        assert!(report.ready);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.regime, TimingRegime::FirstAccess);
        assert!(report.ended_first_access);
        assert!(!ctx.first_access());

        page.goto("http://mock.local/admin").await.unwrap();
        let again = wait_for_page_ready(&page, &mut ctx, &timing).await.unwrap();
        assert_eq!(again.regime, TimingRegime::Warm);
        assert!(!again.ended_first_access);
    }

    #[tokio::test]
    async fn test_new_route_kind_gets_long_budget() {
        let (page, mut ctx, timing) = setup(site());
        page.goto("http://mock.local/admin").await.unwrap();
        wait_for_page_ready(&page, &mut ctx, &timing).await.unwrap();

        page.goto("http://mock.local/admin/orders").await.unwrap();
        let report = wait_for_page_ready(&page, &mut ctx, &timing).await.unwrap();
        assert_eq!(report.regime, TimingRegime::FirstAccess);
        assert_eq!(report.max_attempts, timing.attempts_for(timing.first_access_timeout_ms));
    }

    #[tokio::test]
    async fn test_compile_error_is_not_retried() {
        let broken = MockView::new("/admin/broken", "Broken").compile_error("Failed to compile");
        let site = site().with_view(broken);
        let (page, mut ctx, timing) = setup(site);
        page.goto("http://mock.local/admin/broken").await.unwrap();

        let err = wait_for_page_ready(&page, &mut ctx, &timing).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::CompileError(ref t) if t.contains("Failed to compile")
        ));
        assert!(ctx.first_access());
    }

    #[tokio::test]
    async fn test_exhaustion_warns_and_respects_budget() {
        let site = site().with_view(MockView::new("/admin/slow", "Slow").compile_ticks(10_000));
        let (page, mut ctx, timing) = setup(site);
        page.goto("http://mock.local/admin/slow").await.unwrap();

        let report = wait_for_page_ready(&page, &mut ctx, &timing).await.unwrap();
        assert!(!report.ready);
        assert_eq!(report.attempts, report.max_attempts);
        assert_eq!(report.max_attempts, timing.attempts_for(timing.first_access_timeout_ms));
        assert!(ctx.first_access());
    }

    #[tokio::test]
    async fn test_layout_stabilizes_after_resize() {
        let (page, _ctx, timing) = setup(site());
        page.goto("http://mock.local/admin/users").await.unwrap();
        page.set_viewport(375, 667).await.unwrap();
        let report = wait_for_layout_stable(&page, &timing).await.unwrap();
        assert!(report.stable);
        assert_eq!(report.attempts, 2);
    }
}
