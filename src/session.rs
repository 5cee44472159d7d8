//! Session driver.
//!
//! Owns the page handle for a run: setup, credential submission, optional
//! session reuse, navigation, viewport changes and release.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Breakpoint, Config, TimingSettings};
use crate::driver::scripts::{Ack, AuthMarkers};
use crate::driver::{
    EventSubscription, InputKind, PageDriver, PageScript, goto_within, probe, url_path,
};
use crate::harness::types::{HarnessError, HarnessResult, RunContext};
use crate::readiness::{
    ReadinessReport, StabilityReport, wait_for_layout_stable, wait_for_page_ready,
};

/// Viewport used until the responsive sweep starts
pub const INITIAL_VIEWPORT: (u32, u32) = (1280, 800);

/// What happened while authenticating
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOutcome {
    pub login_form_present: bool,
    pub submitted: bool,
    pub left_login_path: bool,
    pub protected_marker_visible: bool,
    /// An existing session satisfied the protected route
    pub reused_session: bool,
    pub landing_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationOutcome {
    pub url: String,
    pub readiness: ReadinessReport,
}

pub struct SessionDriver {
    page: Arc<dyn PageDriver>,
    login_path: String,
    timing: TimingSettings,
    reuse_session: bool,
    released: bool,
}

impl SessionDriver {
    pub fn new(page: Arc<dyn PageDriver>, config: &Config) -> Self {
        Self {
            page,
            login_path: config.target.login_path.clone(),
            timing: config.timing.clone(),
            reuse_session: config.policy.reuse_session,
            released: false,
        }
    }

    pub fn page(&self) -> &dyn PageDriver {
        self.page.as_ref()
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.navigation_timeout_ms)
    }

    fn on_login_path(&self, url: &str) -> bool {
        url_path(url).trim_end_matches('/') == self.login_path.trim_end_matches('/')
    }

    /// Freeze animations, set the initial viewport and open the event stream
    pub async fn setup(&self) -> HarnessResult<EventSubscription> {
        self.page.add_init_script(&PageScript::DisableAnimations).await?;
        self.page
            .set_viewport(INITIAL_VIEWPORT.0, INITIAL_VIEWPORT.1)
            .await?;
        let subscription = self.page.subscribe_events().await?;
        info!(backend = self.page.source_type(), "session ready");
        Ok(subscription)
    }

    /// Navigate to `target_url`, fill the credential form it redirects to and
    /// submit it.
    pub async fn authenticate(
        &self,
        ctx: &mut RunContext,
        target_url: &str,
    ) -> HarnessResult<AuthOutcome> {
        goto_within(self.page(), target_url, self.navigation_timeout()).await?;
        wait_for_page_ready(self.page(), ctx, &self.timing).await?;

        let url = self.page.current_url().await?;
        if !self.on_login_path(&url) {
            let markers: AuthMarkers = probe(self.page(), &PageScript::AuthMarkers).await?;
            if markers.protected_marker_visible && !markers.login_form_present {
                info!(url = %url, "no login redirect, session already authenticated");
                return Ok(AuthOutcome {
                    left_login_path: true,
                    protected_marker_visible: true,
                    reused_session: true,
                    landing_url: url,
                    ..Default::default()
                });
            }
            return Err(HarnessError::AuthenticationFailed(format!(
                "expected redirect to {}, landed on {}",
                self.login_path, url
            )));
        }

        let credentials = ctx.credentials.clone();
        for (kind, value) in [
            (InputKind::Email, credentials.email),
            (InputKind::Password, credentials.password),
        ] {
            let ack: Ack = probe(self.page(), &PageScript::FillInput { kind, value }).await?;
            if !ack.ok {
                return Err(HarnessError::AuthenticationFailed(format!(
                    "{:?} field not found on login form",
                    kind
                )));
            }
        }

        let ack: Ack = probe(self.page(), &PageScript::SubmitForm).await?;
        if !ack.ok {
            return Err(HarnessError::AuthenticationFailed(
                "login form could not be submitted".to_string(),
            ));
        }
        let auth_timeout = Duration::from_millis(self.timing.auth_timeout_ms);
        if let Err(e) = self.page.wait_for_navigation(auth_timeout).await {
            warn!(error = %e, "no navigation signal after login submit");
        }

        let mut landing = self.page.current_url().await?;
        let max_attempts = self.timing.attempts_for(self.timing.auth_timeout_ms);
        let mut attempts = 1;
        while self.on_login_path(&landing) && attempts < max_attempts {
            tokio::time::sleep(self.timing.poll_interval()).await;
            landing = self.page.current_url().await?;
            attempts += 1;
        }
        if self.on_login_path(&landing) {
            return Err(HarnessError::AuthenticationFailed(format!(
                "still on {} after submitting credentials",
                self.login_path
            )));
        }

        wait_for_page_ready(self.page(), ctx, &self.timing).await?;
        let markers: AuthMarkers = probe(self.page(), &PageScript::AuthMarkers).await?;
        info!(url = %landing, marker = markers.protected_marker_visible, "authenticated");

        Ok(AuthOutcome {
            login_form_present: true,
            submitted: true,
            left_login_path: true,
            protected_marker_visible: markers.protected_marker_visible,
            reused_session: false,
            landing_url: landing,
        })
    }

    /// Check whether a previous session still grants access to `target_url`.
    ///
    /// Requires both a protected URL and a visible content marker; the URL
    /// alone is not trusted.
    pub async fn try_reuse_session(
        &self,
        ctx: &mut RunContext,
        target_url: &str,
    ) -> HarnessResult<bool> {
        goto_within(self.page(), target_url, self.navigation_timeout()).await?;
        let url = self.page.current_url().await?;
        if self.on_login_path(&url) {
            info!("no reusable session, login required");
            return Ok(false);
        }

        let readiness = wait_for_page_ready(self.page(), ctx, &self.timing).await?;
        if !readiness.ready {
            return Ok(false);
        }

        let max_attempts = self.timing.attempts_for(self.timing.subsequent_access_timeout_ms);
        for attempt in 1..=max_attempts {
            let markers: AuthMarkers = probe(self.page(), &PageScript::AuthMarkers).await?;
            if markers.login_form_present {
                return Ok(false);
            }
            if markers.heading_visible {
                info!(url = %url, "reusing authenticated session");
                return Ok(true);
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.timing.poll_interval()).await;
            }
        }
        warn!(url = %url, "protected URL reached but no content marker appeared");
        Ok(false)
    }

    pub async fn navigate(
        &self,
        ctx: &mut RunContext,
        path: &str,
    ) -> HarnessResult<NavigationOutcome> {
        let target = ctx.url_for(path);
        goto_within(self.page(), &target, self.navigation_timeout()).await?;
        let readiness = wait_for_page_ready(self.page(), ctx, &self.timing).await?;
        Ok(NavigationOutcome {
            url: self.page.current_url().await?,
            readiness,
        })
    }

    /// Wait for the page after an in-page navigation (link click)
    pub async fn settle(&self, ctx: &mut RunContext) -> HarnessResult<ReadinessReport> {
        wait_for_page_ready(self.page(), ctx, &self.timing).await
    }

    pub async fn set_breakpoint(&self, breakpoint: &Breakpoint) -> HarnessResult<StabilityReport> {
        self.page.set_viewport(breakpoint.width, breakpoint.height).await?;
        wait_for_layout_stable(self.page(), &self.timing).await
    }

    /// Release the page. Kept open when session reuse is configured.
    /// Returns whether the page was closed.
    pub async fn shutdown(&mut self) -> HarnessResult<bool> {
        if self.released {
            return Ok(false);
        }
        self.released = true;
        if self.reuse_session {
            info!("keeping browser open for session reuse");
            return Ok(false);
        }
        self.page.close().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::driver::{MockPage, MockSite};

    fn creds() -> Credentials {
        Credentials {
            email: "admin@example.com".into(),
            password: "secret".into(),
        }
    }

    fn cfg(password: &str, reuse: bool) -> Config {
        let mut config = Config::defaults();
        config.target.base_url = "http://mock.local".into();
        config.target.credentials = Credentials {
            email: "admin@example.com".into(),
            password: password.into(),
        };
        config.policy.reuse_session = reuse;
        config.timing = TimingSettings::fast();
        config
    }

    fn site() -> MockSite {
        MockSite::backoffice("http://mock.local", creds())
    }

    fn driver(page: MockPage, config: &Config) -> (Arc<MockPage>, SessionDriver, RunContext) {
        let page = Arc::new(page);
        let session = SessionDriver::new(page.clone(), config);
        (page, session, RunContext::new("t", config))
    }

    #[tokio::test]
    async fn test_authenticate_with_valid_credentials() {
        let config = cfg("secret", false);
        let (page, session, mut ctx) = driver(MockPage::new(site()), &config);
        session.setup().await.unwrap();
        assert_eq!(page.init_script_count(), 1);

        let outcome = session.authenticate(&mut ctx, "http://mock.local/admin").await.unwrap();
        assert!(outcome.login_form_present);
        assert!(outcome.left_login_path);
        assert!(outcome.protected_marker_visible);
        assert_eq!(outcome.landing_url, "http://mock.local/admin");
        assert!(!ctx.first_access());
    }

    #[tokio::test]
    async fn test_authenticate_with_wrong_password_fails() {
        let config = cfg("wrong", false);
        let (_page, session, mut ctx) = driver(MockPage::new(site()), &config);
        let err = session.authenticate(&mut ctx, "http://mock.local/admin").await.unwrap_err();
        assert!(matches!(err, HarnessError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_reuse_requires_content_marker() {
        let config = cfg("secret", true);
        let (_page, session, mut ctx) = driver(MockPage::new(site()).with_session(), &config);
        assert!(session.try_reuse_session(&mut ctx, "http://mock.local/admin").await.unwrap());

        let (_page, session, mut ctx) = driver(MockPage::new(site()), &config);
        assert!(!session.try_reuse_session(&mut ctx, "http://mock.local/admin").await.unwrap());
    }

    #[tokio::test]
    async fn test_navigation_budget_bounds_slow_goto() {
        let mut config = cfg("secret", false);
        config.timing.navigation_timeout_ms = 20;
        let slow = site().with_goto_delay(Duration::from_millis(500));
        let (page, session, mut ctx) = driver(MockPage::new(slow).with_session(), &config);

        let err = session.navigate(&mut ctx, "/admin/users").await.unwrap_err();
        assert!(matches!(err, HarnessError::Timeout(_)), "{}", err);
        assert_eq!(page.navigation_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_defers_close_when_reusing() {
        let config = cfg("secret", true);
        let (page, mut session, _ctx) = driver(MockPage::new(site()), &config);
        assert!(!session.shutdown().await.unwrap());
        assert!(!page.is_closed());

        let config = cfg("secret", false);
        let (page, mut session, _ctx) = driver(MockPage::new(site()), &config);
        assert!(session.shutdown().await.unwrap());
        assert!(page.is_closed());
        assert!(!session.shutdown().await.unwrap());
    }
}
