//! Scripted page backend for tests and offline demos.
//!
//! `MockSite` models a small backoffice: a login page, protected views with
//! table or card layouts, controls with observable effects, and optional
//! faults (compile errors, slow first builds, broken screenshots). `MockPage`
//! answers every [`PageScript`] from that model and renders screenshots with
//! a [`Wireframe`].

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use super::page::{BrowserEvent, ConsoleLevel, EventSubscription, PageDriver, publish, url_path};
use super::scripts::{
    ControlInfo, CrudControls, InputKind, NavLink, PageScript, is_destructive_label,
};
use super::wireframe::{self, Wireframe};
use crate::analyzer::{LayoutMetrics, SidebarMetrics};
use crate::config::{BreakpointClass, Credentials};
use crate::harness::types::{HarnessError, HarnessResult};

/// What clicking a mock control does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEffect {
    Navigate(String),
    OpenDialog,
    /// No observable effect
    Inert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockControl {
    pub label: String,
    pub effect: ControlEffect,
}

impl MockControl {
    pub fn new(label: &str, effect: ControlEffect) -> Self {
        Self {
            label: label.to_string(),
            effect,
        }
    }
}

/// How screenshots come out of the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotMode {
    Render,
    /// Zero bytes
    Empty,
    /// A valid but tiny PNG
    Undersized,
}

/// One route of the scripted site
#[derive(Debug, Clone)]
pub struct MockView {
    pub path: String,
    pub heading: String,
    pub protected: bool,
    /// Readiness probes answered as "still compiling" on the first visit
    pub compile_ticks: u32,
    pub compile_error: Option<String>,
    pub desktop: LayoutMetrics,
    /// Layout used below 768px, falls back to `desktop`
    pub mobile: Option<LayoutMetrics>,
    pub controls: Vec<MockControl>,
    pub nav_links: Vec<String>,
    pub filters: u32,
    pub crud: CrudControls,
    pub has_form: bool,
    pub form_feedback: bool,
    pub create_opens_form: bool,
    pub api_calls: Vec<String>,
    pub console: Vec<(ConsoleLevel, String)>,
}

impl MockView {
    /// Protected list page with a ten-row table on wide screens and cards on mobile
    pub fn new(path: &str, heading: &str) -> Self {
        let desktop = LayoutMetrics {
            sidebar: Some(SidebarMetrics {
                width: 240,
                visible: true,
                overlay: false,
            }),
            has_heading: true,
            heading_visible: true,
            has_search_input: true,
            search_visible: true,
            table_visible: true,
            table_rows: 10,
            action_buttons: 20,
            visible_action_buttons: 12,
            focusable_count: 32,
            ..Default::default()
        };
        let mobile = LayoutMetrics {
            sidebar: Some(SidebarMetrics {
                width: 240,
                visible: false,
                overlay: false,
            }),
            has_heading: true,
            heading_visible: true,
            has_search_input: true,
            search_visible: true,
            card_count: 10,
            interactive_cards: 10,
            action_buttons: 20,
            menu_affordances: 1,
            focusable_count: 24,
            ..Default::default()
        };
        Self {
            path: path.to_string(),
            heading: heading.to_string(),
            protected: true,
            compile_ticks: 0,
            compile_error: None,
            desktop,
            mobile: Some(mobile),
            controls: Vec::new(),
            nav_links: Vec::new(),
            filters: 1,
            crud: CrudControls {
                create: 1,
                edit: 10,
                delete: 10,
                view: 10,
            },
            has_form: false,
            form_feedback: true,
            create_opens_form: true,
            api_calls: vec![format!("/api{}", path)],
            console: Vec::new(),
        }
    }

    pub fn public(mut self) -> Self {
        self.protected = false;
        self
    }

    pub fn compile_ticks(mut self, ticks: u32) -> Self {
        self.compile_ticks = ticks;
        self
    }

    pub fn compile_error(mut self, message: &str) -> Self {
        self.compile_error = Some(message.to_string());
        self
    }

    pub fn with_desktop(mut self, metrics: LayoutMetrics) -> Self {
        self.desktop = metrics;
        self
    }

    pub fn with_mobile(mut self, metrics: Option<LayoutMetrics>) -> Self {
        self.mobile = metrics;
        self
    }

    pub fn with_controls(mut self, controls: Vec<MockControl>) -> Self {
        self.controls = controls;
        self
    }

    pub fn with_nav_links(mut self, links: &[&str]) -> Self {
        self.nav_links = links.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_filters(mut self, count: u32) -> Self {
        self.filters = count;
        self
    }

    pub fn with_crud(mut self, crud: CrudControls) -> Self {
        self.crud = crud;
        self
    }

    pub fn with_form(mut self, shows_feedback: bool) -> Self {
        self.has_form = true;
        self.form_feedback = shows_feedback;
        self
    }

    pub fn with_api_calls(mut self, calls: &[&str]) -> Self {
        self.api_calls = calls.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_console(mut self, level: ConsoleLevel, text: &str) -> Self {
        self.console.push((level, text.to_string()));
        self
    }

    fn metrics_for(&self, width: u32, height: u32) -> LayoutMetrics {
        let base = match BreakpointClass::from_width(width) {
            BreakpointClass::Mobile => self.mobile.as_ref().unwrap_or(&self.desktop),
            _ => &self.desktop,
        };
        let mut m = base.clone();
        m.viewport_width = width;
        m.viewport_height = height;
        // zero means "fits the viewport"
        if m.document_width == 0 {
            m.document_width = width;
        }
        if m.document_height == 0 {
            m.document_height = height.max(48 + (m.table_rows + m.card_count * 3) * 28);
        }
        m
    }
}

/// The scripted target application
#[derive(Debug, Clone)]
pub struct MockSite {
    pub base_url: String,
    pub login_path: String,
    /// Where a login without a pending target lands
    pub landing_path: String,
    pub credentials: Credentials,
    pub views: BTreeMap<String, MockView>,
    pub screenshot_mode: ScreenshotMode,
    /// Time every `goto` takes before the route is visited
    pub goto_delay: Option<Duration>,
}

impl MockSite {
    pub fn new(base_url: &str, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            login_path: "/login".to_string(),
            landing_path: "/admin".to_string(),
            credentials,
            views: BTreeMap::new(),
            screenshot_mode: ScreenshotMode::Render,
            goto_delay: None,
        }
    }

    /// Dashboard plus two list pages, with one control of each effect kind
    pub fn backoffice(base_url: &str, credentials: Credentials) -> Self {
        let controls = vec![
            MockControl::new("View details", ControlEffect::Navigate("/admin/users/1".to_string())),
            MockControl::new("Quick view", ControlEffect::OpenDialog),
            MockControl::new("Refresh", ControlEffect::Inert),
        ];
        Self::new(base_url, credentials)
            .with_view(
                MockView::new("/admin", "Dashboard")
                    .compile_ticks(2)
                    .with_controls(controls.clone())
                    .with_nav_links(&["/admin/users", "/admin/orders"]),
            )
            .with_view(
                MockView::new("/admin/users", "Users")
                    .with_controls(controls)
                    .with_nav_links(&["/admin", "/admin/orders"]),
            )
            .with_view(
                MockView::new("/admin/orders", "Orders")
                    .compile_ticks(1)
                    .with_nav_links(&["/admin", "/admin/users"]),
            )
            .with_view(
                MockView::new("/admin/users/1", "User detail").with_nav_links(&["/admin/users"]),
            )
    }

    pub fn with_view(mut self, view: MockView) -> Self {
        self.views.insert(view.path.clone(), view);
        self
    }

    pub fn with_screenshot_mode(mut self, mode: ScreenshotMode) -> Self {
        self.screenshot_mode = mode;
        self
    }

    pub fn with_goto_delay(mut self, delay: Duration) -> Self {
        self.goto_delay = Some(delay);
        self
    }

    pub fn with_landing(mut self, path: &str) -> Self {
        self.landing_path = path.to_string();
        self
    }

    pub fn view_mut(&mut self, path: &str) -> Option<&mut MockView> {
        self.views.get_mut(path)
    }
}

#[derive(Debug)]
struct MockState {
    path: String,
    authenticated: bool,
    pending_target: Option<String>,
    typed_email: String,
    typed_password: String,
    search: String,
    viewport: (u32, u32),
    /// Remaining "compiling" probes per route
    ticks: BTreeMap<String, u32>,
    /// Stability probes answered as unsettled after a resize
    settle_ticks: u32,
    dialog_open: bool,
    form_open: bool,
    feedback_shown: bool,
    init_scripts: Vec<String>,
    events: Option<mpsc::UnboundedSender<BrowserEvent>>,
    navigations: u32,
    screenshots: u32,
    closed: bool,
}

/// Page driver answering from a [`MockSite`]
#[derive(Debug)]
pub struct MockPage {
    site: Mutex<MockSite>,
    state: Mutex<MockState>,
}

impl MockPage {
    pub fn new(site: MockSite) -> Self {
        Self {
            site: Mutex::new(site),
            state: Mutex::new(MockState {
                path: "about:blank".to_string(),
                authenticated: false,
                pending_target: None,
                typed_email: String::new(),
                typed_password: String::new(),
                search: String::new(),
                viewport: (1280, 800),
                ticks: BTreeMap::new(),
                settle_ticks: 0,
                dialog_open: false,
                form_open: false,
                feedback_shown: false,
                init_scripts: Vec::new(),
                events: None,
                navigations: 0,
                screenshots: 0,
                closed: false,
            }),
        }
    }

    /// Start with an authenticated session, as if a previous run left one behind
    pub fn with_session(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.authenticated = true;
        }
        self
    }

    pub fn set_screenshot_mode(&self, mode: ScreenshotMode) -> HarnessResult<()> {
        self.site()?.screenshot_mode = mode;
        Ok(())
    }

    /// Mutate the site model mid-run
    pub fn update_site<F: FnOnce(&mut MockSite)>(&self, f: F) -> HarnessResult<()> {
        f(&mut *self.site()?);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(false)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().map(|s| s.authenticated).unwrap_or(false)
    }

    pub fn navigation_count(&self) -> u32 {
        self.state.lock().map(|s| s.navigations).unwrap_or(0)
    }

    pub fn screenshot_count(&self) -> u32 {
        self.state.lock().map(|s| s.screenshots).unwrap_or(0)
    }

    pub fn init_script_count(&self) -> usize {
        self.state.lock().map(|s| s.init_scripts.len()).unwrap_or(0)
    }

    fn site(&self) -> HarnessResult<MutexGuard<'_, MockSite>> {
        self.site
            .lock()
            .map_err(|_| HarnessError::Browser("mock site lock poisoned".to_string()))
    }

    fn state(&self) -> HarnessResult<MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| HarnessError::Browser("mock page lock poisoned".to_string()))
    }

    fn visit(site: &MockSite, state: &mut MockState, path: &str) {
        state.navigations += 1;
        state.dialog_open = false;
        state.form_open = false;
        state.feedback_shown = false;

        let target = match site.views.get(path) {
            Some(view) if view.protected && !state.authenticated => {
                state.pending_target = Some(path.to_string());
                site.login_path.clone()
            }
            _ => path.to_string(),
        };
        state.path = target.clone();

        if let Some(view) = site.views.get(&target) {
            state.ticks.entry(target.clone()).or_insert(view.compile_ticks);
            if let Some(tx) = &state.events {
                for (level, text) in &view.console {
                    publish(tx, BrowserEvent::Console {
                        level: *level,
                        text: text.clone(),
                    });
                }
                for call in &view.api_calls {
                    publish(tx, BrowserEvent::Network {
                        url: format!("{}{}", site.base_url, call),
                        status: 200,
                    });
                }
            }
        }
    }

    fn submit_login(site: &MockSite, state: &mut MockState) -> bool {
        let ok = state.typed_email == site.credentials.email
            && state.typed_password == site.credentials.password;
        if ok {
            state.authenticated = true;
            let next = state
                .pending_target
                .take()
                .unwrap_or_else(|| site.landing_path.clone());
            Self::visit(site, state, &next);
        } else {
            state.feedback_shown = true;
            if let Some(tx) = &state.events {
                publish(tx, BrowserEvent::Network {
                    url: format!("{}/api/auth/login", site.base_url),
                    status: 401,
                });
            }
        }
        ok
    }

    fn answer(site: &MockSite, state: &mut MockState, script: &PageScript) -> Value {
        let on_login = state.path == site.login_path;
        let view = site.views.get(&state.path);
        let (width, height) = state.viewport;

        match script {
            PageScript::Readiness => {
                if on_login {
                    return json!({ "hasContent": true, "readyState": "complete" });
                }
                let Some(view) = view else {
                    return json!({ "hasContent": false, "readyState": "complete" });
                };
                if let Some(message) = &view.compile_error {
                    return json!({
                        "hasError": true,
                        "errorText": message,
                        "hasContent": false,
                        "readyState": "complete",
                    });
                }
                let remaining = state.ticks.entry(view.path.clone()).or_insert(0);
                if *remaining > 0 {
                    *remaining -= 1;
                    return json!({
                        "isLoading": true,
                        "hasContent": false,
                        "readyState": "interactive",
                    });
                }
                json!({ "hasContent": true, "readyState": "complete" })
            }
            PageScript::LayoutStability => {
                if state.settle_ticks > 0 {
                    state.settle_ticks -= 1;
                    json!({ "sampled": 5, "zeroSized": 2 })
                } else {
                    json!({ "sampled": 5, "zeroSized": 0 })
                }
            }
            PageScript::LayoutMetrics => match view {
                Some(view) if !on_login => {
                    serde_json::to_value(view.metrics_for(width, height)).unwrap_or(Value::Null)
                }
                _ => json!({
                    "documentWidth": width,
                    "documentHeight": height,
                    "viewportWidth": width,
                    "viewportHeight": height,
                    "hasHeading": on_login,
                    "headingVisible": on_login,
                    "focusableCount": if on_login { 3 } else { 0 },
                }),
            },
            PageScript::DisableAnimations => json!({ "ok": true }),
            PageScript::FillInput { kind, value } => {
                let ok = match kind {
                    InputKind::Email if on_login => {
                        state.typed_email = value.clone();
                        true
                    }
                    InputKind::Password if on_login => {
                        state.typed_password = value.clone();
                        true
                    }
                    InputKind::Search => match view {
                        Some(v) if v.desktop.has_search_input => {
                            state.search = value.clone();
                            if let Some(tx) = &state.events {
                                publish(tx, BrowserEvent::Network {
                                    url: format!("{}/api{}?q={}", site.base_url, v.path, value),
                                    status: 200,
                                });
                            }
                            true
                        }
                        _ => false,
                    },
                    _ => false,
                };
                json!({ "ok": ok })
            }
            PageScript::SubmitForm => {
                if on_login {
                    Self::submit_login(site, state);
                    json!({ "ok": true })
                } else {
                    json!({ "ok": view.map(|v| v.has_form).unwrap_or(false) })
                }
            }
            PageScript::AuthMarkers => {
                let in_app = !on_login && view.is_some() && state.authenticated;
                let settled = !state.ticks.get(&state.path).is_some_and(|t| *t > 0);
                json!({
                    "loginFormPresent": on_login,
                    "protectedMarkerVisible": in_app,
                    "headingVisible": on_login || (view.is_some() && settled),
                })
            }
            PageScript::DataPresence => match view {
                Some(view) if !on_login => {
                    let m = view.metrics_for(width, height);
                    json!({
                        "dataElements": m.table_rows + m.card_count,
                        "emptyState": m.empty_state,
                        "loadingCleared": true,
                    })
                }
                _ => json!({ "dataElements": 0, "emptyState": false, "loadingCleared": true }),
            },
            PageScript::SampleControls { limit } => {
                let controls: Vec<ControlInfo> = view
                    .map(|v| {
                        v.controls
                            .iter()
                            .enumerate()
                            .filter(|(_, c)| !is_destructive_label(&c.label))
                            .take(*limit)
                            .map(|(index, c)| ControlInfo {
                                index,
                                label: c.label.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                serde_json::to_value(controls).unwrap_or(Value::Null)
            }
            PageScript::ClickControl { index } => {
                let Some(control) = view.and_then(|v| v.controls.get(*index)).cloned() else {
                    return json!({ "ok": false });
                };
                match control.effect {
                    ControlEffect::Navigate(path) => Self::visit(site, state, &path),
                    ControlEffect::OpenDialog => state.dialog_open = true,
                    ControlEffect::Inert => {}
                }
                json!({ "ok": true })
            }
            PageScript::OverlayState => json!({ "dialogOpen": state.dialog_open }),
            PageScript::CloseOverlay => {
                let was_open = state.dialog_open;
                state.dialog_open = false;
                state.form_open = false;
                json!({ "ok": was_open })
            }
            PageScript::FormProbe => {
                let present = view.map(|v| v.has_form).unwrap_or(false) || state.form_open;
                if present {
                    state.feedback_shown = view.map(|v| v.form_feedback).unwrap_or(false);
                }
                json!({ "formPresent": present, "submitted": present })
            }
            PageScript::FormFeedback => json!({ "feedbackShown": state.feedback_shown }),
            PageScript::NavigationLinks => {
                let links: Vec<NavLink> = view
                    .map(|v| {
                        v.nav_links
                            .iter()
                            .enumerate()
                            .map(|(index, href)| NavLink {
                                index,
                                href: format!("{}{}", site.base_url, href),
                                label: href.trim_start_matches('/').to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                serde_json::to_value(links).unwrap_or(Value::Null)
            }
            PageScript::ClickNavLink { index } => {
                let Some(href) = view.and_then(|v| v.nav_links.get(*index)).cloned() else {
                    return json!({ "ok": false });
                };
                Self::visit(site, state, &href);
                json!({ "ok": true })
            }
            PageScript::FilterControls => json!({ "count": view.map(|v| v.filters).unwrap_or(0) }),
            PageScript::ClickFilter => {
                let ok = view.map(|v| v.filters > 0).unwrap_or(false);
                if let (true, Some(tx), Some(v)) = (ok, &state.events, view) {
                    publish(tx, BrowserEvent::Network {
                        url: format!("{}/api{}?filter=1", site.base_url, v.path),
                        status: 200,
                    });
                }
                json!({ "ok": ok })
            }
            PageScript::CrudControls => match view {
                Some(v) if !on_login => serde_json::to_value(&v.crud).unwrap_or(Value::Null),
                _ => json!({}),
            },
            PageScript::ClickCreate => match view {
                Some(v) if v.crud.create > 0 => {
                    if v.create_opens_form {
                        state.form_open = true;
                        state.dialog_open = true;
                    }
                    json!({ "ok": true })
                }
                _ => json!({ "ok": false }),
            },
        }
    }

    fn render(site: &MockSite, state: &MockState) -> Wireframe {
        let (w, h) = state.viewport;
        let mut fb = Wireframe::with_color(w, h, wireframe::BACKGROUND);

        if state.path == site.login_path {
            let (bw, bh) = (w.min(360), 200);
            let (bx, by) = (w.saturating_sub(bw) / 2, h.saturating_sub(bh) / 2);
            fb.draw_rect(bx, by, bw, bh, wireframe::CARD);
            fb.draw_text(bx + 16, by + 16, "Sign in", wireframe::TEXT, wireframe::CARD);
            fb.draw_rect(bx + 16, by + 48, bw.saturating_sub(32), 24, wireframe::ROW);
            fb.draw_rect(bx + 16, by + 88, bw.saturating_sub(32), 24, wireframe::ROW);
            fb.draw_rect(bx + 16, by + 136, bw.saturating_sub(32), 32, wireframe::ACCENT);
            return fb;
        }

        let Some(view) = site.views.get(&state.path) else {
            fb.draw_text(16, 16, "404 Not Found", wireframe::TEXT, wireframe::BACKGROUND);
            return fb;
        };

        if state.ticks.get(&view.path).is_some_and(|t| *t > 0) {
            fb.draw_text(16, 16, "Compiling...", wireframe::TEXT, wireframe::BACKGROUND);
            return fb;
        }

        let m = view.metrics_for(w, h);
        let mut x0 = 0;
        if let Some(sidebar) = m.sidebar.as_ref().filter(|s| s.visible) {
            fb.draw_rect(0, 0, sidebar.width, h, wireframe::SIDEBAR);
            if !sidebar.overlay {
                x0 = sidebar.width;
            }
        }
        let inner = w.saturating_sub(x0 + 32);

        fb.draw_text(x0 + 16, 16, &view.heading, wireframe::TEXT, wireframe::BACKGROUND);
        if m.table_visible {
            for i in 0..m.table_rows.min(h.saturating_sub(80) / 28) {
                fb.draw_rect(x0 + 16, 48 + i * 28, inner, 20, wireframe::ROW);
                fb.draw_rect(
                    x0 + 16 + inner.saturating_sub(48),
                    50 + i * 28,
                    40,
                    16,
                    wireframe::ACCENT,
                );
            }
        } else {
            for i in 0..m.card_count.min(h.saturating_sub(80) / 90) {
                fb.draw_rect(x0 + 16, 48 + i * 90, inner, 80, wireframe::CARD);
                fb.draw_rect(x0 + 16, 48 + i * 90, 4, 80, wireframe::ACCENT);
            }
        }
        if !state.search.is_empty() {
            fb.draw_text(x0 + 16, 32, &state.search, wireframe::ACCENT, wireframe::BACKGROUND);
        }
        fb.draw_text(
            x0 + 16,
            h.saturating_sub(16),
            &view.path,
            wireframe::TEXT,
            wireframe::BACKGROUND,
        );

        if state.dialog_open {
            fb.draw_rect(0, 0, w, h, wireframe::SCRIM);
            let (dw, dh) = (w.min(420), 220);
            fb.draw_rect(
                w.saturating_sub(dw) / 2,
                h.saturating_sub(dh) / 2,
                dw,
                dh,
                wireframe::CARD,
            );
        }
        fb
    }
}

#[async_trait]
impl PageDriver for MockPage {
    async fn goto(&self, url: &str) -> HarnessResult<()> {
        let delay = self.site()?.goto_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let site = self.site()?;
        let mut state = self.state()?;
        if state.closed {
            return Err(HarnessError::Browser("page is closed".to_string()));
        }
        Self::visit(&site, &mut state, &url_path(url));
        Ok(())
    }

    async fn current_url(&self) -> HarnessResult<String> {
        let site = self.site()?;
        let state = self.state()?;
        if state.path.starts_with("about:") {
            return Ok(state.path.clone());
        }
        Ok(format!("{}{}", site.base_url, state.path))
    }

    async fn run(&self, script: &PageScript) -> HarnessResult<Value> {
        let site = self.site()?;
        let mut state = self.state()?;
        if state.closed {
            return Err(HarnessError::Browser("page is closed".to_string()));
        }
        Ok(Self::answer(&site, &mut state, script))
    }

    async fn add_init_script(&self, script: &PageScript) -> HarnessResult<()> {
        self.state()?.init_scripts.push(script.to_js());
        Ok(())
    }

    async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
        let site = self.site()?;
        let mut state = self.state()?;
        state.screenshots += 1;
        match site.screenshot_mode {
            ScreenshotMode::Empty => Ok(Vec::new()),
            ScreenshotMode::Undersized => Wireframe::new(4, 4).to_png(),
            ScreenshotMode::Render => Self::render(&site, &state).to_png(),
        }
    }

    async fn set_viewport(&self, width: u32, height: u32) -> HarnessResult<()> {
        let mut state = self.state()?;
        state.viewport = (width, height);
        state.settle_ticks = 1;
        Ok(())
    }

    async fn wait_for_navigation(&self, _timeout: Duration) -> HarnessResult<()> {
        Ok(())
    }

    async fn subscribe_events(&self) -> HarnessResult<EventSubscription> {
        let (tx, subscription) = EventSubscription::channel();
        self.state()?.events = Some(tx);
        Ok(subscription)
    }

    async fn close(&self) -> HarnessResult<()> {
        self.state()?.closed = true;
        Ok(())
    }

    fn source_type(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::scripts::{Ack, ReadinessProbe, probe};

    fn creds() -> Credentials {
        Credentials {
            email: "admin@example.com".into(),
            password: "secret".into(),
        }
    }

    fn page() -> MockPage {
        MockPage::new(MockSite::backoffice("http://mock.local", creds()))
    }

    #[tokio::test]
    async fn test_protected_route_redirects_to_login() {
        let page = page();
        page.goto("http://mock.local/admin/users").await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "http://mock.local/login");
    }

    #[tokio::test]
    async fn test_login_returns_to_pending_target() {
        let page = page();
        page.goto("http://mock.local/admin/users").await.unwrap();
        let fields = [(InputKind::Email, "admin@example.com"), (InputKind::Password, "secret")];
        for (kind, value) in fields {
            let fill = PageScript::FillInput { kind, value: value.into() };
            let ack: Ack = probe(&page, &fill).await.unwrap();
            assert!(ack.ok);
        }
        page.run(&PageScript::SubmitForm).await.unwrap();
        assert!(page.is_authenticated());
        assert_eq!(page.current_url().await.unwrap(), "http://mock.local/admin/users");
    }

    #[tokio::test]
    async fn test_compile_ticks_then_ready() {
        let page = page().with_session();
        page.goto("http://mock.local/admin").await.unwrap();
        let first: ReadinessProbe = probe(&page, &PageScript::Readiness).await.unwrap();
        assert!(first.is_loading);
        let _ = page.run(&PageScript::Readiness).await.unwrap();
        let third: ReadinessProbe = probe(&page, &PageScript::Readiness).await.unwrap();
        assert!(third.is_ready());
    }

    #[tokio::test]
    async fn test_screenshot_changes_when_dialog_opens() {
        let page = page().with_session();
        page.goto("http://mock.local/admin/users").await.unwrap();
        let before = page.screenshot().await.unwrap();
        page.run(&PageScript::ClickControl { index: 1 }).await.unwrap();
        let after = page.screenshot().await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn test_sampling_leaves_destructive_controls_alone() {
        let site = MockSite::backoffice("http://mock.local", creds()).with_view(
            MockView::new("/admin/orders", "Orders").with_controls(vec![
                MockControl::new("Delete order", ControlEffect::OpenDialog),
                MockControl::new("Refresh", ControlEffect::Inert),
                MockControl::new("Remove filter", ControlEffect::Inert),
            ]),
        );
        let page = MockPage::new(site).with_session();
        page.goto("http://mock.local/admin/orders").await.unwrap();
        let sampled: Vec<ControlInfo> =
            probe(&page, &PageScript::SampleControls { limit: 5 }).await.unwrap();
        assert_eq!(
            sampled,
            vec![ControlInfo {
                index: 1,
                label: "Refresh".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_empty_screenshot_mode() {
        let page = page();
        page.set_screenshot_mode(ScreenshotMode::Empty).unwrap();
        assert!(page.screenshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let page = page()
            .with_session();
        page.update_site(|site| {
            if let Some(view) = site.view_mut("/admin/users") {
                view.console.push((ConsoleLevel::Error, "boom".into()));
            }
        })
        .unwrap();
        let mut sub = page.subscribe_events().await.unwrap();
        page.goto("http://mock.local/admin/users").await.unwrap();
        let events = sub.drain();
        let is_console_error = |e: &BrowserEvent| {
            matches!(e, BrowserEvent::Console { level: ConsoleLevel::Error, .. })
        };
        assert!(events.iter().any(is_console_error));
        assert!(events.iter().any(|e| matches!(e, BrowserEvent::Network { status: 200, .. })));
    }
}
