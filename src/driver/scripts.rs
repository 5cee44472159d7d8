//! In-page probes and interactions.
//!
//! Selectors are fallback chains over structural markers (roles, landmarks,
//! input types) so the probes keep working while the target's markup evolves.
//! Interactions return `{ ok }`; probes return the shapes defined below.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::page::PageDriver;
use crate::harness::types::HarnessResult;

/// Input located by role/type rather than by id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Email,
    Password,
    Search,
}

impl InputKind {
    pub fn selector(&self) -> &'static str {
        match self {
            InputKind::Email => concat!(
                r#"input[type="email"], input[name="email"], input[autocomplete="username"], "#,
                r#"input[name="username"], input[type="text"]"#
            ),
            InputKind::Password => r#"input[type="password"]"#,
            InputKind::Search => SEARCH_SELECTOR,
        }
    }
}

const SEARCH_SELECTOR: &str = concat!(
    r#"input[type="search"], [role="searchbox"], input[placeholder*="earch" i], "#,
    r#"input[placeholder*="uscar" i], input[name*="search" i], input[aria-label*="search" i]"#
);

/// Control labels never clicked while sampling
pub const DESTRUCTIVE_WORDS: &[&str] =
    &["delete", "remove", "destroy", "eliminar", "borrar", "quitar"];

const DESTRUCTIVE_PATTERN: &str = "delete|remove|destroy|eliminar|borrar|quitar";

/// True when a sampled control would delete or remove something
pub fn is_destructive_label(label: &str) -> bool {
    let label = label.to_lowercase();
    DESTRUCTIVE_WORDS.iter().any(|w| label.contains(w))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageScript {
    Readiness,
    LayoutStability,
    LayoutMetrics,
    DisableAnimations,
    FillInput { kind: InputKind, value: String },
    SubmitForm,
    AuthMarkers,
    DataPresence,
    SampleControls { limit: usize },
    ClickControl { index: usize },
    OverlayState,
    CloseOverlay,
    /// Submit the first non-login form on the page
    FormProbe,
    FormFeedback,
    NavigationLinks,
    ClickNavLink { index: usize },
    FilterControls,
    ClickFilter,
    CrudControls,
    ClickCreate,
}

impl PageScript {
    pub fn name(&self) -> &'static str {
        match self {
            PageScript::Readiness => "readiness",
            PageScript::LayoutStability => "layout-stability",
            PageScript::LayoutMetrics => "layout-metrics",
            PageScript::DisableAnimations => "disable-animations",
            PageScript::FillInput { .. } => "fill-input",
            PageScript::SubmitForm => "submit-form",
            PageScript::AuthMarkers => "auth-markers",
            PageScript::DataPresence => "data-presence",
            PageScript::SampleControls { .. } => "sample-controls",
            PageScript::ClickControl { .. } => "click-control",
            PageScript::OverlayState => "overlay-state",
            PageScript::CloseOverlay => "close-overlay",
            PageScript::FormProbe => "form-probe",
            PageScript::FormFeedback => "form-feedback",
            PageScript::NavigationLinks => "navigation-links",
            PageScript::ClickNavLink { .. } => "click-nav-link",
            PageScript::FilterControls => "filter-controls",
            PageScript::ClickFilter => "click-filter",
            PageScript::CrudControls => "crud-controls",
            PageScript::ClickCreate => "click-create",
        }
    }

    /// Render the JavaScript expression evaluated in the page
    pub fn to_js(&self) -> String {
        let body = match self {
            PageScript::Readiness => READINESS_JS.to_string(),
            PageScript::LayoutStability => LAYOUT_STABILITY_JS.to_string(),
            PageScript::LayoutMetrics => {
                LAYOUT_METRICS_JS.replace("__SEARCH__", &js_string(SEARCH_SELECTOR))
            }
            PageScript::DisableAnimations => DISABLE_ANIMATIONS_JS.to_string(),
            PageScript::FillInput { kind, value } => FILL_INPUT_JS
                .replace("__SELECTOR__", &js_string(kind.selector()))
                .replace("__VALUE__", &js_string(value)),
            PageScript::SubmitForm => SUBMIT_FORM_JS.to_string(),
            PageScript::AuthMarkers => AUTH_MARKERS_JS.to_string(),
            PageScript::DataPresence => DATA_PRESENCE_JS.to_string(),
            PageScript::SampleControls { limit } => {
                SAMPLE_CONTROLS_JS
                    .replace("__LIMIT__", &limit.to_string())
                    .replace("__DESTRUCTIVE__", &js_string(DESTRUCTIVE_PATTERN))
            }
            PageScript::ClickControl { index } => click_tagged("data-harness-control", *index),
            PageScript::OverlayState => OVERLAY_STATE_JS.to_string(),
            PageScript::CloseOverlay => CLOSE_OVERLAY_JS.to_string(),
            PageScript::FormProbe => FORM_PROBE_JS.to_string(),
            PageScript::FormFeedback => FORM_FEEDBACK_JS.to_string(),
            PageScript::NavigationLinks => NAVIGATION_LINKS_JS.to_string(),
            PageScript::ClickNavLink { index } => click_tagged("data-harness-nav", *index),
            PageScript::FilterControls => FILTER_CONTROLS_JS.to_string(),
            PageScript::ClickFilter => CLICK_FILTER_JS.to_string(),
            PageScript::CrudControls => CRUD_CONTROLS_JS.to_string(),
            PageScript::ClickCreate => click_tagged("data-harness-create", 0),
        };
        body.replace("__HELPERS__", HELPERS_JS)
    }
}

/// Run a script and decode its result. `null` decodes to the default value.
pub async fn probe<T, P>(page: &P, script: &PageScript) -> HarnessResult<T>
where
    T: DeserializeOwned + Default,
    P: PageDriver + ?Sized,
{
    let value = page.run(script).await?;
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value)?)
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn click_tagged(attribute: &str, index: usize) -> String {
    format!(
        "(() => {{ const el = document.querySelector('[{attr}=\"{index}\"]'); \
         if (!el) return {{ ok: false }}; el.click(); return {{ ok: true }}; }})()",
        attr = attribute,
        index = index
    )
}

// ============================================================================
// Probe result shapes
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadinessProbe {
    pub has_error: bool,
    pub error_text: String,
    pub is_loading: bool,
    pub has_content: bool,
    pub ready_state: String,
}

impl ReadinessProbe {
    /// content AND load complete AND NOT loading
    pub fn is_ready(&self) -> bool {
        self.has_content && self.ready_state == "complete" && !self.is_loading
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StabilityProbe {
    pub sampled: u32,
    pub zero_sized: u32,
}

impl StabilityProbe {
    pub fn is_stable(&self) -> bool {
        self.sampled > 0 && self.zero_sized == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthMarkers {
    pub login_form_present: bool,
    pub protected_marker_visible: bool,
    pub heading_visible: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataPresence {
    pub data_elements: u32,
    pub empty_state: bool,
    pub loading_cleared: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlInfo {
    pub index: usize,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlayState {
    pub dialog_open: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormProbe {
    pub form_present: bool,
    pub submitted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedbackState {
    pub feedback_shown: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavLink {
    pub index: usize,
    pub href: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterControls {
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrudControls {
    pub create: u32,
    pub edit: u32,
    pub delete: u32,
    pub view: u32,
}

// ============================================================================
// Scripts
// ============================================================================

const HELPERS_JS: &str = r#"
  const visible = (el) => {
    if (!el) return false;
    const s = getComputedStyle(el);
    if (s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  };
  const inViewport = (el) => {
    const r = el.getBoundingClientRect();
    return r.bottom > 0 && r.right > 0 && r.top < innerHeight && r.left < innerWidth;
  };
  const bodyText = () => (document.body && document.body.innerText) || '';
  const label = (el) => ((el.textContent || '') + ' ' + (el.getAttribute('aria-label') || '') + ' ' + (el.getAttribute('title') || '')).toLowerCase();
  const emptyState = () => !!Array.from(document.querySelectorAll('[data-empty], .empty-state, [class*="empty" i]')).find(visible)
    || /no (results|records|data|items)|sin (resultados|registros|datos)/i.test(bodyText());
"#;

// Error overlays only exist while a build is broken. The Next.js portal host is
// mounted on every dev page, so only the dialog inside its shadow root counts.
const READINESS_JS: &str = r#"(() => {
  __HELPERS__
  const portal = document.querySelector('nextjs-portal');
  const overlay = (portal && portal.shadowRoot && portal.shadowRoot.querySelector('[data-nextjs-dialog], [data-nextjs-dialog-overlay]'))
    || document.querySelector('vite-error-overlay, #webpack-dev-server-client-overlay, [data-testid="compile-error"]');
  const overlayText = overlay ? ((overlay.shadowRoot && overlay.shadowRoot.textContent) || overlay.textContent || '') : '';
  const errorText = overlay ? (overlayText.trim() || 'error overlay').slice(0, 300) : '';
  const indicator = (portal && portal.shadowRoot && portal.shadowRoot.querySelector('[data-nextjs-build-indicator], [data-nextjs-toast]'))
    || document.querySelector('#__next-build-watcher, [data-testid="build-indicator"]');
  const building = !!indicator && /\bCompiling\b|\bBuilding\b/.test(indicator.textContent || '');
  const loadingNode = Array.from(document.querySelectorAll('[aria-busy="true"], .loading, .spinner, [data-loading="true"], [role="progressbar"]')).find(visible);
  const isLoading = !!loadingNode || building;
  const heading = document.querySelector('h1, h2, [role="heading"]');
  const main = document.querySelector('main, [role="main"], #root > *, #__next > *');
  const data = document.querySelector('table, [role="grid"], [data-card], .card');
  const hasContent = !!(heading && heading.textContent.trim().length > 0)
    || !!(main && main.innerText && main.innerText.trim().length > 20)
    || !!(data && data.innerText && data.innerText.trim().length > 0);
  return { hasError: !!overlay, errorText, isLoading, hasContent, readyState: document.readyState };
})()"#;

const LAYOUT_STABILITY_JS: &str = r#"(() => {
  const nodes = Array.from(document.querySelectorAll('main, nav, aside, header, table, [data-card], .card'))
    .filter(n => { const s = getComputedStyle(n); return s.display !== 'none' && s.visibility !== 'hidden'; })
    .slice(0, 25);
  const zeroSized = nodes.filter(n => { const r = n.getBoundingClientRect(); return r.width === 0 || r.height === 0; }).length;
  return { sampled: nodes.length, zeroSized };
})()"#;

const LAYOUT_METRICS_JS: &str = r#"(() => {
  __HELPERS__
  const doc = document.documentElement;
  const body = document.body || doc;
  // A sidebar is a vertical rail; collapsed ones are hidden and still count
  const isRail = (el) => {
    if (!visible(el)) return true;
    const r = el.getBoundingClientRect();
    return r.height >= innerHeight * 0.5 && (r.width < innerWidth || getComputedStyle(el).position === 'fixed');
  };
  const sidebarEl = ['aside', '[data-sidebar]', '[class*="sidebar" i]', 'nav[aria-label*="side" i]', '[role="navigation"][aria-orientation="vertical"]']
    .flatMap(s => Array.from(document.querySelectorAll(s))).find(isRail);
  let sidebar = null;
  if (sidebarEl) {
    const r = sidebarEl.getBoundingClientRect();
    const s = getComputedStyle(sidebarEl);
    sidebar = { width: Math.round(r.width), visible: visible(sidebarEl) && r.right > 0, overlay: s.position === 'fixed' && r.width >= innerWidth * 0.6 };
  }
  const heading = document.querySelector('h1, [role="heading"][aria-level="1"], h2');
  const search = document.querySelector(__SEARCH__);
  const table = Array.from(document.querySelectorAll('table, [role="grid"], [role="table"]')).find(visible) || null;
  const tableRows = table ? Array.from(table.querySelectorAll('tbody tr, [role="row"]')).filter(r => !r.querySelector('th') && visible(r)).length : 0;
  const cards = Array.from(document.querySelectorAll('[data-card], .card, [class*="card" i]')).filter(visible);
  const interactiveCards = cards.filter(c => c.matches('a, button, [role="button"], [tabindex], [onclick]')
    || c.querySelector('button, a, [role="button"], [aria-expanded], details, summary')).length;
  const actionRe = /\b(edit|delete|remove|open|view|details|editar|eliminar|ver|abrir)\b/;
  const actions = Array.from(document.querySelectorAll('button, a, [role="button"]')).filter(el => actionRe.test(label(el)));
  const visibleActionButtons = actions.filter(el => visible(el) && inViewport(el)).length;
  const menuAffordances = Array.from(document.querySelectorAll('[aria-haspopup], [aria-expanded], details > summary, [data-menu]'))
    .filter(el => visible(el) && inViewport(el)).length;
  const focusableCount = Array.from(document.querySelectorAll('a[href], button, input, select, textarea, [tabindex]:not([tabindex="-1"])'))
    .filter(el => !el.disabled && visible(el)).length;
  return {
    documentWidth: Math.max(doc.scrollWidth, body.scrollWidth),
    documentHeight: Math.max(doc.scrollHeight, body.scrollHeight),
    viewportWidth: innerWidth,
    viewportHeight: innerHeight,
    sidebar,
    hasHeading: !!heading,
    headingVisible: visible(heading),
    hasSearchInput: !!search,
    searchVisible: visible(search),
    tableVisible: !!table,
    tableRows,
    cardCount: cards.length,
    interactiveCards,
    actionButtons: actions.length,
    visibleActionButtons,
    menuAffordances,
    focusableCount,
    emptyState: emptyState(),
  };
})()"#;

const DISABLE_ANIMATIONS_JS: &str = r#"(() => {
  const apply = () => {
    if (document.getElementById('__harness_no_motion')) return;
    const style = document.createElement('style');
    style.id = '__harness_no_motion';
    style.textContent = '*, *::before, *::after { transition: none !important; animation: none !important; caret-color: transparent !important; scroll-behavior: auto !important; }';
    (document.head || document.documentElement).appendChild(style);
  };
  if (document.readyState === 'loading') { document.addEventListener('DOMContentLoaded', apply); } else { apply(); }
  return { ok: true };
})()"#;

// Writes through the native value setter so framework-managed inputs see the change.
const FILL_INPUT_JS: &str = r#"(() => {
  const el = document.querySelector(__SELECTOR__);
  if (!el) return { ok: false };
  const desc = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value');
  if (desc && desc.set) { desc.set.call(el, __VALUE__); } else { el.value = __VALUE__; }
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return { ok: true };
})()"#;

const SUBMIT_FORM_JS: &str = r#"(() => {
  const form = document.querySelector('form');
  if (!form) return { ok: false };
  const btn = form.querySelector('button[type="submit"], input[type="submit"], button:not([type])');
  if (btn) { btn.click(); } else if (form.requestSubmit) { form.requestSubmit(); } else { form.submit(); }
  return { ok: true };
})()"#;

const AUTH_MARKERS_JS: &str = r#"(() => {
  __HELPERS__
  const marker = document.querySelector('[data-testid*="user-menu" i], [aria-label*="logout" i], [aria-label*="sign out" i], [aria-label*="account" i], a[href*="logout"], button[title*="logout" i]');
  return {
    loginFormPresent: !!document.querySelector('input[type="password"]'),
    protectedMarkerVisible: visible(marker) || /log ?out|sign ?out|cerrar sesi[oó]n/i.test(bodyText()),
    headingVisible: visible(document.querySelector('h1, h2, [role="heading"]')),
  };
})()"#;

const DATA_PRESENCE_JS: &str = r#"(() => {
  __HELPERS__
  const rows = Array.from(document.querySelectorAll('table tbody tr, [role="row"]')).filter(r => !r.querySelector('th') && visible(r)).length;
  const cards = Array.from(document.querySelectorAll('[data-card], .card, [class*="card" i]')).filter(visible).length;
  const loading = !!Array.from(document.querySelectorAll('[aria-busy="true"], .loading, .spinner, [role="progressbar"], [class*="skeleton" i]')).find(visible);
  return { dataElements: rows + cards, emptyState: emptyState(), loadingCleared: !loading };
})()"#;

const SAMPLE_CONTROLS_JS: &str = r#"(() => {
  __HELPERS__
  document.querySelectorAll('[data-harness-control]').forEach(el => el.removeAttribute('data-harness-control'));
  const skip = new RegExp('log ?out|sign ?out|cerrar sesi|' + __DESTRUCTIVE__);
  const root = document.querySelector('main, [role="main"]') || document.body;
  const controls = Array.from(root.querySelectorAll('button, [role="button"], input[type="button"]'))
    .filter(el => !el.disabled && visible(el) && inViewport(el) && el.getAttribute('type') !== 'submit' && !skip.test(label(el)))
    .slice(0, __LIMIT__);
  return controls.map((el, index) => {
    el.setAttribute('data-harness-control', String(index));
    return { index, label: (el.textContent || el.getAttribute('aria-label') || el.value || '').trim().slice(0, 80) };
  });
})()"#;

const OVERLAY_STATE_JS: &str = r#"(() => {
  const open = Array.from(document.querySelectorAll('[role="dialog"], [role="alertdialog"], dialog[open], [aria-modal="true"], .modal.show, .modal.open'))
    .find(el => { const r = el.getBoundingClientRect(); return r.width > 0 && r.height > 0; });
  return { dialogOpen: !!open };
})()"#;

const CLOSE_OVERLAY_JS: &str = r#"(() => {
  const dialog = document.querySelector('[role="dialog"], [role="alertdialog"], dialog[open], [aria-modal="true"]');
  if (!dialog) return { ok: false };
  const close = dialog.querySelector('[aria-label*="close" i], [data-dismiss], button[class*="close" i]')
    || Array.from(dialog.querySelectorAll('button')).find(b => /cancel|close|cerrar|cancelar/i.test(b.textContent || ''));
  if (close) { close.click(); } else {
    document.dispatchEvent(new KeyboardEvent('keydown', { key: 'Escape', bubbles: true }));
    if (dialog.close) dialog.close();
  }
  return { ok: true };
})()"#;

const FORM_PROBE_JS: &str = r#"(() => {
  const form = Array.from(document.querySelectorAll('form')).find(f => !f.querySelector('input[type="password"]'));
  if (!form) return { formPresent: false, submitted: false };
  const btn = form.querySelector('button[type="submit"], input[type="submit"], button:not([type])');
  if (btn) { btn.click(); } else if (form.requestSubmit) { form.requestSubmit(); } else { return { formPresent: true, submitted: false }; }
  return { formPresent: true, submitted: true };
})()"#;

const FORM_FEEDBACK_JS: &str = r#"(() => {
  const node = document.querySelector('input:invalid, select:invalid, textarea:invalid, [aria-invalid="true"], [role="alert"], .invalid-feedback, [class*="toast" i], [class*="error" i]');
  return { feedbackShown: !!node };
})()"#;

const NAVIGATION_LINKS_JS: &str = r#"(() => {
  __HELPERS__
  document.querySelectorAll('[data-harness-nav]').forEach(el => el.removeAttribute('data-harness-nav'));
  const links = Array.from(document.querySelectorAll('nav a[href], aside a[href], [role="navigation"] a[href]'))
    .filter(a => visible(a) && a.origin === location.origin && a.pathname !== location.pathname && !/log ?out|sign ?out/.test(label(a)))
    .slice(0, 10);
  return links.map((a, index) => {
    a.setAttribute('data-harness-nav', String(index));
    return { index, href: a.href, label: (a.textContent || '').trim().slice(0, 80) };
  });
})()"#;

const FILTER_CONTROLS_JS: &str = r#"(() => {
  __HELPERS__
  document.querySelectorAll('[data-harness-filter]').forEach(el => el.removeAttribute('data-harness-filter'));
  const filterRe = /filter|filtrar|filtro/;
  const controls = Array.from(document.querySelectorAll('select, [role="combobox"], button, [role="button"]'))
    .filter(el => visible(el) && (el.tagName === 'SELECT' || el.getAttribute('role') === 'combobox' || filterRe.test(label(el))));
  controls.forEach((el, i) => el.setAttribute('data-harness-filter', String(i)));
  return { count: controls.length };
})()"#;

const CLICK_FILTER_JS: &str = r#"(() => {
  const el = document.querySelector('[data-harness-filter="0"]');
  if (!el) return { ok: false };
  if (el.tagName === 'SELECT') {
    if (el.options.length < 2) return { ok: false };
    el.selectedIndex = 1;
    el.dispatchEvent(new Event('change', { bubbles: true }));
  } else {
    el.click();
  }
  return { ok: true };
})()"#;

const CRUD_CONTROLS_JS: &str = r#"(() => {
  __HELPERS__
  document.querySelectorAll('[data-harness-create]').forEach(el => el.removeAttribute('data-harness-create'));
  const all = Array.from(document.querySelectorAll('button, a, [role="button"]')).filter(visible);
  const count = (re) => all.filter(el => re.test(label(el))).length;
  const createRe = /\b(new|create|add|nuevo|nueva|crear|agregar)\b/;
  const create = all.find(el => createRe.test(label(el)));
  if (create) create.setAttribute('data-harness-create', '0');
  return {
    create: count(createRe),
    edit: count(/\b(edit|editar|modificar)\b/),
    delete: count(/\b(delete|remove|eliminar|borrar)\b/),
    view: count(/\b(view|open|details|ver|detalle)\b/),
  };
})()"#;
