//! Configuration management with file and environment variable support.
//!
//! Sources, lowest to highest precedence:
//! 1. Compiled defaults
//! 2. An optional TOML file
//! 3. `BACKOFFICE_HARNESS_*` environment variables
//! 4. CLI flags (applied by the binary)
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `BACKOFFICE_HARNESS_BASE_URL` | Target application base URL | `http://localhost:3000` |
//! | `BACKOFFICE_HARNESS_LOGIN_PATH` | Path of the credential form | `/login` |
//! | `BACKOFFICE_HARNESS_START_PATH` | Protected path to exercise | `/admin` |
//! | `BACKOFFICE_HARNESS_EMAIL` | Login email | empty |
//! | `BACKOFFICE_HARNESS_PASSWORD` | Login password | empty |
//! | `BACKOFFICE_HARNESS_BREAKPOINTS` | Breakpoint presets or WxH list | `mobile,tablet,desktop` |
//! | `BACKOFFICE_HARNESS_FAIL_FAST` | Abort on critical failure | `true` |
//! | `BACKOFFICE_HARNESS_VALIDATE_SCREENSHOTS` | Integrity-check screenshots | `true` |
//! | `BACKOFFICE_HARNESS_VALIDATE_BUSINESS` | Run business validations | `true` |
//! | `BACKOFFICE_HARNESS_REUSE_SESSION` | Try an existing session first | `false` |
//! | `BACKOFFICE_HARNESS_HEADLESS` | Run the browser headless | `true` |
//! | `BACKOFFICE_HARNESS_ARTIFACT_DIR` | Base directory for run artifacts | `./test-results` |
//! | `BACKOFFICE_HARNESS_POLL_INTERVAL` | Readiness poll interval (ms) | `250` |
//! | `BACKOFFICE_HARNESS_FIRST_ACCESS_TIMEOUT` | First-access budget (ms) | `60000` |
//! | `BACKOFFICE_HARNESS_SUBSEQUENT_ACCESS_TIMEOUT` | Warm-route budget (ms) | `10000` |

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::harness::types::{HarnessError, HarnessResult};

// ============================================================================
// Default Values
// ============================================================================

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_START_PATH: &str = "/admin";

pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_PAGE_LOAD_TIMEOUT_MS: u64 = 20_000;
/// Budget on first access to a route, while the target may still be compiling
pub const DEFAULT_FIRST_ACCESS_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_SUBSEQUENT_ACCESS_TIMEOUT_MS: u64 = 10_000;
/// Layout stabilization budget after a viewport change
pub const DEFAULT_RESPONSIVE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 240;

pub const DEFAULT_ARTIFACT_DIR: &str = "./test-results";
/// Captures below this size are flagged as likely blank renders
pub const DEFAULT_MIN_SCREENSHOT_BYTES: u64 = 1024;

pub const DEFAULT_SEARCH_TERM: &str = "test";
pub const DEFAULT_BUTTON_SAMPLE_LIMIT: usize = 5;
pub const DEFAULT_DATA_REQUEST_PATTERN: &str = "/api/";

pub const DEFAULT_BREAKPOINTS: &str = "mobile,tablet,desktop";

/// Phases whose failure makes the rest of the run meaningless
pub const DEFAULT_CRITICAL_PHASES: &[&str] =
    &["environment", "authentication", "navigation", "data-loading"];

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_BASE_URL: &str = "BACKOFFICE_HARNESS_BASE_URL";
pub const ENV_LOGIN_PATH: &str = "BACKOFFICE_HARNESS_LOGIN_PATH";
pub const ENV_START_PATH: &str = "BACKOFFICE_HARNESS_START_PATH";
pub const ENV_EMAIL: &str = "BACKOFFICE_HARNESS_EMAIL";
pub const ENV_PASSWORD: &str = "BACKOFFICE_HARNESS_PASSWORD";
pub const ENV_BREAKPOINTS: &str = "BACKOFFICE_HARNESS_BREAKPOINTS";
pub const ENV_FAIL_FAST: &str = "BACKOFFICE_HARNESS_FAIL_FAST";
pub const ENV_VALIDATE_SCREENSHOTS: &str = "BACKOFFICE_HARNESS_VALIDATE_SCREENSHOTS";
pub const ENV_VALIDATE_BUSINESS: &str = "BACKOFFICE_HARNESS_VALIDATE_BUSINESS";
pub const ENV_REUSE_SESSION: &str = "BACKOFFICE_HARNESS_REUSE_SESSION";
pub const ENV_HEADLESS: &str = "BACKOFFICE_HARNESS_HEADLESS";
pub const ENV_ARTIFACT_DIR: &str = "BACKOFFICE_HARNESS_ARTIFACT_DIR";
pub const ENV_POLL_INTERVAL: &str = "BACKOFFICE_HARNESS_POLL_INTERVAL";
pub const ENV_FIRST_ACCESS_TIMEOUT: &str = "BACKOFFICE_HARNESS_FIRST_ACCESS_TIMEOUT";
pub const ENV_SUBSEQUENT_ACCESS_TIMEOUT: &str = "BACKOFFICE_HARNESS_SUBSEQUENT_ACCESS_TIMEOUT";

// ============================================================================
// Breakpoints
// ============================================================================

/// Viewport class used to select assertion policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointClass {
    Mobile,
    Tablet,
    Desktop,
}

impl BreakpointClass {
    /// mobile < 768, tablet 768..1024, desktop >= 1024
    pub fn from_width(width: u32) -> Self {
        match width {
            0..=767 => BreakpointClass::Mobile,
            768..=1023 => BreakpointClass::Tablet,
            _ => BreakpointClass::Desktop,
        }
    }
}

impl fmt::Display for BreakpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BreakpointClass::Mobile => "mobile",
            BreakpointClass::Tablet => "tablet",
            BreakpointClass::Desktop => "desktop",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub width: u32,
    pub height: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl Breakpoint {
    pub fn new(width: u32, height: u32, name: &str, description: &str) -> Self {
        Self {
            width,
            height,
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    pub fn class(&self) -> BreakpointClass {
        BreakpointClass::from_width(self.width)
    }
}

/// Parse a breakpoint: "mobile" (375x667), "tablet" (768x1024),
/// "desktop" (1280x800), "wide" (1920x1080), or "WxH"
pub fn parse_breakpoint(spec: &str) -> Option<Breakpoint> {
    match spec.trim().to_lowercase().as_str() {
        "mobile" => Some(Breakpoint::new(375, 667, "mobile", "Phone portrait")),
        "tablet" => Some(Breakpoint::new(768, 1024, "tablet", "Tablet portrait")),
        "desktop" => Some(Breakpoint::new(1280, 800, "desktop", "Laptop display")),
        "wide" => Some(Breakpoint::new(1920, 1080, "wide", "Full HD display")),
        custom => {
            let (w, h) = custom.split_once('x')?;
            let width: u32 = w.parse().ok()?;
            let height: u32 = h.parse().ok()?;
            if width == 0 || height == 0 {
                return None;
            }
            let name = format!("{}x{}", width, height);
            Some(Breakpoint::new(width, height, &name, "Custom viewport"))
        }
    }
}

/// Parse a comma-separated breakpoint list, keeping order
pub fn parse_breakpoints(list: &str) -> HarnessResult<Vec<Breakpoint>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            parse_breakpoint(s).ok_or_else(|| {
                HarnessError::Config(format!(
                    "Invalid breakpoint '{}'. Use: mobile, tablet, desktop, wide, or WxH",
                    s
                ))
            })
        })
        .collect()
}

pub fn preset_breakpoints() -> Vec<Breakpoint> {
    ["mobile", "tablet", "desktop", "wide"]
        .iter()
        .filter_map(|p| parse_breakpoint(p))
        .collect()
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub base_url: String,
    pub login_path: String,
    /// Protected page the run authenticates into and exercises
    pub start_path: String,
    pub credentials: Credentials,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            start_path: DEFAULT_START_PATH.to_string(),
            credentials: Credentials::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub fail_fast: bool,
    pub validate_screenshots: bool,
    pub validate_business_logic: bool,
    /// Treat authentication failure as tolerable instead of critical
    pub tolerate_auth_failure: bool,
    pub reuse_session: bool,
    pub headless: bool,
    pub critical_phases: Vec<String>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            fail_fast: true,
            validate_screenshots: true,
            validate_business_logic: true,
            tolerate_auth_failure: false,
            reuse_session: false,
            headless: true,
            critical_phases: DEFAULT_CRITICAL_PHASES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Timing budgets, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub navigation_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    pub page_load_timeout_ms: u64,
    pub first_access_timeout_ms: u64,
    pub subsequent_access_timeout_ms: u64,
    pub responsive_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
            auth_timeout_ms: DEFAULT_AUTH_TIMEOUT_MS,
            page_load_timeout_ms: DEFAULT_PAGE_LOAD_TIMEOUT_MS,
            first_access_timeout_ms: DEFAULT_FIRST_ACCESS_TIMEOUT_MS,
            subsequent_access_timeout_ms: DEFAULT_SUBSEQUENT_ACCESS_TIMEOUT_MS,
            responsive_timeout_ms: DEFAULT_RESPONSIVE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl TimingSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Attempts allowed for a budget: `budget / interval`, capped by
    /// `max_poll_attempts`, at least one
    pub fn attempts_for(&self, budget_ms: u64) -> u32 {
        let by_budget = budget_ms / self.poll_interval_ms.max(1);
        let by_budget = u32::try_from(by_budget).unwrap_or(u32::MAX);
        by_budget.min(self.max_poll_attempts).max(1)
    }

    /// Millisecond budgets shrunk for scripted targets
    pub fn fast() -> Self {
        Self {
            navigation_timeout_ms: 500,
            auth_timeout_ms: 200,
            page_load_timeout_ms: 200,
            first_access_timeout_ms: 200,
            subsequent_access_timeout_ms: 50,
            responsive_timeout_ms: 50,
            poll_interval_ms: 5,
            max_poll_attempts: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    pub base_dir: PathBuf,
    pub min_screenshot_bytes: u64,
    /// Inline screenshots into the HTML report as data URIs
    pub embed_images: bool,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            min_screenshot_bytes: DEFAULT_MIN_SCREENSHOT_BYTES,
            embed_images: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub search_term: String,
    /// Upper bound on controls clicked by the button sweep
    pub button_sample_limit: usize,
    /// Substring identifying data-layer requests in the network log
    pub data_request_pattern: String,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            search_term: DEFAULT_SEARCH_TERM.to_string(),
            button_sample_limit: DEFAULT_BUTTON_SAMPLE_LIMIT,
            data_request_pattern: DEFAULT_DATA_REQUEST_PATTERN.to_string(),
        }
    }
}

/// Centralized configuration for one harness run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target: TargetSettings,
    pub breakpoints: Vec<Breakpoint>,
    pub policy: PolicySettings,
    pub timing: TimingSettings,
    pub artifacts: ArtifactSettings,
    pub probe: ProbeSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            target: TargetSettings::default(),
            breakpoints: parse_breakpoints(DEFAULT_BREAKPOINTS).unwrap_or_default(),
            policy: PolicySettings::default(),
            timing: TimingSettings::default(),
            artifacts: ArtifactSettings::default(),
            probe: ProbeSettings::default(),
        }
    }

    /// Defaults overlaid with environment variables
    pub fn from_env() -> HarnessResult<Self> {
        let mut config = Self::defaults();
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults, then the optional TOML file, then environment variables
    pub fn load(path: Option<&Path>) -> HarnessResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => Self::defaults(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> HarnessResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay values from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> HarnessResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_BASE_URL) {
            self.target.base_url = v;
        }
        if let Some(v) = lookup(ENV_LOGIN_PATH) {
            self.target.login_path = v;
        }
        if let Some(v) = lookup(ENV_START_PATH) {
            self.target.start_path = v;
        }
        if let Some(v) = lookup(ENV_EMAIL) {
            self.target.credentials.email = v;
        }
        if let Some(v) = lookup(ENV_PASSWORD) {
            self.target.credentials.password = v;
        }
        if let Some(v) = lookup(ENV_BREAKPOINTS) {
            self.breakpoints = parse_breakpoints(&v)?;
        }
        if let Some(v) = lookup(ENV_FAIL_FAST).and_then(|s| parse_bool(&s)) {
            self.policy.fail_fast = v;
        }
        if let Some(v) = lookup(ENV_VALIDATE_SCREENSHOTS).and_then(|s| parse_bool(&s)) {
            self.policy.validate_screenshots = v;
        }
        if let Some(v) = lookup(ENV_VALIDATE_BUSINESS).and_then(|s| parse_bool(&s)) {
            self.policy.validate_business_logic = v;
        }
        if let Some(v) = lookup(ENV_REUSE_SESSION).and_then(|s| parse_bool(&s)) {
            self.policy.reuse_session = v;
        }
        if let Some(v) = lookup(ENV_HEADLESS).and_then(|s| parse_bool(&s)) {
            self.policy.headless = v;
        }
        if let Some(v) = lookup(ENV_ARTIFACT_DIR) {
            self.artifacts.base_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_POLL_INTERVAL).and_then(|s| s.parse().ok()) {
            self.timing.poll_interval_ms = v;
        }
        if let Some(v) = lookup(ENV_FIRST_ACCESS_TIMEOUT).and_then(|s| s.parse().ok()) {
            self.timing.first_access_timeout_ms = v;
        }
        if let Some(v) = lookup(ENV_SUBSEQUENT_ACCESS_TIMEOUT).and_then(|s| s.parse().ok()) {
            self.timing.subsequent_access_timeout_ms = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.target.base_url.is_empty() {
            return Err(HarnessError::Config("base URL is empty".to_string()));
        }
        if self.breakpoints.is_empty() {
            return Err(HarnessError::Config("at least one breakpoint is required".to_string()));
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(HarnessError::Config("poll interval must be positive".to_string()));
        }
        Ok(())
    }

    pub fn is_critical(&self, phase: &str) -> bool {
        if phase == "authentication" && self.policy.tolerate_auth_failure {
            return false;
        }
        self.policy.critical_phases.iter().any(|p| p == phase)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_breakpoint_presets() {
        assert_eq!(parse_breakpoint("mobile").unwrap().width, 375);
        assert_eq!(parse_breakpoint("tablet").unwrap().width, 768);
        assert_eq!(parse_breakpoint("DESKTOP").unwrap().width, 1280);
        assert_eq!(parse_breakpoint("wide").unwrap().height, 1080);
    }

    #[test]
    fn test_parse_breakpoint_custom() {
        let bp = parse_breakpoint("414x896").unwrap();
        assert_eq!((bp.width, bp.height), (414, 896));
        assert_eq!(bp.name, "414x896");
    }

    #[test]
    fn test_parse_breakpoint_invalid() {
        assert_eq!(parse_breakpoint("invalid"), None);
        assert_eq!(parse_breakpoint("100"), None);
        assert_eq!(parse_breakpoint("0x100"), None);
        assert!(parse_breakpoints("mobile,nope").is_err());
    }

    #[test]
    fn test_breakpoint_classes() {
        assert_eq!(BreakpointClass::from_width(375), BreakpointClass::Mobile);
        assert_eq!(BreakpointClass::from_width(767), BreakpointClass::Mobile);
        assert_eq!(BreakpointClass::from_width(768), BreakpointClass::Tablet);
        assert_eq!(BreakpointClass::from_width(1023), BreakpointClass::Tablet);
        assert_eq!(BreakpointClass::from_width(1024), BreakpointClass::Desktop);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.target.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.breakpoints.len(), 3);
        assert!(config.policy.fail_fast);
        assert!(config.is_critical("authentication"));
        assert!(!config.is_critical("search"));
    }

    #[test]
    fn test_tolerant_auth_is_not_critical() {
        let mut config = Config::defaults();
        config.policy.tolerate_auth_failure = true;
        assert!(!config.is_critical("authentication"));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "http://staging:8080"),
            (ENV_FAIL_FAST, "off"),
            (ENV_BREAKPOINTS, "mobile,1440x900"),
            (ENV_POLL_INTERVAL, "100"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::defaults();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.target.base_url, "http://staging:8080");
        assert!(!config.policy.fail_fast);
        assert_eq!(config.breakpoints[1].width, 1440);
        assert_eq!(config.timing.poll_interval_ms, 100);
    }

    #[test]
    fn test_toml_partial_file() {
        let config = Config::from_toml_str(
            r#"
            [target]
            base_url = "http://localhost:4000"

            [target.credentials]
            email = "admin@example.com"
            password = "secret"

            [[breakpoints]]
            width = 390
            height = 844
            name = "phone"
            "#,
        )
        .unwrap();
        assert_eq!(config.target.login_path, DEFAULT_LOGIN_PATH);
        assert_eq!(config.target.credentials.email, "admin@example.com");
        assert_eq!(config.breakpoints.len(), 1);
        assert_eq!(config.breakpoints[0].class(), BreakpointClass::Mobile);
        assert_eq!(config.timing.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_attempts_for_budget() {
        let timing = TimingSettings::default();
        assert_eq!(timing.attempts_for(10_000), 40);
        assert_eq!(timing.attempts_for(600_000), DEFAULT_MAX_POLL_ATTEMPTS);
        assert_eq!(timing.attempts_for(0), 1);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            email: "a@b.c".into(),
            password: "hunter2".into(),
        };
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("hunter2"));
    }
}
