//! Page driver abstraction.
//!
//! Every component talks to the browser through [`PageDriver`]:
//! - `CdpPage` drives a real Chromium over the DevTools protocol
//! - `MockPage` answers from a scripted site model (tests and demos)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, warn};

use super::scripts::PageScript;
use crate::harness::types::{HarnessError, HarnessResult};

/// Severity of a console message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

impl ConsoleLevel {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" | "assert" => Self::Error,
            "warn" | "warning" => Self::Warn,
            "info" => Self::Info,
            "debug" | "trace" | "verbose" => Self::Debug,
            _ => Self::Log,
        }
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Something the browser reported outside of a direct request/response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BrowserEvent {
    Console { level: ConsoleLevel, text: String },
    /// Uncaught exception in page script
    PageError { message: String },
    Network { url: String, status: i64 },
    /// Native alert/confirm/prompt, dismissed by the backend
    Dialog { kind: String, message: String },
}

/// Forward an event to the recorder, logging errors as they arrive.
/// Returns `false` once the receiving side is gone.
pub fn publish(tx: &mpsc::UnboundedSender<BrowserEvent>, event: BrowserEvent) -> bool {
    match &event {
        BrowserEvent::Console {
            level: ConsoleLevel::Error,
            text,
        } => error!(text = %text, "browser console error"),
        BrowserEvent::PageError { message } => error!(message = %message, "uncaught page error"),
        BrowserEvent::Dialog { kind, message } => {
            warn!(kind = %kind, message = %message, "native dialog dismissed")
        }
        _ => {}
    }
    tx.send(event).is_ok()
}

/// Receiving end of a page's event stream, owned by the evidence recorder
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<BrowserEvent>,
}

impl EventSubscription {
    pub fn channel() -> (mpsc::UnboundedSender<BrowserEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Take everything received so far without waiting
    pub fn drain(&mut self) -> Vec<BrowserEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Trait for browser page backends
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait for the load to be dispatched
    async fn goto(&self, url: &str) -> HarnessResult<()>;

    async fn current_url(&self) -> HarnessResult<String>;

    /// Run an in-page probe or interaction and return its JSON result
    async fn run(&self, script: &PageScript) -> HarnessResult<serde_json::Value>;

    /// Install a script evaluated on every new document
    async fn add_init_script(&self, script: &PageScript) -> HarnessResult<()>;

    /// PNG-encoded capture of the current page
    async fn screenshot(&self) -> HarnessResult<Vec<u8>>;

    async fn set_viewport(&self, width: u32, height: u32) -> HarnessResult<()>;

    /// Wait for an in-flight navigation to complete, bounded by `timeout`
    async fn wait_for_navigation(&self, timeout: Duration) -> HarnessResult<()>;

    async fn subscribe_events(&self) -> HarnessResult<EventSubscription>;

    async fn close(&self) -> HarnessResult<()>;

    /// Source type identifier (e.g., "cdp", "mock")
    fn source_type(&self) -> &str;
}

/// `goto` bounded by the configured navigation budget
pub async fn goto_within<P>(page: &P, url: &str, timeout: Duration) -> HarnessResult<()>
where
    P: PageDriver + ?Sized,
{
    match tokio::time::timeout(timeout, page.goto(url)).await {
        Ok(result) => result,
        Err(_) => Err(HarnessError::Timeout(format!(
            "navigation to {} after {}ms",
            url,
            timeout.as_millis()
        ))),
    }
}

/// Path component of a URL, or the input itself if it does not parse
pub fn url_path(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

/// First path segment, used to group routes of the same kind
pub fn route_kind(url: &str) -> String {
    let path = url_path(url);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => "/".to_string(),
        [first] => (*first).to_string(),
        [first, second, ..] => format!("{}/{}", first, second),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_level_parse() {
        assert_eq!(ConsoleLevel::parse("error"), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::parse("warning"), ConsoleLevel::Warn);
        assert_eq!(ConsoleLevel::parse("LOG"), ConsoleLevel::Log);
        assert_eq!(ConsoleLevel::parse("something"), ConsoleLevel::Log);
    }

    #[test]
    fn test_url_path() {
        assert_eq!(url_path("http://localhost:3000/admin/users?page=2"), "/admin/users");
        assert_eq!(url_path("/login?next=/admin"), "/login");
    }

    #[test]
    fn test_route_kind_groups_detail_pages() {
        assert_eq!(route_kind("http://h/admin/users"), "admin/users");
        assert_eq!(route_kind("http://h/admin/users/42"), "admin/users");
        assert_eq!(route_kind("http://h/"), "/");
        assert_eq!(route_kind("http://h/login"), "login");
    }

    #[test]
    fn test_subscription_drain() {
        let (tx, mut sub) = EventSubscription::channel();
        tx.send(BrowserEvent::PageError { message: "x".into() }).unwrap();
        tx.send(BrowserEvent::Network { url: "/api/a".into(), status: 200 }).unwrap();
        assert_eq!(sub.drain().len(), 2);
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_publish_stops_after_receiver_drops() {
        let (tx, mut sub) = EventSubscription::channel();
        let dialog = BrowserEvent::Dialog {
            kind: "confirm".into(),
            message: "Delete this record?".into(),
        };
        assert!(publish(&tx, dialog.clone()));
        assert_eq!(sub.drain(), vec![dialog]);

        drop(sub);
        assert!(!publish(&tx, BrowserEvent::PageError { message: "late".into() }));
    }
}
