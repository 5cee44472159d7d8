//! Chromium backend over the DevTools protocol.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::EventResponseReceived;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, EventJavascriptDialogOpening,
    HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{EventConsoleApiCalled, EventExceptionThrown};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{debug, warn};

use super::page::{BrowserEvent, ConsoleLevel, EventSubscription, PageDriver, publish};
use super::scripts::PageScript;
use crate::harness::types::{HarnessError, HarnessResult};

/// Browser launch settings
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Persistent profile; keeps cookies between runs for session reuse
    pub user_data_dir: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub request_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            user_data_dir: None,
            width: 1280,
            height: 800,
            request_timeout: Duration::from_secs(30),
        }
    }
}

fn cdp_err(e: impl std::fmt::Display) -> HarnessError {
    HarnessError::Browser(e.to_string())
}

/// A single Chromium page with its browser process
pub struct CdpPage {
    browser: AsyncMutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpPage {
    pub async fn launch(options: &LaunchOptions) -> HarnessResult<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.width, options.height)
            .request_timeout(options.request_timeout)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(dir) = &options.user_data_dir {
            std::fs::create_dir_all(dir)?;
            builder = builder.user_data_dir(dir);
        }
        let config = builder.build().map_err(HarnessError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(cdp_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await.map_err(cdp_err)?;
        debug!(headless = options.headless, "chromium launched");

        Ok(Self {
            browser: AsyncMutex::new(browser),
            page,
            handler,
            listeners: Mutex::new(Vec::new()),
        })
    }

    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(task);
        }
    }
}

fn console_text(event: &EventConsoleApiCalled) -> String {
    event
        .args
        .iter()
        .map(|arg| match (&arg.value, &arg.description) {
            (Some(Value::String(s)), _) => s.clone(),
            (Some(v), _) => v.to_string(),
            (None, Some(d)) => d.clone(),
            (None, None) => String::new(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn goto(&self, url: &str) -> HarnessResult<()> {
        self.page.goto(url).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn current_url(&self) -> HarnessResult<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(cdp_err)?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn run(&self, script: &PageScript) -> HarnessResult<Value> {
        let result = self.page.evaluate(script.to_js()).await.map_err(cdp_err)?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn add_init_script(&self, script: &PageScript) -> HarnessResult<()> {
        self.page
            .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(script.to_js()))
            .await
            .map_err(cdp_err)?;
        Ok(())
    }

    async fn screenshot(&self) -> HarnessResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page.screenshot(params).await.map_err(cdp_err)
    }

    async fn set_viewport(&self, width: u32, height: u32) -> HarnessResult<()> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(width as i64)
            .height(height as i64)
            .device_scale_factor(1.0)
            .mobile(width < 768)
            .build()
            .map_err(HarnessError::Browser)?;
        self.page.execute(params).await.map_err(cdp_err)?;
        Ok(())
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> HarnessResult<()> {
        match tokio::time::timeout(timeout, self.page.wait_for_navigation()).await {
            Ok(result) => {
                result.map_err(cdp_err)?;
                Ok(())
            }
            Err(_) => Err(HarnessError::Timeout(format!(
                "navigation after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Listener tasks log through the subscriber of the run that opened
    /// the subscription.
    async fn subscribe_events(&self) -> HarnessResult<EventSubscription> {
        let (tx, subscription) = EventSubscription::channel();

        let mut console = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(cdp_err)?;
        let console_tx = tx.clone();
        self.track(tokio::spawn(
            async move {
                while let Some(event) = console.next().await {
                    let level = ConsoleLevel::parse(&format!("{:?}", event.r#type));
                    let text = console_text(&event);
                    if !publish(&console_tx, BrowserEvent::Console { level, text }) {
                        break;
                    }
                }
            }
            .with_current_subscriber(),
        ));

        let mut exceptions = self
            .page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(cdp_err)?;
        let exception_tx = tx.clone();
        self.track(tokio::spawn(
            async move {
                while let Some(event) = exceptions.next().await {
                    let details = &event.exception_details;
                    let message = details
                        .exception
                        .as_ref()
                        .and_then(|e| e.description.clone())
                        .unwrap_or_else(|| details.text.clone());
                    if !publish(&exception_tx, BrowserEvent::PageError { message }) {
                        break;
                    }
                }
            }
            .with_current_subscriber(),
        ));

        // A native dialog blocks every script until answered, so each one
        // is dismissed as soon as it opens.
        let mut dialogs = self
            .page
            .event_listener::<EventJavascriptDialogOpening>()
            .await
            .map_err(cdp_err)?;
        let dialog_tx = tx.clone();
        let dialog_page = self.page.clone();
        self.track(tokio::spawn(
            async move {
                while let Some(event) = dialogs.next().await {
                    let dismiss = HandleJavaScriptDialogParams::new(false);
                    if let Err(e) = dialog_page.execute(dismiss).await {
                        warn!(error = %e, "could not dismiss native dialog");
                    }
                    let dialog = BrowserEvent::Dialog {
                        kind: format!("{:?}", event.r#type).to_lowercase(),
                        message: event.message.clone(),
                    };
                    if !publish(&dialog_tx, dialog) {
                        break;
                    }
                }
            }
            .with_current_subscriber(),
        ));

        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp_err)?;
        self.track(tokio::spawn(
            async move {
                while let Some(event) = responses.next().await {
                    let network = BrowserEvent::Network {
                        url: event.response.url.clone(),
                        status: event.response.status,
                    };
                    if !publish(&tx, network) {
                        break;
                    }
                }
            }
            .with_current_subscriber(),
        ));

        Ok(subscription)
    }

    async fn close(&self) -> HarnessResult<()> {
        if let Ok(mut listeners) = self.listeners.lock() {
            for task in listeners.drain(..) {
                task.abort();
            }
        }
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!(error = %e, "browser close failed");
        }
        let _ = browser.wait().await;
        self.handler.abort();
        Ok(())
    }

    fn source_type(&self) -> &str {
        "cdp"
    }
}
