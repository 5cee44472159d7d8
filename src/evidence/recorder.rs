//! Evidence recorder.
//!
//! Screenshots are written into status-partitioned directories and read
//! back for integrity checks. Browser events arrive over the page's
//! subscription and are drained into phase-tagged entries. Browser errors
//! are logged by the page as they happen and never decide a verdict.

use chrono::Utc;
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::{debug, error, warn};

use super::types::{
    Capture, ConsoleEntry, ConsoleSource, Integrity, IntegrityRecord, NetworkEntry, ScreenshotRef,
    StatusTag,
};
use crate::config::ArtifactSettings;
use crate::driver::{BrowserEvent, ConsoleLevel, EventSubscription, PageDriver};
use crate::governor::FailFastGovernor;
use crate::harness::types::{HarnessResult, PhaseStatus};
use crate::workspace::RunWorkspace;

/// Critical failure reason for a broken evidence chain
pub const REASON_EVIDENCE_INTEGRITY: &str = "screenshot integrity failure";

#[derive(Debug)]
pub struct EvidenceRecorder {
    workspace: RunWorkspace,
    validate: bool,
    min_bytes: u64,
    seq: usize,
    phase: String,
    subscription: Option<EventSubscription>,
    console: Vec<ConsoleEntry>,
    network: Vec<NetworkEntry>,
    integrity: Vec<IntegrityRecord>,
    captures: Vec<ScreenshotRef>,
}

impl EvidenceRecorder {
    pub fn new(workspace: RunWorkspace, artifacts: &ArtifactSettings, validate: bool) -> Self {
        Self {
            workspace,
            validate,
            min_bytes: artifacts.min_screenshot_bytes,
            seq: 0,
            phase: "setup".to_string(),
            subscription: None,
            console: Vec::new(),
            network: Vec::new(),
            integrity: Vec::new(),
            captures: Vec::new(),
        }
    }

    pub fn workspace(&self) -> &RunWorkspace {
        &self.workspace
    }

    /// Take ownership of the page's event stream for the rest of the session
    pub fn attach(&mut self, subscription: EventSubscription) {
        self.subscription = Some(subscription);
    }

    /// Switch the phase new entries are tagged with
    pub fn begin_phase(&mut self, phase: &str) {
        self.drain();
        self.phase = phase.to_string();
    }

    /// Move pending browser events into the log. Returns the number of new
    /// browser errors.
    pub fn drain(&mut self) -> usize {
        let Some(subscription) = self.subscription.as_mut() else {
            return 0;
        };
        let mut new_errors = 0;
        for event in subscription.drain() {
            let timestamp = Utc::now();
            match event {
                BrowserEvent::Console { level, text } => {
                    let entry = ConsoleEntry {
                        phase: self.phase.clone(),
                        source: ConsoleSource::Console,
                        level,
                        text,
                        timestamp,
                    };
                    // Errors were already logged when the page emitted them
                    if entry.is_error() {
                        new_errors += 1;
                    }
                    debug!(
                        phase = %entry.phase,
                        level = %entry.level,
                        text = %entry.text,
                        "browser console"
                    );
                    self.console.push(entry);
                }
                BrowserEvent::PageError { message } => {
                    new_errors += 1;
                    self.console.push(ConsoleEntry {
                        phase: self.phase.clone(),
                        source: ConsoleSource::PageError,
                        level: ConsoleLevel::Error,
                        text: message,
                        timestamp,
                    });
                }
                BrowserEvent::Dialog { kind, message } => {
                    self.console.push(ConsoleEntry {
                        phase: self.phase.clone(),
                        source: ConsoleSource::Dialog,
                        level: ConsoleLevel::Warn,
                        text: format!("{}: {}", kind, message),
                        timestamp,
                    });
                }
                BrowserEvent::Network { url, status } => {
                    let entry = NetworkEntry {
                        phase: self.phase.clone(),
                        url,
                        status,
                        timestamp,
                    };
                    if entry.is_failure() {
                        warn!(
                            phase = %entry.phase,
                            url = %entry.url,
                            status,
                            "failed network response"
                        );
                    }
                    self.network.push(entry);
                }
            }
        }
        new_errors
    }

    /// Write a screenshot and validate it.
    ///
    /// A missing or empty file is reported to the governor as a critical
    /// failure when validation is enabled; under fail-fast that returns
    /// `CriticalAbort`.
    pub async fn capture_screenshot<P>(
        &mut self,
        page: &P,
        governor: &mut FailFastGovernor,
        label: &str,
        tag: StatusTag,
        description: &str,
    ) -> HarnessResult<Capture>
    where
        P: PageDriver + ?Sized,
    {
        let bytes = page.screenshot().await?;
        let url = page.current_url().await.unwrap_or_default();
        let path = self
            .workspace
            .screenshot_path(tag, &self.phase, label, self.seq);
        self.seq += 1;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &bytes)?;

        let file_size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let integrity = self.check(&path);
        let dimensions = if file_size_bytes > 0 {
            image::image_dimensions(&path).ok()
        } else {
            None
        };

        let reference = ScreenshotRef {
            phase_name: self.phase.clone(),
            file_path: path.clone(),
            status_tag: tag,
            description: description.to_string(),
            captured_at_url: url,
            file_size_bytes,
            dimensions,
            timestamp: Utc::now(),
        };

        let status = if integrity.is_failure() {
            PhaseStatus::Failed
        } else {
            PhaseStatus::Passed
        };
        self.integrity.push(IntegrityRecord {
            phase_name: self.phase.clone(),
            file_path: path.clone(),
            status,
            integrity: integrity.clone(),
            message: integrity.describe(),
        });
        self.captures.push(reference.clone());

        if self.validate && integrity.is_failure() {
            error!(
                path = %path.display(),
                verdict = %integrity.describe(),
                "screenshot validation failed"
            );
            governor.critical_failure(
                REASON_EVIDENCE_INTEGRITY,
                json!({
                    "phase": self.phase,
                    "filePath": path,
                    "integrity": integrity,
                }),
            )?;
        }

        Ok(Capture {
            reference,
            integrity,
        })
    }

    fn check(&self, path: &Path) -> Integrity {
        if !self.validate {
            return Integrity::Unchecked;
        }
        let bytes = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(_) => return Integrity::Missing,
        };
        if bytes == 0 {
            Integrity::Empty
        } else if bytes < self.min_bytes {
            warn!(
                path = %path.display(),
                bytes,
                min = self.min_bytes,
                "screenshot below size threshold, render may be blank"
            );
            Integrity::Undersized {
                bytes,
                min: self.min_bytes,
            }
        } else {
            Integrity::Valid
        }
    }

    pub fn console(&self) -> &[ConsoleEntry] {
        &self.console
    }

    pub fn network(&self) -> &[NetworkEntry] {
        &self.network
    }

    pub fn integrity_records(&self) -> &[IntegrityRecord] {
        &self.integrity
    }

    /// Every screenshot taken while `phase` was active, in capture order
    pub fn captures_for(&self, phase: &str) -> Vec<ScreenshotRef> {
        self.captures
            .iter()
            .filter(|c| c.phase_name == phase)
            .cloned()
            .collect()
    }

    pub fn browser_error_count(&self) -> usize {
        self.console.iter().filter(|e| e.is_error()).count()
    }

    /// Responses seen during `phase` whose URL contains `pattern`
    pub fn requests_matching(&self, phase: &str, pattern: &str) -> usize {
        self.network
            .iter()
            .filter(|n| n.phase == phase && n.url.contains(pattern))
            .count()
    }

    /// Persist console and network captures into the run workspace
    pub fn write_logs(&mut self) -> HarnessResult<()> {
        self.drain();
        let console_dir = self.workspace.console_dir();
        let network_dir = self.workspace.network_dir();
        fs::create_dir_all(&console_dir)?;
        fs::create_dir_all(&network_dir)?;
        fs::write(
            console_dir.join("console.json"),
            serde_json::to_string_pretty(&self.console)?,
        )?;
        fs::write(
            network_dir.join("network.json"),
            serde_json::to_string_pretty(&self.network)?,
        )?;
        Ok(())
    }
}
