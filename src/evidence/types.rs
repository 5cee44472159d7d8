// Evidence records produced during a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::driver::ConsoleLevel;
use crate::harness::types::PhaseStatus;

/// Directory partition a screenshot is written into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusTag {
    Passed,
    Failed,
    Errors,
    BeforeAction,
    AfterAction,
}

impl StatusTag {
    pub const ALL: [StatusTag; 5] = [
        StatusTag::Passed,
        StatusTag::Failed,
        StatusTag::Errors,
        StatusTag::BeforeAction,
        StatusTag::AfterAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusTag::Passed => "passed",
            StatusTag::Failed => "failed",
            StatusTag::Errors => "errors",
            StatusTag::BeforeAction => "before-action",
            StatusTag::AfterAction => "after-action",
        }
    }

    /// Partition for a phase's closing screenshot
    pub fn for_status(status: PhaseStatus) -> Self {
        match status {
            PhaseStatus::Passed | PhaseStatus::Skipped => StatusTag::Passed,
            PhaseStatus::Failed => StatusTag::Failed,
            PhaseStatus::Error => StatusTag::Errors,
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRef {
    pub phase_name: String,
    pub file_path: PathBuf,
    pub status_tag: StatusTag,
    pub description: String,
    pub captured_at_url: String,
    /// Size on disk, read back after the write
    pub file_size_bytes: u64,
    pub dimensions: Option<(u32, u32)>,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of checking a written screenshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum Integrity {
    Valid,
    /// Written, but small enough to suggest a blank render
    Undersized { bytes: u64, min: u64 },
    Empty,
    Missing,
    /// Validation disabled
    Unchecked,
}

impl Integrity {
    /// Missing or empty files break the evidence chain
    pub fn is_failure(&self) -> bool {
        matches!(self, Integrity::Empty | Integrity::Missing)
    }

    pub fn describe(&self) -> String {
        match self {
            Integrity::Valid => "valid".to_string(),
            Integrity::Undersized { bytes, min } => {
                format!("{} bytes, below the {} byte threshold", bytes, min)
            }
            Integrity::Empty => "file is empty".to_string(),
            Integrity::Missing => "file was not written".to_string(),
            Integrity::Unchecked => "not validated".to_string(),
        }
    }
}

/// Screenshot validation record, one per capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityRecord {
    pub phase_name: String,
    pub file_path: PathBuf,
    pub status: PhaseStatus,
    pub integrity: Integrity,
    pub message: String,
}

/// A screenshot plus the verdict on its integrity
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub reference: ScreenshotRef,
    pub integrity: Integrity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsoleSource {
    Console,
    PageError,
    /// Native alert/confirm/prompt, dismissed automatically
    Dialog,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub phase: String,
    pub source: ConsoleSource,
    pub level: ConsoleLevel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConsoleEntry {
    pub fn is_error(&self) -> bool {
        self.source == ConsoleSource::PageError || self.level == ConsoleLevel::Error
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    pub phase: String,
    pub url: String,
    pub status: i64,
    pub timestamp: DateTime<Utc>,
}

impl NetworkEntry {
    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}
