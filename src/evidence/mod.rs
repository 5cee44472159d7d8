pub mod recorder;
pub mod types;

pub use recorder::{EvidenceRecorder, REASON_EVIDENCE_INTEGRITY};
pub use types::{
    Capture, ConsoleEntry, ConsoleSource, Integrity, IntegrityRecord, NetworkEntry, ScreenshotRef,
    StatusTag,
};
