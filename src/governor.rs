//! Fail-fast governor.
//!
//! Single source of truth for "should anything else run". A critical failure
//! increments the counter and records the reason; when fail-fast is enabled
//! it also returns [`HarnessError::CriticalAbort`], which callers propagate
//! with `?` up to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::harness::types::{HarnessError, HarnessResult};

/// Reason used when the target cannot be reached at run start
pub const REASON_ENVIRONMENT_UNAVAILABLE: &str = "environment unavailable";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalFailureRecord {
    pub reason: String,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct FailFastGovernor {
    fail_fast: bool,
    occurred: bool,
    count: usize,
    last: Option<CriticalFailureRecord>,
    history: Vec<CriticalFailureRecord>,
}

impl FailFastGovernor {
    pub fn new(fail_fast: bool) -> Self {
        Self {
            fail_fast,
            ..Default::default()
        }
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    pub fn occurred(&self) -> bool {
        self.occurred
    }

    /// Number of critical failures seen so far (keeps counting when fail-fast is off)
    pub fn count(&self) -> usize {
        self.count
    }

    /// Most recent critical failure
    pub fn last(&self) -> Option<&CriticalFailureRecord> {
        self.last.as_ref()
    }

    pub fn history(&self) -> &[CriticalFailureRecord] {
        &self.history
    }

    /// When the first critical failure happened
    pub fn tripped_at(&self) -> Option<DateTime<Utc>> {
        self.history.first().map(|r| r.timestamp)
    }

    /// True once the run must stop scheduling work
    pub fn should_skip(&self) -> bool {
        self.fail_fast && self.occurred
    }

    /// Record a critical failure. Safe to call repeatedly.
    pub fn critical_failure(
        &mut self,
        reason: &str,
        details: serde_json::Value,
    ) -> HarnessResult<()> {
        let record = CriticalFailureRecord {
            reason: reason.to_string(),
            details,
            timestamp: Utc::now(),
        };
        self.count += 1;
        self.occurred = true;
        self.history.push(record.clone());
        self.last = Some(record);

        error!(reason, count = self.count, "critical failure");

        if self.fail_fast {
            Err(HarnessError::CriticalAbort {
                reason: reason.to_string(),
            })
        } else {
            warn!("fail-fast disabled, continuing after critical failure");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_fast_aborts() {
        let mut governor = FailFastGovernor::new(true);
        assert!(!governor.should_skip());
        let err = governor
            .critical_failure("boom", serde_json::json!({}))
            .unwrap_err();
        assert!(err.is_critical_abort());
        assert!(governor.should_skip());
        assert_eq!(governor.count(), 1);
    }

    #[test]
    fn test_without_fail_fast_counts_and_continues() {
        let mut governor = FailFastGovernor::new(false);
        governor.critical_failure("first", serde_json::json!(null)).unwrap();
        governor.critical_failure("second", serde_json::json!(null)).unwrap();
        assert!(governor.occurred());
        assert!(!governor.should_skip());
        assert_eq!(governor.count(), 2);
        assert_eq!(governor.last().unwrap().reason, "second");
        assert_eq!(governor.history()[0].reason, "first");
    }

    #[test]
    fn test_repeated_calls_are_safe() {
        let mut governor = FailFastGovernor::new(true);
        let _ = governor.critical_failure("a", serde_json::json!(1));
        let second = governor.critical_failure("b", serde_json::json!(2));
        assert!(second.is_err());
        assert_eq!(governor.count(), 2);
        assert!(governor.tripped_at().is_some());
    }
}
