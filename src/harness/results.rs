use tracing::info;

use crate::governor::FailFastGovernor;
use crate::harness::types::{
    OpenPhase, PhaseResult, PhaseStatus, RunSummary, SKIPPED_DUE_TO_CRITICAL,
};

/// Outcome of asking to start a phase
#[derive(Debug)]
pub enum PhaseGate {
    /// The phase may run
    Run(OpenPhase),
    /// A skipped result was already recorded
    Skipped,
}

/// Append-only list of sealed phase results plus live counters.
///
/// Both entry points consult the governor, so no phase has to remember to
/// check for a prior critical failure itself.
#[derive(Debug, Default)]
pub struct ResultLog {
    phases: Vec<PhaseResult>,
    live: RunSummary,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_phase(
        &mut self,
        name: &str,
        critical: bool,
        governor: &FailFastGovernor,
    ) -> PhaseGate {
        if governor.should_skip() {
            self.push(PhaseResult::skipped(name, critical));
            return PhaseGate::Skipped;
        }
        PhaseGate::Run(OpenPhase::new(name, critical))
    }

    /// Append a sealed result. Results that started after fail-fast tripped
    /// are converted to skipped.
    pub fn add_result(&mut self, mut result: PhaseResult, governor: &FailFastGovernor) {
        if governor.should_skip() {
            let started_after = governor
                .tripped_at()
                .map(|t| result.start_time > t)
                .unwrap_or(false);
            if started_after && result.status != PhaseStatus::Skipped {
                result.status = PhaseStatus::Skipped;
                result.error = Some(SKIPPED_DUE_TO_CRITICAL.to_string());
            }
        }
        self.push(result);
    }

    fn push(&mut self, result: PhaseResult) {
        self.live.record(result.status);
        info!(
            phase = %result.name,
            status = %result.status,
            total = self.live.total,
            passed = self.live.passed,
            failed = self.live.failed,
            errors = self.live.errors,
            skipped = self.live.skipped,
            "phase finished"
        );
        self.phases.push(result);
    }

    pub fn phases(&self) -> &[PhaseResult] {
        &self.phases
    }

    /// Counters maintained incrementally while the run progresses
    pub fn live(&self) -> &RunSummary {
        &self.live
    }

    pub fn into_phases(self) -> Vec<PhaseResult> {
        self.phases
    }
}
