pub mod orchestrator;
pub mod results;
pub mod types;

pub use orchestrator::{Orchestrator, PhaseKind, PhasePlan, PlannedPhase};
pub use results::{PhaseGate, ResultLog};
pub use types::{
    HarnessError, HarnessResult, OpenPhase, PhaseResult, PhaseStatus, RunContext, RunState,
    RunSummary,
    SKIPPED_DUE_TO_CRITICAL,
};
