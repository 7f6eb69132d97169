//! Run engine: persisted state plus the loop controller that drives it.

pub mod driver;
pub mod state;

pub use driver::{Orchestrator, RunOutcome, StepOutcome};
pub use state::{ArtifactEntry, Escalation, GateRecord, StateLock, StateStore, WorkflowState};
