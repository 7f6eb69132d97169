//! Typed error hierarchy for the cursus orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `GraphError` — workflow definition and validation failures
//! - `DispatchError` — task dispatch and worker failures
//! - `EngineError` — orchestration loop failures
//!
//! Process exit codes are derived from the hierarchy: configuration and
//! graph problems exit 2, worker failures exit 3, and a gate escalation
//! (which is an outcome, not an error) exits 1.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code for a successful run or a completed workflow.
pub const EXIT_OK: i32 = 0;
/// Exit code when a gate exhausted its retries and escalated to a human.
pub const EXIT_ESCALATED: i32 = 1;
/// Exit code for configuration and graph errors.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code for task execution errors.
pub const EXIT_TASK: i32 = 3;

/// Errors from loading or validating a workflow graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Failed to read workflow file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse workflow file at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Workflow has no phases")]
    Empty,

    #[error("Duplicate phase id '{phase}'")]
    DuplicatePhase { phase: String },

    #[error("Phase '{phase}' routes to unknown phase '{target}'")]
    UnknownEdgeTarget { phase: String, target: String },

    #[error("Phase '{phase}' requires artifact '{artifact}' which no phase produces")]
    UnknownRequirement { phase: String, artifact: String },

    #[error("Phase '{phase}' declares a failure edge but is not a gate")]
    FailureEdgeOnNormalPhase { phase: String },

    #[error("Phase '{phase}' declares a gate spec but is not a gate")]
    GateSpecOnNormalPhase { phase: String },

    #[error("Gate phase '{phase}' is missing its threshold spec")]
    GateMissingSpec { phase: String },

    #[error("Gate phase '{phase}' is missing its failure edge")]
    GateMissingFailureEdge { phase: String },

    #[error("Gate phase '{phase}' is missing its success edge")]
    GateMissingSuccessEdge { phase: String },

    #[error("Phase '{phase}' has no tasks")]
    NoTasks { phase: String },

    #[error("Terminal phase '{phase}' must not declare tasks")]
    TerminalWithTasks { phase: String },

    #[error("Workflow has no terminal phase")]
    NoTerminal,

    #[error("Workflow has multiple terminal phases: '{first}' and '{second}'")]
    MultipleTerminals { first: String, second: String },

    #[error("Success edges form a cycle through phase '{phase}'")]
    Cycle { phase: String },

    #[error("Unknown phase '{phase}'")]
    UnknownPhase { phase: String },
}

/// Errors from dispatching a phase's tasks to the external worker.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Phase '{phase}' requires artifact '{artifact}' which has not been produced")]
    MissingDependency { phase: String, artifact: String },

    #[error("Task '{task}' failed in phase '{phase}': {message}")]
    TaskFailed {
        phase: String,
        task: String,
        message: String,
    },

    #[error("Task '{task}' completed but did not produce artifact '{artifact}'")]
    MissingOutput { task: String, artifact: String },

    #[error("Failed to spawn worker process '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write prompt file at {path}: {source}")]
    PromptWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write log file at {path}: {source}")]
    LogWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the orchestration loop and state store.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A run is already in progress at phase '{phase}' (resume it or reset first)")]
    RunInProgress { phase: String },

    #[error("Another orchestrator holds the lock on {path}")]
    Locked { path: PathBuf },

    #[error("Failed to read state file at {path}: {source}")]
    StateReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file at {path} is corrupt: {source}")]
    StateCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write state file at {path}: {source}")]
    StateWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Map this error onto the process exit-code contract.
    ///
    /// Graph and definition problems (including a missing dependency, which
    /// can only arise from a mis-sequenced workflow) are configuration
    /// errors; everything the worker did wrong is a task error.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Dispatch(DispatchError::MissingDependency { .. }) => EXIT_CONFIG,
            EngineError::Dispatch(_) => EXIT_TASK,
            _ => EXIT_CONFIG,
        }
    }
}
