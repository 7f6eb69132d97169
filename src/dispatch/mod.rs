//! Task dispatch: resolve a phase's inputs, invoke its workers, collect
//! declared outputs.
//!
//! The `Worker` trait is the task-execution boundary; `ProcessWorker` is the
//! production implementation. `Dispatcher` fans a phase's tasks out
//! concurrently, waits for every invocation to return, and only then judges
//! the attempt. Catalog commits stay with the caller, so a failed attempt
//! never leaves partial state behind.

pub mod process;
pub mod stream;

pub use process::ProcessWorker;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::debug;

use crate::engine::state::{ArtifactEntry, WorkflowState};
use crate::errors::DispatchError;
use crate::graph::PhaseNode;

/// One resolved input artifact handed to a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    pub id: String,
    pub path: PathBuf,
}

/// Everything a worker needs to run one task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Opaque worker ref, "category:name"
    pub task: String,
    pub phase_id: String,
    pub phase_name: String,
    /// 1-based attempt number for this phase; gate retries bump it
    pub attempt: u32,
    pub brief: Option<String>,
    pub inputs: Vec<ResolvedInput>,
    /// Directory the worker must write declared outputs into
    pub artifact_dir: PathBuf,
    /// Artifact ids the phase declares
    pub outputs: Vec<String>,
    /// Gate phases must end their report with a metric tag
    pub wants_metric: bool,
}

/// What a worker returns on success.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    /// The worker's final text (result event, or the accumulated stream)
    pub text: String,
    /// Transcript location, for diagnostics
    pub log_file: Option<PathBuf>,
}

/// The task-execution boundary. Implementations run one task to completion
/// and report failure through the dispatch error taxonomy.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, request: TaskRequest) -> Result<TaskOutput, DispatchError>;
}

/// Result of a successful phase dispatch: catalog entries ready to commit
/// plus the collected worker outputs.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub entries: Vec<ArtifactEntry>,
    pub outputs: Vec<TaskOutput>,
}

/// Where an artifact id lives on disk.
pub fn artifact_path(artifact_dir: &Path, artifact: &str) -> PathBuf {
    artifact_dir.join(format!("{artifact}.md"))
}

/// Resolve a phase's required inputs against the catalog. The first id that
/// is not cataloged, or whose file is gone, fails the whole dispatch.
pub fn resolve_inputs(
    node: &PhaseNode,
    state: &WorkflowState,
) -> Result<Vec<ResolvedInput>, DispatchError> {
    let mut inputs = Vec::new();
    for required in &node.requires {
        let entry = state
            .artifact(required)
            .ok_or_else(|| DispatchError::MissingDependency {
                phase: node.id.clone(),
                artifact: required.clone(),
            })?;
        if !entry.path.exists() {
            return Err(DispatchError::MissingDependency {
                phase: node.id.clone(),
                artifact: required.clone(),
            });
        }
        inputs.push(ResolvedInput {
            id: entry.id.clone(),
            path: entry.path.clone(),
        });
    }
    Ok(inputs)
}

/// Dispatches one phase at a time to a worker.
pub struct Dispatcher<W: Worker> {
    worker: W,
    artifact_dir: PathBuf,
}

impl<W: Worker> Dispatcher<W> {
    pub fn new(worker: W, artifact_dir: PathBuf) -> Self {
        Self {
            worker,
            artifact_dir,
        }
    }

    /// Dispatch one phase: verify inputs, fan out every task, join, then
    /// verify each declared output landed on disk.
    pub async fn dispatch(
        &self,
        node: &PhaseNode,
        state: &WorkflowState,
        attempt: u32,
    ) -> Result<DispatchOutcome, DispatchError> {
        let inputs = resolve_inputs(node, state)?;

        let requests: Vec<TaskRequest> = node
            .tasks
            .iter()
            .map(|task| TaskRequest {
                task: task.clone(),
                phase_id: node.id.clone(),
                phase_name: node.name.clone(),
                attempt,
                brief: state.brief.clone(),
                inputs: inputs.clone(),
                artifact_dir: self.artifact_dir.clone(),
                outputs: node.produces.clone(),
                wants_metric: node.is_gate(),
            })
            .collect();

        debug!(phase = %node.id, tasks = requests.len(), attempt, "dispatching phase");

        // The join barrier: every invocation returns before any is judged
        let results = join_all(requests.into_iter().map(|req| self.worker.invoke(req))).await;

        let mut outputs = Vec::new();
        for result in results {
            outputs.push(result?);
        }

        let now = Utc::now();
        let mut entries = Vec::new();
        for artifact in &node.produces {
            let path = artifact_path(&self.artifact_dir, artifact);
            if !path.exists() {
                return Err(DispatchError::MissingOutput {
                    task: node.tasks.join(", "),
                    artifact: artifact.clone(),
                });
            }
            entries.push(ArtifactEntry {
                id: artifact.clone(),
                path,
                produced_by: node.id.clone(),
                recorded_at: now,
            });
        }

        Ok(DispatchOutcome { entries, outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GateSpec, Threshold};
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// Test double: records invocations, writes declared outputs, and fails
    /// on request.
    struct StubWorker {
        fail_task: Option<String>,
        write_outputs: bool,
        invocations: Arc<Mutex<Vec<TaskRequest>>>,
    }

    impl StubWorker {
        fn new() -> Self {
            Self {
                fail_task: None,
                write_outputs: true,
                invocations: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn failing_on(task: &str) -> Self {
            Self {
                fail_task: Some(task.to_string()),
                ..Self::new()
            }
        }

        fn invocation_count(&self) -> usize {
            self.invocations.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Worker for StubWorker {
        async fn invoke(&self, request: TaskRequest) -> Result<TaskOutput, DispatchError> {
            self.invocations.lock().unwrap().push(request.clone());
            if self.fail_task.as_deref() == Some(request.task.as_str()) {
                return Err(DispatchError::TaskFailed {
                    phase: request.phase_id.clone(),
                    task: request.task.clone(),
                    message: "stub failure".to_string(),
                });
            }
            if self.write_outputs {
                for artifact in &request.outputs {
                    fs::write(
                        artifact_path(&request.artifact_dir, artifact),
                        format!("output of {}", request.task),
                    )
                    .unwrap();
                }
            }
            Ok(TaskOutput {
                text: format!("{} done", request.task),
                log_file: None,
            })
        }
    }

    fn test_node() -> PhaseNode {
        PhaseNode::normal("implement", "Implementation", vec!["build:implement".into()], "test")
            .with_requires(vec!["plan".into()])
            .with_produces(vec!["change-summary".into()])
    }

    fn state_with_artifact(dir: &Path, id: &str) -> WorkflowState {
        let graph =
            crate::graph::WorkflowGraph::from_phases(crate::graph::default_workflow()).unwrap();
        let mut state = WorkflowState::new(&graph);
        let path = artifact_path(dir, id);
        fs::write(&path, "content").unwrap();
        state.record_artifact(ArtifactEntry {
            id: id.to_string(),
            path,
            produced_by: "plan".to_string(),
            recorded_at: Utc::now(),
        });
        state
    }

    #[tokio::test]
    async fn test_dispatch_fails_when_dependency_not_cataloged() {
        let dir = tempdir().unwrap();
        let graph =
            crate::graph::WorkflowGraph::from_phases(crate::graph::default_workflow()).unwrap();
        let state = WorkflowState::new(&graph);
        let worker = StubWorker::new();
        let dispatcher = Dispatcher::new(worker, dir.path().to_path_buf());

        let result = dispatcher.dispatch(&test_node(), &state, 1).await;
        match result {
            Err(DispatchError::MissingDependency { phase, artifact }) => {
                assert_eq!(phase, "implement");
                assert_eq!(artifact, "plan");
            }
            other => panic!("Expected MissingDependency, got {other:?}"),
        }
        // The worker is never invoked when inputs are missing
        assert_eq!(dispatcher.worker.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_fails_when_dependency_file_is_gone() {
        let dir = tempdir().unwrap();
        let mut state = state_with_artifact(dir.path(), "plan");
        fs::remove_file(&state.artifacts[0].path).unwrap();
        state.artifacts[0].path = artifact_path(dir.path(), "plan");

        let dispatcher = Dispatcher::new(StubWorker::new(), dir.path().to_path_buf());
        let result = dispatcher.dispatch(&test_node(), &state, 1).await;
        assert!(matches!(
            result,
            Err(DispatchError::MissingDependency { artifact, .. }) if artifact == "plan"
        ));
    }

    #[tokio::test]
    async fn test_dispatch_collects_declared_outputs() {
        let dir = tempdir().unwrap();
        let state = state_with_artifact(dir.path(), "plan");
        let dispatcher = Dispatcher::new(StubWorker::new(), dir.path().to_path_buf());

        let outcome = dispatcher.dispatch(&test_node(), &state, 1).await.unwrap();

        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].id, "change-summary");
        assert_eq!(outcome.entries[0].produced_by, "implement");
        assert!(outcome.entries[0].path.exists());
        assert_eq!(outcome.outputs.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_every_task() {
        let dir = tempdir().unwrap();
        let node = PhaseNode::gate(
            "review",
            "Review gate",
            vec!["quality:review-a".into(), "quality:review-b".into()],
            "docs",
            "implement",
            GateSpec::new(Threshold::le(0.0), 3),
        )
        .with_produces(vec!["review-findings".into()]);
        let graph =
            crate::graph::WorkflowGraph::from_phases(crate::graph::default_workflow()).unwrap();
        let state = WorkflowState::new(&graph);
        let dispatcher = Dispatcher::new(StubWorker::new(), dir.path().to_path_buf());

        let outcome = dispatcher.dispatch(&node, &state, 1).await.unwrap();

        assert_eq!(dispatcher.worker.invocation_count(), 2);
        assert_eq!(outcome.outputs.len(), 2);
        let requests = dispatcher.worker.invocations.lock().unwrap();
        assert!(requests.iter().all(|r| r.wants_metric));
    }

    #[tokio::test]
    async fn test_dispatch_judges_only_after_all_tasks_return() {
        let dir = tempdir().unwrap();
        let node = PhaseNode::gate(
            "review",
            "Review gate",
            vec!["quality:review-a".into(), "quality:review-b".into()],
            "docs",
            "implement",
            GateSpec::new(Threshold::le(0.0), 3),
        )
        .with_produces(vec!["review-findings".into()]);
        let graph =
            crate::graph::WorkflowGraph::from_phases(crate::graph::default_workflow()).unwrap();
        let state = WorkflowState::new(&graph);
        let worker = StubWorker::failing_on("quality:review-a");
        let dispatcher = Dispatcher::new(worker, dir.path().to_path_buf());

        let result = dispatcher.dispatch(&node, &state, 1).await;

        assert!(matches!(
            result,
            Err(DispatchError::TaskFailed { task, .. }) if task == "quality:review-a"
        ));
        // Both invocations completed before the failure was reported
        assert_eq!(dispatcher.worker.invocation_count(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_fails_when_output_is_missing() {
        let dir = tempdir().unwrap();
        let state = state_with_artifact(dir.path(), "plan");
        let worker = StubWorker {
            write_outputs: false,
            ..StubWorker::new()
        };
        let dispatcher = Dispatcher::new(worker, dir.path().to_path_buf());

        let result = dispatcher.dispatch(&test_node(), &state, 1).await;
        assert!(matches!(
            result,
            Err(DispatchError::MissingOutput { artifact, .. }) if artifact == "change-summary"
        ));
    }

    #[tokio::test]
    async fn test_requests_carry_phase_context() {
        let dir = tempdir().unwrap();
        let mut state = state_with_artifact(dir.path(), "plan");
        state.brief = Some("ship the login page".to_string());
        let dispatcher = Dispatcher::new(StubWorker::new(), dir.path().to_path_buf());

        dispatcher.dispatch(&test_node(), &state, 3).await.unwrap();

        let requests = dispatcher.worker.invocations.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].phase_id, "implement");
        assert_eq!(requests[0].attempt, 3);
        assert_eq!(requests[0].brief.as_deref(), Some("ship the login page"));
        assert_eq!(requests[0].inputs.len(), 1);
        assert_eq!(requests[0].inputs[0].id, "plan");
        assert!(!requests[0].wants_metric);
    }
}
