//! Run state persistence for the cursus orchestrator.
//!
//! `WorkflowState` is the single source of truth for resumability: current
//! phase, completion history, gate records, the artifact catalog, and any
//! pending escalation. `StateStore` persists it as pretty JSON with an
//! atomic temp-file write, and guards the file with an advisory lock so a
//! second orchestrator instance fails fast instead of interleaving saves.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::graph::WorkflowGraph;

/// Result of a gate evaluation, kept per gate phase id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateRecord {
    pub passed: bool,
    /// Extracted metric, absent when the report carried no tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
    /// Failed attempts so far; resets to 0 when the gate passes
    pub iteration: u32,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// A cataloged artifact. The orchestrator owns the catalog entry, the
/// worker owns the file content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactEntry {
    pub id: String,
    pub path: PathBuf,
    pub produced_by: String,
    pub recorded_at: DateTime<Utc>,
}

/// Set when a gate exhausts its retries. Automatic progression halts until
/// a human clears it via `goto` or `reset`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Escalation {
    pub phase: String,
    pub reason: String,
    pub iterations: u32,
    pub raised_at: DateTime<Utc>,
}

/// The persisted record of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub run_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
    /// Fingerprint of the workflow the run started under
    pub graph_hash: String,
    /// Always a valid phase id in the workflow graph
    pub current_phase: String,
    /// Completion history in order; re-entry moves an id to the tail
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub gates: BTreeMap<String, GateRecord>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh state positioned at the graph's initial phase.
    pub fn new(graph: &WorkflowGraph) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            brief: None,
            graph_hash: graph.fingerprint().to_string(),
            current_phase: graph.initial().id.clone(),
            completed: Vec::new(),
            gates: BTreeMap::new(),
            artifacts: Vec::new(),
            escalation: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark a phase completed. Re-entry moves the id to the tail instead of
    /// duplicating it.
    pub fn mark_completed(&mut self, phase: &str) {
        self.completed.retain(|p| p != phase);
        self.completed.push(phase.to_string());
    }

    /// Replace-or-append a catalog entry. A re-entered phase overwrites its
    /// earlier entry in place.
    pub fn record_artifact(&mut self, entry: ArtifactEntry) {
        if let Some(existing) = self.artifacts.iter_mut().find(|a| a.id == entry.id) {
            *existing = entry;
        } else {
            self.artifacts.push(entry);
        }
    }

    /// Look up a cataloged artifact by id.
    pub fn artifact(&self, id: &str) -> Option<&ArtifactEntry> {
        self.artifacts.iter().find(|a| a.id == id)
    }

    /// Failed attempts recorded so far for a gate (0 before first entry).
    pub fn gate_iteration(&self, phase: &str) -> u32 {
        self.gates.get(phase).map(|g| g.iteration).unwrap_or(0)
    }

    pub fn is_escalated(&self) -> bool {
        self.escalation.is_some()
    }

    /// Halt automatic progression at a gate that exhausted its retries.
    pub fn escalate(&mut self, phase: &str, reason: &str, iterations: u32) {
        self.escalation = Some(Escalation {
            phase: phase.to_string(),
            reason: reason.to_string(),
            iterations,
            raised_at: Utc::now(),
        });
    }

    /// Clear a pending escalation (a human repositioned the run).
    pub fn clear_escalation(&mut self) {
        self.escalation = None;
    }
}

/// Persists `WorkflowState` to a single JSON file.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_file: PathBuf,
}

impl StateStore {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn exists(&self) -> bool {
        self.state_file.exists()
    }

    pub fn path(&self) -> &Path {
        &self.state_file
    }

    /// Take the advisory single-writer lock next to the state file. Held
    /// for the whole run; releases on drop.
    pub fn lock(&self) -> Result<StateLock, EngineError> {
        let path = self.state_file.with_extension("lock");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| EngineError::StateWriteFailed {
                path: path.clone(),
                source,
            })?;
        }
        let file = File::create(&path).map_err(|source| EngineError::StateWriteFailed {
            path: path.clone(),
            source,
        })?;
        file.try_lock_exclusive()
            .map_err(|_| EngineError::Locked { path })?;
        Ok(StateLock { _file: file })
    }

    /// Load persisted state; a missing file initializes a fresh run at the
    /// graph's initial phase. A present-but-unreadable file is an error,
    /// never silently recreated.
    pub fn load_or_init(&self, graph: &WorkflowGraph) -> Result<WorkflowState, EngineError> {
        if !self.state_file.exists() {
            return Ok(WorkflowState::new(graph));
        }
        let content =
            fs::read_to_string(&self.state_file).map_err(|source| EngineError::StateReadFailed {
                path: self.state_file.clone(),
                source,
            })?;
        let state =
            serde_json::from_str(&content).map_err(|source| EngineError::StateCorrupt {
                path: self.state_file.clone(),
                source,
            })?;
        Ok(state)
    }

    /// Persist atomically: write to a temp file in the same directory, then
    /// rename over the target so a reader never sees a partial document.
    pub fn save(&self, state: &mut WorkflowState) -> Result<(), EngineError> {
        state.updated_at = Utc::now();
        let json =
            serde_json::to_string_pretty(state).context("Failed to serialize run state")?;

        let dir = match self.state_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|source| EngineError::StateWriteFailed {
            path: self.state_file.clone(),
            source,
        })?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|source| EngineError::StateWriteFailed {
            path: self.state_file.clone(),
            source,
        })?;
        tmp.write_all(json.as_bytes())
            .map_err(|source| EngineError::StateWriteFailed {
                path: self.state_file.clone(),
                source,
            })?;
        tmp.persist(&self.state_file)
            .map_err(|e| EngineError::StateWriteFailed {
                path: self.state_file.clone(),
                source: e.error,
            })?;
        Ok(())
    }

    /// Remove the state file. Artifact files are left on disk; their
    /// catalog entries live inside the state document and go with it.
    pub fn reset(&self) -> Result<(), EngineError> {
        if self.state_file.exists() {
            fs::remove_file(&self.state_file).map_err(|source| EngineError::StateWriteFailed {
                path: self.state_file.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Advisory exclusive lock on the state file; releases on drop.
pub struct StateLock {
    _file: File,
}
