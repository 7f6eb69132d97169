//! Workflow graph definition and JSON loading for the cursus orchestrator.
//!
//! This module provides:
//! - `PhaseNode` struct representing a single phase in the workflow
//! - `WorkflowGraph`, the validated phase table the engine walks
//! - Loading functions for JSON-based workflow configuration
//! - The built-in default workflow as a fallback

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::GraphError;

/// Whether a phase passes straight through or branches on a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    #[default]
    Normal,
    Gate,
}

/// Comparison operator for a gate threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdOp {
    Eq,
    Ge,
    Le,
}

impl fmt::Display for ThresholdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdOp::Eq => write!(f, "eq"),
            ThresholdOp::Ge => write!(f, "ge"),
            ThresholdOp::Le => write!(f, "le"),
        }
    }
}

/// A gate's pass criterion: `metric <op> value`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub op: ThresholdOp,
    pub value: f64,
}

impl Threshold {
    pub fn eq(value: f64) -> Self {
        Self {
            op: ThresholdOp::Eq,
            value,
        }
    }

    pub fn ge(value: f64) -> Self {
        Self {
            op: ThresholdOp::Ge,
            value,
        }
    }

    pub fn le(value: f64) -> Self {
        Self {
            op: ThresholdOp::Le,
            value,
        }
    }

    /// Whether a measured metric satisfies this threshold.
    pub fn accepts(&self, metric: f64) -> bool {
        match self.op {
            ThresholdOp::Eq => (metric - self.value).abs() < f64::EPSILON,
            ThresholdOp::Ge => metric >= self.value,
            ThresholdOp::Le => metric <= self.value,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.value)
    }
}

/// Pass criterion and retry budget for a gate phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSpec {
    pub threshold: Threshold,
    /// Failed attempts allowed before the gate escalates to a human.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl GateSpec {
    pub fn new(threshold: Threshold, max_retries: u32) -> Self {
        Self {
            threshold,
            max_retries,
        }
    }
}

/// Represents a single phase in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseNode {
    /// Stable phase id (e.g. "implement"), unique within the workflow
    pub id: String,
    /// Human-readable name of the phase
    pub name: String,
    /// Pass-through phase or branching gate (defaults to normal)
    #[serde(default)]
    pub kind: PhaseKind,
    /// Worker task refs ("category:name") dispatched when the phase runs
    #[serde(default)]
    pub tasks: Vec<String>,
    /// Artifact ids that must already be in the catalog before dispatch
    #[serde(default)]
    pub requires: Vec<String>,
    /// Artifact ids the phase's tasks must produce
    #[serde(default)]
    pub produces: Vec<String>,
    /// Success edge; absent only on the terminal phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    /// Loop-back edge taken when the gate fails (gates only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    /// Pass criterion for the gate check (gates only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<GateSpec>,
}

impl PhaseNode {
    /// Create a pass-through phase.
    pub fn normal(id: &str, name: &str, tasks: Vec<String>, next: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind: PhaseKind::Normal,
            tasks,
            requires: Vec::new(),
            produces: Vec::new(),
            next: Some(next.to_string()),
            on_failure: None,
            gate: None,
        }
    }

    /// Create a gate phase with its threshold and loop-back edge.
    pub fn gate(
        id: &str,
        name: &str,
        tasks: Vec<String>,
        next: &str,
        on_failure: &str,
        gate: GateSpec,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind: PhaseKind::Gate,
            tasks,
            requires: Vec::new(),
            produces: Vec::new(),
            next: Some(next.to_string()),
            on_failure: Some(on_failure.to_string()),
            gate: Some(gate),
        }
    }

    /// Create the terminal phase (no tasks, no outgoing edges).
    pub fn terminal(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind: PhaseKind::Normal,
            tasks: Vec::new(),
            requires: Vec::new(),
            produces: Vec::new(),
            next: None,
            on_failure: None,
            gate: None,
        }
    }

    /// Attach required input artifact ids.
    pub fn with_requires(mut self, requires: Vec<String>) -> Self {
        self.requires = requires;
        self
    }

    /// Attach produced output artifact ids.
    pub fn with_produces(mut self, produces: Vec<String>) -> Self {
        self.produces = produces;
        self
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.next.is_none()
    }

    #[inline]
    pub fn is_gate(&self) -> bool {
        self.kind == PhaseKind::Gate
    }

    /// The gate's report artifact: the first produced artifact id.
    pub fn report_artifact(&self) -> Option<&str> {
        self.produces.first().map(|s| s.as_str())
    }
}

/// On-disk form of the workflow file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFile {
    /// Timestamp when the workflow was written
    #[serde(default)]
    pub generated_at: String,
    /// Ordered phase table; the first entry is the initial phase
    pub phases: Vec<PhaseNode>,
}

/// A validated workflow: every edge resolves, exactly one terminal phase
/// exists, gates are well-formed, and success edges are acyclic.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    phases: Vec<PhaseNode>,
    terminal: String,
    fingerprint: String,
}

impl WorkflowGraph {
    /// Validate a phase table and build the graph.
    pub fn from_phases(phases: Vec<PhaseNode>) -> Result<Self, GraphError> {
        let terminal = validate(&phases)?;
        let fingerprint = fingerprint_of(&phases);
        Ok(Self {
            phases,
            terminal,
            fingerprint,
        })
    }

    /// Load and validate a workflow from a JSON file.
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let content = std::fs::read_to_string(path).map_err(|source| GraphError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let file: WorkflowFile =
            serde_json::from_str(&content).map_err(|source| GraphError::ParseFailed {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_phases(file.phases)
    }

    /// Load a workflow file, falling back to the built-in default when the
    /// file does not exist. A present-but-broken file is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, GraphError> {
        if path.exists() {
            Self::load(path)
        } else {
            Self::from_phases(default_workflow())
        }
    }

    /// Save the phase table as a JSON workflow file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = WorkflowFile {
            generated_at: Utc::now().to_rfc3339(),
            phases: self.phases.clone(),
        };
        let content =
            serde_json::to_string_pretty(&file).context("Failed to serialize workflow to JSON")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write workflow file: {}", path.display()))?;
        Ok(())
    }

    /// The phase a fresh run starts from.
    pub fn initial(&self) -> &PhaseNode {
        &self.phases[0]
    }

    /// The id of the single terminal phase.
    pub fn terminal_id(&self) -> &str {
        &self.terminal
    }

    /// Look up a phase by id.
    pub fn get(&self, id: &str) -> Option<&PhaseNode> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All phases in table order.
    pub fn phases(&self) -> &[PhaseNode] {
        &self.phases
    }

    /// Short content hash of the phase table, recorded into run state so
    /// resume can notice the workflow changed underneath a run.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Validate the phase table, returning the terminal phase id.
fn validate(phases: &[PhaseNode]) -> Result<String, GraphError> {
    if phases.is_empty() {
        return Err(GraphError::Empty);
    }

    let mut seen = HashSet::new();
    for phase in phases {
        if !seen.insert(phase.id.as_str()) {
            return Err(GraphError::DuplicatePhase {
                phase: phase.id.clone(),
            });
        }
    }

    let terminals: Vec<&PhaseNode> = phases.iter().filter(|p| p.is_terminal()).collect();
    let terminal = match terminals.as_slice() {
        [] => return Err(GraphError::NoTerminal),
        [one] => one.id.clone(),
        [first, second, ..] => {
            return Err(GraphError::MultipleTerminals {
                first: first.id.clone(),
                second: second.id.clone(),
            });
        }
    };

    let ids: HashSet<&str> = phases.iter().map(|p| p.id.as_str()).collect();
    let produced: HashSet<&str> = phases
        .iter()
        .flat_map(|p| p.produces.iter().map(|a| a.as_str()))
        .collect();

    for phase in phases {
        for target in [&phase.next, &phase.on_failure].into_iter().flatten() {
            if !ids.contains(target.as_str()) {
                return Err(GraphError::UnknownEdgeTarget {
                    phase: phase.id.clone(),
                    target: target.clone(),
                });
            }
        }

        match phase.kind {
            PhaseKind::Normal => {
                if phase.on_failure.is_some() {
                    return Err(GraphError::FailureEdgeOnNormalPhase {
                        phase: phase.id.clone(),
                    });
                }
                if phase.gate.is_some() {
                    return Err(GraphError::GateSpecOnNormalPhase {
                        phase: phase.id.clone(),
                    });
                }
            }
            PhaseKind::Gate => {
                if phase.gate.is_none() {
                    return Err(GraphError::GateMissingSpec {
                        phase: phase.id.clone(),
                    });
                }
                if phase.on_failure.is_none() {
                    return Err(GraphError::GateMissingFailureEdge {
                        phase: phase.id.clone(),
                    });
                }
                if phase.next.is_none() {
                    return Err(GraphError::GateMissingSuccessEdge {
                        phase: phase.id.clone(),
                    });
                }
            }
        }

        if phase.is_terminal() {
            if !phase.tasks.is_empty() {
                return Err(GraphError::TerminalWithTasks {
                    phase: phase.id.clone(),
                });
            }
        } else if phase.tasks.is_empty() {
            return Err(GraphError::NoTasks {
                phase: phase.id.clone(),
            });
        }

        for artifact in &phase.requires {
            if !produced.contains(artifact.as_str()) {
                return Err(GraphError::UnknownRequirement {
                    phase: phase.id.clone(),
                    artifact: artifact.clone(),
                });
            }
        }
    }

    // Loop-back edges are the only permitted back edges; the success chain
    // from every phase must reach the terminal without revisiting a node.
    for start in phases {
        let mut visited = HashSet::new();
        let mut current = start;
        while let Some(next_id) = &current.next {
            if !visited.insert(current.id.as_str()) {
                return Err(GraphError::Cycle {
                    phase: current.id.clone(),
                });
            }
            // Edge targets were checked above.
            match phases.iter().find(|p| &p.id == next_id) {
                Some(next) => current = next,
                None => break,
            }
        }
    }

    Ok(terminal)
}

/// Short sha256 of the canonical phase table.
fn fingerprint_of(phases: &[PhaseNode]) -> String {
    let canonical = serde_json::to_string(phases).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")[..12].to_string()
}

/// The built-in development workflow used when no workflow file exists:
/// discover, plan, implement, then a test gate and a review gate that both
/// loop back to implement, docs, done.
pub fn default_workflow() -> Vec<PhaseNode> {
    default_workflow_with(5, 3)
}

/// The built-in workflow with explicit gate budgets, for scaffolding with
/// `[policy]` overrides from cursus.toml.
pub fn default_workflow_with(test_retries: u32, review_retries: u32) -> Vec<PhaseNode> {
    vec![
        PhaseNode::normal(
            "discovery",
            "Discovery",
            vec!["analysis:discovery".into()],
            "plan",
        )
        .with_produces(vec!["discovery-report".into()]),
        PhaseNode::normal("plan", "Planning", vec!["planning:plan".into()], "implement")
            .with_requires(vec!["discovery-report".into()])
            .with_produces(vec!["plan".into()]),
        PhaseNode::normal(
            "implement",
            "Implementation",
            vec!["build:implement".into()],
            "test",
        )
        .with_requires(vec!["plan".into()])
        .with_produces(vec!["change-summary".into()]),
        PhaseNode::gate(
            "test",
            "Test gate",
            vec!["quality:test".into()],
            "review",
            "implement",
            GateSpec::new(Threshold::eq(100.0), test_retries),
        )
        .with_requires(vec!["change-summary".into()])
        .with_produces(vec!["test-report".into()]),
        PhaseNode::gate(
            "review",
            "Review gate",
            vec![
                "quality:review-correctness".into(),
                "quality:review-design".into(),
            ],
            "docs",
            "implement",
            GateSpec::new(Threshold::eq(0.0), review_retries),
        )
        .with_requires(vec!["change-summary".into(), "test-report".into()])
        .with_produces(vec!["review-findings".into()]),
        PhaseNode::normal("docs", "Documentation", vec!["docs:sync".into()], "complete")
            .with_requires(vec!["review-findings".into()])
            .with_produces(vec!["docs-report".into()]),
        PhaseNode::terminal("complete", "Complete"),
    ]
}
