//! Initialization module for cursus projects.
//!
//! This module provides the `cursus init` functionality to create the
//! `.cursus/` directory structure in a project:
//!
//! ```text
//! .cursus/
//! ├── workflow.json    # Phase graph (built-in default)
//! ├── cursus.toml      # Settings
//! ├── artifacts/       # Worker-owned artifact files
//! └── logs/            # Per-attempt prompt and transcript files
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::graph::{WorkflowGraph, default_workflow_with};
use crate::settings::Settings;

/// The name of the cursus configuration directory.
pub const CURSUS_DIR: &str = ".cursus";

/// Result of initializing a cursus project.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the created .cursus directory
    pub cursus_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize a cursus project in the given directory.
///
/// Creates the `.cursus/` structure. Existing files are never overwritten;
/// re-running against a partially initialized project fills in whatever is
/// missing. A pre-existing cursus.toml contributes its `[policy]` budgets to
/// the scaffolded workflow.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let cursus_dir = project_dir.join(CURSUS_DIR);
    let created = !cursus_dir.exists();

    std::fs::create_dir_all(cursus_dir.join("artifacts")).with_context(|| {
        format!(
            "Failed to create artifacts directory: {}",
            cursus_dir.join("artifacts").display()
        )
    })?;
    std::fs::create_dir_all(cursus_dir.join("logs")).with_context(|| {
        format!(
            "Failed to create logs directory: {}",
            cursus_dir.join("logs").display()
        )
    })?;

    let settings_file = cursus_dir.join("cursus.toml");
    let settings = Settings::load_or_default(&settings_file)?;

    let workflow_file = cursus_dir.join("workflow.json");
    if !workflow_file.exists() {
        let graph = WorkflowGraph::from_phases(default_workflow_with(
            settings.policy.test_retries,
            settings.policy.review_retries,
        ))?;
        graph.save(&workflow_file)?;
    }

    if !settings_file.exists() {
        settings.save(&settings_file)?;
    }

    Ok(InitResult {
        cursus_dir,
        created,
    })
}

/// Check if a project is already initialized with cursus.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(CURSUS_DIR).exists()
}

/// Get the path to the cursus directory for a project.
pub fn get_cursus_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CURSUS_DIR)
}

/// Check if a workflow file exists and parses.
///
/// Returns `true` if `.cursus/workflow.json` exists and contains valid JSON.
pub fn has_workflow(project_dir: &Path) -> bool {
    let workflow_file = project_dir.join(CURSUS_DIR).join("workflow.json");
    if !workflow_file.exists() {
        return false;
    }
    match std::fs::read_to_string(&workflow_file) {
        Ok(content) => {
            if content.trim().is_empty() {
                return false;
            }
            serde_json::from_str::<serde_json::Value>(&content).is_ok()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // =========================================
    // init_project tests
    // =========================================

    #[test]
    fn test_init_project_creates_cursus_directory() {
        let dir = tempdir().unwrap();
        let result = init_project(dir.path()).unwrap();

        assert!(result.cursus_dir.exists());
        assert!(result.created);
        assert_eq!(result.cursus_dir, dir.path().join(".cursus"));
    }

    #[test]
    fn test_init_project_creates_required_subdirectories() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();

        let cursus_dir = dir.path().join(".cursus");
        assert!(cursus_dir.join("artifacts").is_dir());
        assert!(cursus_dir.join("logs").is_dir());
    }

    #[test]
    fn test_init_project_scaffolds_default_workflow() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();

        let workflow_file = dir.path().join(".cursus/workflow.json");
        assert!(workflow_file.exists());

        let graph = WorkflowGraph::load(&workflow_file).unwrap();
        assert_eq!(graph.initial().id, "discovery");
        assert_eq!(graph.terminal_id(), "complete");
        assert_eq!(graph.get("test").unwrap().gate.as_ref().unwrap().max_retries, 5);
        assert_eq!(
            graph.get("review").unwrap().gate.as_ref().unwrap().max_retries,
            3
        );
    }

    #[test]
    fn test_init_project_writes_default_settings() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();

        let settings = Settings::load(&dir.path().join(".cursus/cursus.toml")).unwrap();
        assert_eq!(settings.worker_command(), "agent");
        assert_eq!(settings.policy.test_retries, 5);
    }

    #[test]
    fn test_init_project_existing_directory_returns_created_false() {
        let dir = tempdir().unwrap();

        let result1 = init_project(dir.path()).unwrap();
        assert!(result1.created);

        let result2 = init_project(dir.path()).unwrap();
        assert!(!result2.created);
    }

    #[test]
    fn test_init_project_never_overwrites_existing_files() {
        let dir = tempdir().unwrap();
        let cursus_dir = dir.path().join(".cursus");
        std::fs::create_dir_all(&cursus_dir).unwrap();
        std::fs::write(cursus_dir.join("cursus.toml"), "[policy]\ntest_retries = 9\n").unwrap();

        init_project(dir.path()).unwrap();

        // Settings file kept as-is, and its policy reached the workflow
        let content = std::fs::read_to_string(cursus_dir.join("cursus.toml")).unwrap();
        assert!(content.contains("test_retries = 9"));
        let graph = WorkflowGraph::load(&cursus_dir.join("workflow.json")).unwrap();
        assert_eq!(graph.get("test").unwrap().gate.as_ref().unwrap().max_retries, 9);
    }

    #[test]
    fn test_init_project_keeps_existing_workflow() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let workflow_file = dir.path().join(".cursus/workflow.json");
        let before = std::fs::read_to_string(&workflow_file).unwrap();

        init_project(dir.path()).unwrap();

        let after = std::fs::read_to_string(&workflow_file).unwrap();
        assert_eq!(before, after);
    }

    // =========================================
    // probe tests
    // =========================================

    #[test]
    fn test_is_initialized_returns_false_for_new_project() {
        let dir = tempdir().unwrap();
        assert!(!is_initialized(dir.path()));
    }

    #[test]
    fn test_is_initialized_returns_true_after_init() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        assert!(is_initialized(dir.path()));
    }

    #[test]
    fn test_get_cursus_dir() {
        let dir = tempdir().unwrap();
        assert_eq!(get_cursus_dir(dir.path()), dir.path().join(".cursus"));
    }

    #[test]
    fn test_has_workflow_returns_false_when_not_initialized() {
        let dir = tempdir().unwrap();
        assert!(!has_workflow(dir.path()));
    }

    #[test]
    fn test_has_workflow_returns_false_for_invalid_json() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        std::fs::write(dir.path().join(".cursus/workflow.json"), "not valid json").unwrap();
        assert!(!has_workflow(dir.path()));
    }

    #[test]
    fn test_has_workflow_returns_true_after_init() {
        let dir = tempdir().unwrap();
        init_project(dir.path()).unwrap();
        assert!(has_workflow(dir.path()));
    }
}
