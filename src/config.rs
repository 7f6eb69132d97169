use anyhow::{Context, Result};
use glob::glob;
use std::path::PathBuf;

/// Runtime configuration for cursus.
///
/// Resolves the project layout once so every subsystem works from the same
/// paths. Handles workflow file discovery when none is given explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub cursus_dir: PathBuf,
    pub workflow_file: PathBuf,
    pub settings_file: PathBuf,
    pub state_file: PathBuf,
    pub artifact_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
}

impl Config {
    /// Create a new Config rooted at the given project directory.
    ///
    /// An explicit workflow file must exist; without one, discovery checks
    /// `.cursus/workflow.json` and then `*.workflow.json` in the project
    /// root. When nothing is found the default path is kept and the loader
    /// falls back to the built-in workflow.
    pub fn new(
        project_dir: PathBuf,
        verbose: bool,
        workflow_file: Option<PathBuf>,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let cursus_dir = project_dir.join(".cursus");
        let workflow_file = match workflow_file {
            Some(path) => path
                .canonicalize()
                .context("Failed to resolve workflow file path")?,
            None => Self::find_workflow_file(&project_dir, &cursus_dir)?,
        };
        let settings_file = cursus_dir.join("cursus.toml");
        let state_file = cursus_dir.join("state.json");
        let artifact_dir = cursus_dir.join("artifacts");
        let log_dir = cursus_dir.join("logs");

        Ok(Self {
            project_dir,
            cursus_dir,
            workflow_file,
            settings_file,
            state_file,
            artifact_dir,
            log_dir,
            verbose,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.artifact_dir)
            .context("Failed to create artifact directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Find a workflow file, checking .cursus/workflow.json first, then
    /// *.workflow.json in the project root. Returns the most recently
    /// modified match, or the default path when nothing exists yet.
    fn find_workflow_file(project_dir: &PathBuf, cursus_dir: &PathBuf) -> Result<PathBuf> {
        let default_file = cursus_dir.join("workflow.json");
        if default_file.exists() {
            return Ok(default_file);
        }

        let pattern = project_dir
            .join("*.workflow.json")
            .to_string_lossy()
            .to_string();

        let mut candidates: Vec<PathBuf> = glob(&pattern)
            .context("Failed to read glob pattern")?
            .filter_map(|entry| entry.ok())
            .collect();

        if candidates.is_empty() {
            // Loader substitutes the built-in workflow for a missing file
            return Ok(default_file);
        }

        candidates.sort_by(|a, b| {
            let a_time = a.metadata().and_then(|m| m.modified()).ok();
            let b_time = b.metadata().and_then(|m| m.modified()).ok();
            b_time.cmp(&a_time)
        });

        Ok(candidates.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_paths_live_under_cursus_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false, None).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.state_file, root.join(".cursus/state.json"));
        assert_eq!(config.settings_file, root.join(".cursus/cursus.toml"));
        assert_eq!(config.artifact_dir, root.join(".cursus/artifacts"));
        assert_eq!(config.log_dir, root.join(".cursus/logs"));
    }

    #[test]
    fn test_config_new_with_explicit_workflow() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("custom.workflow.json");
        fs::write(&file, "{}").unwrap();
        let config = Config::new(dir.path().to_path_buf(), true, Some(file.clone())).unwrap();
        assert!(config.verbose);
        assert_eq!(config.workflow_file, file.canonicalize().unwrap());
    }

    #[test]
    fn test_config_explicit_workflow_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("gone.json");
        let result = Config::new(dir.path().to_path_buf(), false, Some(missing));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_prefers_cursus_workflow_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".cursus")).unwrap();
        fs::write(dir.path().join(".cursus/workflow.json"), "{}").unwrap();
        fs::write(dir.path().join("other.workflow.json"), "{}").unwrap();
        let config = Config::new(dir.path().to_path_buf(), false, None).unwrap();
        assert!(config.workflow_file.ends_with(".cursus/workflow.json"));
    }

    #[test]
    fn test_config_discovers_workflow_in_project_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("release.workflow.json"), "{}").unwrap();
        let config = Config::new(dir.path().to_path_buf(), false, None).unwrap();
        assert!(config.workflow_file.ends_with("release.workflow.json"));
    }

    #[test]
    fn test_config_defaults_when_no_workflow_exists() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false, None).unwrap();
        assert!(config.workflow_file.ends_with(".cursus/workflow.json"));
        assert!(!config.workflow_file.exists());
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false, None).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.artifact_dir.exists());
        assert!(config.log_dir.exists());
    }
}
