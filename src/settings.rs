//! Settings layer for `.cursus/cursus.toml`.
//!
//! Layered resolution: file, then environment, then built-in defaults.
//!
//! # Configuration File Format
//!
//! ```toml
//! [worker]
//! command = "agent"
//! extra_args = []
//! skip_permissions = true
//!
//! [policy]
//! test_retries = 5
//! review_retries = 3
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Worker subprocess settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Worker command (default: "agent")
    #[serde(default)]
    pub command: Option<String>,
    /// Extra flags appended after the standard invocation flags
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Whether to pass the skip-permissions flag to the worker
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
}

fn default_skip_permissions() -> bool {
    true
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            command: None,
            extra_args: Vec::new(),
            skip_permissions: default_skip_permissions(),
        }
    }
}

/// Retry budgets applied when scaffolding the default workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    /// Gate retries for the test phase
    #[serde(default = "default_test_retries")]
    pub test_retries: u32,
    /// Gate retries for the review phase
    #[serde(default = "default_review_retries")]
    pub review_retries: u32,
}

fn default_test_retries() -> u32 {
    5
}

fn default_review_retries() -> u32 {
    3
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            test_retries: default_test_retries(),
            review_retries: default_review_retries(),
        }
    }
}

/// The complete cursus.toml configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Worker subprocess settings
    #[serde(default)]
    pub worker: WorkerSection,
    /// Retry policy defaults
    #[serde(default)]
    pub policy: PolicySection,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse settings from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse cursus.toml")
    }

    /// Load from the given path, or defaults when the file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize cursus.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        Ok(())
    }

    /// Get the worker command (file, then environment, then default).
    pub fn worker_command(&self) -> String {
        self.worker
            .command
            .clone()
            .or_else(|| std::env::var("CURSUS_WORKER_CMD").ok())
            .unwrap_or_else(|| "agent".to_string())
    }

    /// Get skip_permissions (environment can override the file).
    pub fn skip_permissions(&self) -> bool {
        if let Ok(env_val) = std::env::var("CURSUS_SKIP_PERMISSIONS") {
            return env_val != "false";
        }
        self.worker.skip_permissions
    }

    /// Assemble the invocation flags for the worker subprocess.
    pub fn worker_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions() {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        flags.push("--print".to_string());
        flags.push("--output-format".to_string());
        flags.push("stream-json".to_string());
        flags.push("--verbose".to_string());
        flags.extend(self.worker.extra_args.iter().cloned());
        flags
    }

    /// Validate the settings and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(ref command) = self.worker.command
            && command.trim().is_empty()
        {
            warnings.push("worker.command is empty; the default 'agent' will not apply".into());
        }
        if self.policy.test_retries == 0 {
            warnings.push("policy.test_retries is 0: the test gate escalates on its first failure".into());
        }
        if self.policy.review_retries == 0 {
            warnings.push(
                "policy.review_retries is 0: the review gate escalates on its first failure".into(),
            );
        }

        warnings
    }
}
