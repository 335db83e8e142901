//! Scheduler configuration
//!
//! Runtime knobs for worker supervision and workspace layout. Every field
//! has a default so a config file only needs to name what it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for batch execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    /// Command line used to start one worker; the unit id is appended.
    pub worker_command: Vec<String>,

    /// Seconds between liveness polls
    pub poll_interval_secs: u64,

    /// Consecutive polls without progress before a worker is considered stalled
    pub stall_polls: u32,

    /// Wall-clock timeout per unit in seconds (0 = unlimited)
    pub unit_timeout_secs: u64,

    /// Directory (relative to the repository) holding unit worktrees
    pub worktree_base: String,

    /// Prefix for per-unit branch names
    pub branch_prefix: String,

    /// File inside a workspace that workers touch to signal progress
    pub progress_marker: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_command: vec!["stagehand-worker".to_string()],
            poll_interval_secs: 20,
            stall_polls: 2,
            unit_timeout_secs: 900, // 15 minutes
            worktree_base: "worktrees".to_string(),
            branch_prefix: "stagehand".to_string(),
            progress_marker: ".stagehand-progress".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        let config: SchedulerConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Load from a file when one is given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// Branch name for one unit of one batch.
    pub fn branch_for(&self, batch_id: u32, unit_id: &str) -> String {
        format!("{}/{}/{}", self.branch_prefix, batch_id, unit_id)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }
}
