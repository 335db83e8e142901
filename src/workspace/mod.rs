// Isolated per-unit workspace allocation (branch + worktree directory)

use crate::error::SchedulerError;
use crate::git::GitManager;
use crate::models::{Workspace, WorkspaceStatus};
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Allocates and reclaims exclusively-owned workspaces.
///
/// Isolation is structural: every active workspace has its own worktree
/// directory and branch, so no locking is needed between workers.
pub struct WorkspaceManager {
    /// Base repository path
    repo_path: PathBuf,
    /// Directory holding unit worktrees
    worktree_base: PathBuf,
    /// Active allocations (unit_id -> workspace)
    allocations: HashMap<String, Workspace>,
}

impl WorkspaceManager {
    pub fn new(repo_path: impl AsRef<Path>, worktree_base: impl AsRef<Path>) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            worktree_base: worktree_base.as_ref().to_path_buf(),
            allocations: HashMap::new(),
        }
    }

    /// Allocate a workspace for one unit: create its branch (if missing),
    /// add a worktree under the base directory, and record the allocation.
    ///
    /// Fails without side effects if the unit already holds a workspace or
    /// the target path is taken by an active allocation.
    pub fn allocate(&mut self, unit_id: &str, branch: &str) -> Result<Workspace, SchedulerError> {
        if self.allocations.contains_key(unit_id) {
            return Err(SchedulerError::WorkspaceAllocation {
                unit: unit_id.to_string(),
                reason: "unit already has a workspace allocated".to_string(),
            });
        }

        let path = self.worktree_base.join(unit_id);
        if self.allocations.values().any(|w| Path::new(&w.path) == path) {
            return Err(SchedulerError::WorkspaceAllocation {
                unit: unit_id.to_string(),
                reason: format!("worktree path already allocated: {}", path.display()),
            });
        }
        if path.exists() {
            return Err(SchedulerError::WorkspaceAllocation {
                unit: unit_id.to_string(),
                reason: format!("worktree path already exists on disk: {}", path.display()),
            });
        }

        self.ensure_base_directory()
            .map_err(|e| SchedulerError::WorkspaceAllocation {
                unit: unit_id.to_string(),
                reason: format!("failed to create worktree base: {}", e),
            })?;

        let git = GitManager::new(&self.repo_path).map_err(|e| SchedulerError::WorkspaceAllocation {
            unit: unit_id.to_string(),
            reason: format!("failed to open repository: {}", e),
        })?;

        if !git.branch_exists(branch) {
            git.create_branch(branch)
                .map_err(|e| SchedulerError::WorkspaceAllocation {
                    unit: unit_id.to_string(),
                    reason: format!("failed to create branch '{}': {}", branch, e),
                })?;
        }

        git.create_worktree(&worktree_name(branch), &path, branch)
            .map_err(|e| SchedulerError::WorkspaceAllocation {
                unit: unit_id.to_string(),
                reason: format!("failed to add worktree: {}", e),
            })?;

        let workspace = Workspace {
            unit_id: unit_id.to_string(),
            path: path.to_string_lossy().to_string(),
            branch: branch.to_string(),
            status: WorkspaceStatus::Active,
            created_at: Utc::now(),
        };

        log::info!(
            "[WorkspaceManager] Allocated workspace for unit '{}' at {} (branch {})",
            unit_id,
            workspace.path,
            branch
        );

        self.allocations.insert(unit_id.to_string(), workspace.clone());
        Ok(workspace)
    }

    /// Mark a unit's workspace as having finished execution. The worktree
    /// stays on disk until the merge outcome is final.
    pub fn mark_completed(&mut self, unit_id: &str) {
        if let Some(workspace) = self.allocations.get_mut(unit_id) {
            workspace.status = WorkspaceStatus::Completed;
        }
    }

    /// Reclaim a unit's workspace: remove the worktree and drop the
    /// allocation. Idempotent; reclaiming an unknown or already-reclaimed
    /// workspace is a no-op, which tolerates supervisor retries.
    pub fn reclaim(&mut self, unit_id: &str) -> Result<()> {
        let Some(workspace) = self.allocations.remove(unit_id) else {
            return Ok(());
        };

        let git = GitManager::new(&self.repo_path)?;
        if let Err(e) = git.remove_worktree(&worktree_name(&workspace.branch), Path::new(&workspace.path)) {
            log::warn!(
                "[WorkspaceManager] Failed to remove worktree for unit '{}': {}",
                unit_id,
                e
            );
        }

        log::info!("[WorkspaceManager] Reclaimed workspace for unit '{}'", unit_id);
        Ok(())
    }

    /// Reclaim every remaining workspace. Best effort.
    pub fn reclaim_all(&mut self) {
        let unit_ids: Vec<String> = self.allocations.keys().cloned().collect();
        for unit_id in unit_ids {
            let _ = self.reclaim(&unit_id);
        }
    }

    pub fn get(&self, unit_id: &str) -> Option<&Workspace> {
        self.allocations.get(unit_id)
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_allocated(&self, unit_id: &str) -> bool {
        self.allocations.contains_key(unit_id)
    }

    fn ensure_base_directory(&self) -> std::io::Result<()> {
        if !self.worktree_base.exists() {
            std::fs::create_dir_all(&self.worktree_base)?;
        }
        Ok(())
    }
}

/// Worktree names must be unique across the repository and cannot contain
/// path separators, so the branch name is flattened.
fn worktree_name(branch: &str) -> String {
    branch.replace('/', "-")
}
