// Dispatch boundary: how workers are started, observed, and classified

use crate::git::GitManager;
use crate::models::{FailureReason, UnitOutcome, WorkUnit, Workspace};
use crate::supervisor::pool::WorkerPool;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Command;
use uuid::Uuid;

/// Opaque handle to a dispatched worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub worker_id: String,
    pub unit_id: String,
    pub pid: Option<u32>,
}

/// Starts an external worker for a unit inside its workspace. The
/// supervisor does not know what the worker does internally, only that it
/// eventually terminates and leaves progress signals in the workspace.
pub trait Dispatcher: Send {
    fn dispatch(&mut self, unit: &WorkUnit, workspace: &Workspace) -> Result<WorkerHandle>;

    /// Kill the worker behind a handle. Must tolerate already-exited workers.
    fn kill(&mut self, handle: &WorkerHandle);

    /// Exit code of the worker, once it has terminated.
    fn poll_exit(&mut self, handle: &WorkerHandle) -> Option<i32>;
}

/// Liveness proxy: the latest timestamp at which a worker observably made
/// progress inside its workspace. Older signals are superseded, not retained.
pub trait LivenessProbe: Send {
    fn last_progress(&self, workspace: &Workspace) -> Option<DateTime<Utc>>;
}

/// Classifies the final state a worker left its workspace in.
pub trait OutcomeClassifier: Send {
    fn classify(&self, workspace: &Workspace, exit_code: i32) -> UnitOutcome;
}

/// Dispatches workers as child processes of the scheduler.
pub struct ProcessDispatcher {
    worker_command: Vec<String>,
    pool: WorkerPool,
}

impl ProcessDispatcher {
    pub fn new(worker_command: Vec<String>) -> Self {
        Self {
            worker_command,
            pool: WorkerPool::new(),
        }
    }
}

impl Dispatcher for ProcessDispatcher {
    fn dispatch(&mut self, unit: &WorkUnit, workspace: &Workspace) -> Result<WorkerHandle> {
        let program = self
            .worker_command
            .first()
            .ok_or_else(|| anyhow!("Worker command is empty"))?;

        let resolved = which::which(program)
            .map_err(|_| anyhow!("Worker command '{}' not found in PATH", program))?;

        let mut command = Command::new(resolved);
        command
            .args(&self.worker_command[1..])
            .arg(&unit.id)
            .current_dir(&workspace.path)
            .env("STAGEHAND_UNIT_ID", &unit.id)
            .env("STAGEHAND_BATCH_ID", unit.batch_id.to_string())
            .env("STAGEHAND_BRANCH", &workspace.branch);

        let worker_id = format!("{}-{}", unit.id, Uuid::new_v4());
        let pid = self.pool.spawn(&worker_id, command)?;

        log::info!(
            "[Dispatcher] Dispatched worker for unit {} in {} (PID {})",
            unit.id,
            workspace.path,
            pid
        );

        Ok(WorkerHandle {
            worker_id,
            unit_id: unit.id.clone(),
            pid: Some(pid),
        })
    }

    fn kill(&mut self, handle: &WorkerHandle) {
        self.pool.kill(&handle.worker_id);
    }

    fn poll_exit(&mut self, handle: &WorkerHandle) -> Option<i32> {
        self.pool.poll_exit(&handle.worker_id)
    }
}

/// Production liveness proxy: the newer of the last commit on the unit's
/// branch and the modification time of the progress marker file. Workers
/// that commit as they go and workers that only touch the marker both
/// register as alive.
pub struct CommitLivenessProbe {
    progress_marker: String,
}

impl CommitLivenessProbe {
    pub fn new(progress_marker: impl Into<String>) -> Self {
        Self {
            progress_marker: progress_marker.into(),
        }
    }

    fn marker_mtime(&self, workspace: &Workspace) -> Option<DateTime<Utc>> {
        let marker = Path::new(&workspace.path).join(&self.progress_marker);
        let modified = std::fs::metadata(marker).ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    fn branch_tip_time(&self, workspace: &Workspace) -> Option<DateTime<Utc>> {
        let git = GitManager::new(&workspace.path).ok()?;
        git.last_commit_time(&workspace.branch).ok()
    }
}

impl LivenessProbe for CommitLivenessProbe {
    fn last_progress(&self, workspace: &Workspace) -> Option<DateTime<Utc>> {
        match (self.branch_tip_time(workspace), self.marker_mtime(workspace)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Default classifier: a zero exit code means the workspace holds completed
/// work, anything else is a failure.
pub struct ExitStatusClassifier;

impl OutcomeClassifier for ExitStatusClassifier {
    fn classify(&self, _workspace: &Workspace, exit_code: i32) -> UnitOutcome {
        if exit_code == 0 {
            UnitOutcome::Completed
        } else {
            UnitOutcome::Failed(FailureReason::WorkerFailed(exit_code))
        }
    }
}
