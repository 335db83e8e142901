// Stage execution: dispatch one worker per unit, poll liveness, enforce timeouts

pub mod dispatch;
pub mod pool;

pub use dispatch::{
    CommitLivenessProbe, Dispatcher, ExitStatusClassifier, LivenessProbe, OutcomeClassifier,
    ProcessDispatcher, WorkerHandle,
};
pub use pool::WorkerPool;

use crate::config::SchedulerConfig;
use crate::models::{FailureReason, UnitOutcome, UnitStatus, WorkUnit, Workspace};
use crate::workspace::WorkspaceManager;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Instant;

/// A worker currently being supervised within a stage.
struct ActiveWorker {
    handle: WorkerHandle,
    workspace: Workspace,
    started: Instant,
    last_progress: Option<DateTime<Utc>>,
    polls_without_progress: u32,
}

/// Supervises the workers of one stage: allocates workspaces, dispatches,
/// polls for exits and liveness, and kills stalled or overdue workers.
///
/// Timeouts are independent per unit; killing one worker never cancels its
/// siblings, and `run_stage` returns only once every unit in the stage has
/// reached a terminal outcome.
pub struct WorkerSupervisor {
    config: SchedulerConfig,
}

impl WorkerSupervisor {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Execute all units of one stage to completion. The returned map holds
    /// exactly one terminal outcome per unit in `units`.
    pub async fn run_stage(
        &self,
        units: &mut [WorkUnit],
        workspaces: &mut WorkspaceManager,
        dispatcher: &mut dyn Dispatcher,
        probe: &dyn LivenessProbe,
        classifier: &dyn OutcomeClassifier,
    ) -> HashMap<String, UnitOutcome> {
        let mut outcomes: HashMap<String, UnitOutcome> = HashMap::new();
        let mut active: HashMap<String, ActiveWorker> = HashMap::new();

        // Allocate and dispatch. A unit whose workspace cannot be created is
        // failed immediately; no worker is started for it.
        for unit in units.iter_mut() {
            let branch = unit
                .branch
                .clone()
                .unwrap_or_else(|| self.config.branch_for(unit.batch_id, &unit.id));

            let workspace = match workspaces.allocate(&unit.id, &branch) {
                Ok(ws) => ws,
                Err(e) => {
                    log::error!(
                        "[Supervisor] Workspace allocation failed for unit {}: {}",
                        unit.id,
                        e
                    );
                    outcomes.insert(
                        unit.id.clone(),
                        UnitOutcome::Failed(FailureReason::WorkspaceAllocation(e.to_string())),
                    );
                    continue;
                }
            };

            unit.branch = Some(workspace.branch.clone());
            unit.worktree_path = Some(workspace.path.clone());

            match dispatcher.dispatch(unit, &workspace) {
                Ok(handle) => {
                    unit.status = UnitStatus::Running;
                    unit.started_at = Some(Utc::now());
                    let last_progress = probe.last_progress(&workspace);
                    active.insert(
                        unit.id.clone(),
                        ActiveWorker {
                            handle,
                            workspace,
                            started: Instant::now(),
                            last_progress,
                            polls_without_progress: 0,
                        },
                    );
                }
                Err(e) => {
                    log::error!("[Supervisor] Failed to dispatch unit {}: {}", unit.id, e);
                    outcomes.insert(
                        unit.id.clone(),
                        UnitOutcome::Failed(FailureReason::SpawnFailed(e.to_string())),
                    );
                }
            }
        }

        log::info!(
            "[Supervisor] Stage running with {} worker(s), {} unit(s) failed before dispatch",
            active.len(),
            outcomes.len()
        );

        // Poll until every worker is terminal.
        while !active.is_empty() {
            tokio::time::sleep(self.config.poll_interval()).await;

            let mut finished: Vec<(String, UnitOutcome)> = Vec::new();

            for (unit_id, worker) in active.iter_mut() {
                if let Some(code) = dispatcher.poll_exit(&worker.handle) {
                    let outcome = classifier.classify(&worker.workspace, code);
                    log::info!(
                        "[Supervisor] Unit {} exited with code {}: {:?}",
                        unit_id,
                        code,
                        outcome
                    );
                    finished.push((unit_id.clone(), outcome));
                    continue;
                }

                if self.config.unit_timeout_secs > 0
                    && worker.started.elapsed().as_secs() >= self.config.unit_timeout_secs
                {
                    log::warn!(
                        "[Supervisor] Unit {} exceeded {}s timeout, killing worker",
                        unit_id,
                        self.config.unit_timeout_secs
                    );
                    dispatcher.kill(&worker.handle);
                    finished.push((unit_id.clone(), UnitOutcome::Failed(FailureReason::Timeout)));
                    continue;
                }

                // Liveness: only a strictly newer signal counts as progress.
                let progress = probe.last_progress(&worker.workspace);
                let advanced = match (worker.last_progress, progress) {
                    (None, Some(_)) => true,
                    (Some(prev), Some(now)) => now > prev,
                    (_, None) => false,
                };

                if advanced {
                    worker.last_progress = progress;
                    worker.polls_without_progress = 0;
                } else {
                    worker.polls_without_progress += 1;
                    if worker.polls_without_progress >= self.config.stall_polls {
                        log::warn!(
                            "[Supervisor] Unit {} made no progress for {} poll(s), killing worker",
                            unit_id,
                            worker.polls_without_progress
                        );
                        dispatcher.kill(&worker.handle);
                        finished
                            .push((unit_id.clone(), UnitOutcome::Failed(FailureReason::Timeout)));
                    }
                }
            }

            for (unit_id, outcome) in finished {
                active.remove(&unit_id);
                outcomes.insert(unit_id, outcome);
            }
        }

        // Write terminal statuses back onto the units.
        for unit in units.iter_mut() {
            match outcomes.get(&unit.id) {
                Some(UnitOutcome::Completed) => {
                    unit.status = UnitStatus::Completed;
                    unit.completed_at = Some(Utc::now());
                    workspaces.mark_completed(&unit.id);
                }
                Some(UnitOutcome::Failed(reason)) => {
                    unit.status = UnitStatus::Failed;
                    unit.completed_at = Some(Utc::now());
                    unit.error = Some(reason.to_string());
                }
                None => {
                    // Every unit must have an outcome by now
                    log::error!("[Supervisor] Unit {} has no outcome", unit.id);
                }
            }
        }

        outcomes
    }
}
