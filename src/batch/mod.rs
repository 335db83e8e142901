// Batch orchestration: the generate and execute phases

pub mod state;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::graph::{ConflictDetector, DependencyGraph, StageAssigner};
use crate::merge::MergeCoordinator;
use crate::models::{
    BatchState, BatchStatus, FailureReason, UnitOutcome, UnitStatus, WorkUnit,
};
use crate::parsers::{parse_manifest_file, validate_manifest};
use crate::supervisor::{
    CommitLivenessProbe, Dispatcher, ExitStatusClassifier, LivenessProbe, OutcomeClassifier,
    ProcessDispatcher, WorkerSupervisor,
};
use crate::workspace::WorkspaceManager;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-unit line of the final outcome report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReport {
    pub unit_id: String,
    pub status: UnitStatus,
    pub stage: Option<usize>,
    pub error: Option<String>,
}

/// Full per-unit outcome report for one batch run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: u32,
    pub status: BatchStatus,
    pub units: Vec<UnitReport>,
}

impl BatchReport {
    pub fn from_state(state: &BatchState) -> Self {
        Self {
            batch_id: state.batch_id,
            status: state.status,
            units: state
                .units
                .iter()
                .map(|u| UnitReport {
                    unit_id: u.id.clone(),
                    status: u.status,
                    stage: u.stage,
                    error: u.error.clone(),
                })
                .collect(),
        }
    }

    /// True when every unit reached `merged`.
    pub fn all_merged(&self) -> bool {
        self.units.iter().all(|u| u.status == UnitStatus::Merged)
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Batch {} ({:?})", self.batch_id, self.status)?;
        for unit in &self.units {
            let stage = unit
                .stage
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            match &unit.error {
                Some(err) => writeln!(
                    f,
                    "  [stage {}] {} {:?}: {}",
                    stage, unit.unit_id, unit.status, err
                )?,
                None => writeln!(f, "  [stage {}] {} {:?}", stage, unit.unit_id, unit.status)?,
            }
        }
        Ok(())
    }
}

/// Drives a batch through its two phases.
///
/// `generate` is pure planning: parse the manifest, build the dependency
/// graph, partition into stages. It has no side effects beyond the returned
/// state, so a cycle or dangling reference aborts before anything touches
/// the repository. `execute` then runs stages strictly sequentially,
/// merging after each stage before the next one starts.
pub struct BatchOrchestrator {
    repo_path: PathBuf,
    config: SchedulerConfig,
}

impl BatchOrchestrator {
    pub fn new(repo_path: impl AsRef<Path>, config: SchedulerConfig) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            config,
        }
    }

    /// Generate phase: manifest in, staged batch plan out.
    pub fn generate(&self, manifest_path: &Path, batch_id: u32) -> Result<BatchState> {
        let doc = parse_manifest_file(manifest_path)
            .map_err(|e| SchedulerError::ManifestParse(e.to_string()))?;
        validate_manifest(&doc)?;

        let mut units: Vec<WorkUnit> = Vec::with_capacity(doc.phases.len());
        for (index, phase) in doc.phases.iter().enumerate() {
            let mut unit = WorkUnit::new(
                phase.resolved_id(),
                batch_id,
                phase.title.clone(),
                index,
            );
            unit.description = phase.description.clone();
            unit.depends_on = phase.depends_on.clone();
            unit.files = phase.files.clone();
            if let Some(risk) = &phase.conflict_risk {
                unit.conflict_risk = risk.parse().unwrap_or_default();
            }
            if let Some(effort) = &phase.effort {
                unit.effort = effort.parse().ok();
            }
            units.push(unit);
        }

        let inferred = ConflictDetector::new().infer_edges(&units);
        let graph = DependencyGraph::build(&units, &inferred)?;
        let stages = StageAssigner::new().assign(&graph);

        for stage in &stages {
            for (order, unit_id) in stage.unit_ids.iter().enumerate() {
                if let Some(unit) = units.iter_mut().find(|u| &u.id == unit_id) {
                    unit.stage = Some(stage.index);
                    unit.merge_order = Some(order);
                    unit.status = UnitStatus::Staged;
                    unit.branch = Some(self.config.branch_for(batch_id, unit_id));
                    unit.worktree_path = Some(
                        self.repo_path
                            .join(&self.config.worktree_base)
                            .join(unit_id)
                            .to_string_lossy()
                            .into_owned(),
                    );
                }
            }
        }

        log::info!(
            "[Orchestrator] Batch {} planned: {} unit(s) in {} stage(s), {} inferred edge(s)",
            batch_id,
            units.len(),
            stages.len(),
            inferred.len()
        );

        Ok(BatchState {
            batch_id,
            title: doc.title,
            status: BatchStatus::Planned,
            created_at: Utc::now(),
            units,
            stages,
            merge_records: Vec::new(),
        })
    }

    /// Execute phase with the production dispatch stack.
    pub async fn execute(&self, state: &mut BatchState) -> Result<BatchReport> {
        let mut dispatcher = ProcessDispatcher::new(self.config.worker_command.clone());
        let probe = CommitLivenessProbe::new(self.config.progress_marker.clone());
        self.execute_with(state, &mut dispatcher, &probe, &ExitStatusClassifier)
            .await
    }

    /// Execute phase with injected dispatch, liveness, and classification.
    pub async fn execute_with(
        &self,
        state: &mut BatchState,
        dispatcher: &mut dyn Dispatcher,
        probe: &dyn LivenessProbe,
        classifier: &dyn OutcomeClassifier,
    ) -> Result<BatchReport> {
        state.status = BatchStatus::Executing;

        let worktree_base = self.repo_path.join(&self.config.worktree_base);
        let mut workspaces = WorkspaceManager::new(&self.repo_path, worktree_base);
        let mut coordinator = MergeCoordinator::new(&self.repo_path);
        let supervisor = WorkerSupervisor::new(self.config.clone());

        let stages = state.stages.clone();
        for stage in &stages {
            log::info!(
                "[Orchestrator] Batch {} stage {}: {} unit(s)",
                state.batch_id,
                stage.index,
                stage.unit_ids.len()
            );

            let mut runnable: Vec<WorkUnit> = Vec::new();
            let mut held_back: Vec<WorkUnit> = Vec::new();
            let mut aborted: Vec<WorkUnit> = Vec::new();
            let mut outcomes: HashMap<String, UnitOutcome> = HashMap::new();

            // Screen before dispatching: a unit whose dependency never
            // reached trunk cannot produce mergeable work.
            for unit_id in &stage.unit_ids {
                let Some(mut unit) = state.unit(unit_id).cloned() else {
                    continue;
                };

                let blocked = coordinator.blocking_dependencies(&unit);
                if blocked.is_empty() {
                    runnable.push(unit);
                    continue;
                }

                let failed_dep = blocked.iter().find(|dep| {
                    state
                        .unit(dep)
                        .map(|u| u.status == UnitStatus::Failed)
                        .unwrap_or(false)
                });
                match failed_dep {
                    Some(dep) => {
                        let reason = FailureReason::DependencyFailed(dep.clone());
                        unit.status = UnitStatus::Failed;
                        unit.error = Some(reason.to_string());
                        outcomes.insert(unit.id.clone(), UnitOutcome::Failed(reason));
                        held_back.push(unit);
                    }
                    None => {
                        // Conflicted or aborted upstream: abort outright
                        let record = coordinator.abort_unit(&mut unit, blocked);
                        state.merge_records.push(record);
                        aborted.push(unit);
                    }
                }
            }

            outcomes.extend(
                supervisor
                    .run_stage(&mut runnable, &mut workspaces, dispatcher, probe, classifier)
                    .await,
            );

            // Merge in declared order; held-back units get their skip record
            let mut merge_units = runnable;
            merge_units.append(&mut held_back);
            let records = coordinator.merge_stage(&mut merge_units, &outcomes)?;
            state.merge_records.extend(records);

            // Workspaces are done once the merge outcome is final
            for unit in &merge_units {
                if let Err(e) = workspaces.reclaim(&unit.id) {
                    log::warn!(
                        "[Orchestrator] Failed to reclaim workspace for {}: {}",
                        unit.id,
                        e
                    );
                }
            }

            let none_succeeded = !stage.unit_ids.is_empty()
                && !outcomes.values().any(|o| o.is_completed());

            for unit in merge_units.into_iter().chain(aborted) {
                if let Some(slot) = state.unit_mut(&unit.id) {
                    *slot = unit;
                }
            }

            if none_succeeded {
                log::error!(
                    "[Orchestrator] Every unit in stage {} failed; halting batch {}",
                    stage.index,
                    state.batch_id
                );
                state.status = BatchStatus::Failed;
                return Err(SchedulerError::AllUnitsFailed {
                    batch_id: state.batch_id,
                    stage: stage.index,
                });
            }
        }

        state.status = if state.units.iter().all(|u| u.status == UnitStatus::Merged) {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        };

        Ok(BatchReport::from_state(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Workspace;
    use crate::supervisor::WorkerHandle;
    use anyhow::Result as AnyResult;
    use chrono::{DateTime, Utc};
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test").unwrap();

        fs::write(dir.path().join("README.md"), "# test\n").unwrap();
        let git = crate::git::GitManager::new(dir.path()).unwrap();
        git.commit_all("initial commit").unwrap();
        drop(git);
        let _ = repo;
        dir
    }

    fn write_manifest(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("plan.yaml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_secs: 0,
            unit_timeout_secs: 0,
            ..SchedulerConfig::default()
        }
    }

    /// Dispatcher whose workers "exit" immediately with scripted codes.
    struct ScriptedDispatcher {
        exit_codes: HashMap<String, i32>,
        dispatched: Vec<String>,
    }

    impl ScriptedDispatcher {
        fn new(codes: &[(&str, i32)]) -> Self {
            Self {
                exit_codes: codes.iter().map(|(id, c)| (id.to_string(), *c)).collect(),
                dispatched: Vec::new(),
            }
        }

        fn all_zero(ids: &[&str]) -> Self {
            Self::new(&ids.iter().map(|id| (*id, 0)).collect::<Vec<_>>())
        }
    }

    impl Dispatcher for ScriptedDispatcher {
        fn dispatch(&mut self, unit: &WorkUnit, _workspace: &Workspace) -> AnyResult<WorkerHandle> {
            self.dispatched.push(unit.id.clone());
            Ok(WorkerHandle {
                worker_id: unit.id.clone(),
                unit_id: unit.id.clone(),
                pid: None,
            })
        }

        fn kill(&mut self, _handle: &WorkerHandle) {}

        fn poll_exit(&mut self, handle: &WorkerHandle) -> Option<i32> {
            Some(*self.exit_codes.get(&handle.unit_id).unwrap_or(&0))
        }
    }

    struct AlwaysAlive;

    impl LivenessProbe for AlwaysAlive {
        fn last_progress(&self, _workspace: &Workspace) -> Option<DateTime<Utc>> {
            Some(Utc::now())
        }
    }

    const DIAMOND_MANIFEST: &str = "\
title: Sample plan
phases:
  - title: Alpha
  - title: Beta
    depends_on: [alpha]
  - title: Gamma
    depends_on: [alpha]
";

    #[test]
    fn test_generate_assigns_stages_and_merge_order() {
        let dir = init_repo();
        let manifest = write_manifest(&dir, DIAMOND_MANIFEST);

        let orchestrator = BatchOrchestrator::new(dir.path(), fast_config());
        let state = orchestrator.generate(&manifest, 7).unwrap();

        assert_eq!(state.batch_id, 7);
        assert_eq!(state.title, "Sample plan");
        assert_eq!(state.status, BatchStatus::Planned);
        assert_eq!(state.stages.len(), 2);
        assert_eq!(state.stages[0].unit_ids, vec!["alpha"]);
        assert_eq!(state.stages[1].unit_ids, vec!["beta", "gamma"]);

        let alpha = state.unit("alpha").unwrap();
        assert_eq!(alpha.stage, Some(0));
        assert_eq!(alpha.merge_order, Some(0));
        assert_eq!(alpha.status, UnitStatus::Staged);
        assert_eq!(alpha.branch.as_deref(), Some("stagehand/7/alpha"));

        let gamma = state.unit("gamma").unwrap();
        assert_eq!(gamma.stage, Some(1));
        assert_eq!(gamma.merge_order, Some(1));
    }

    #[test]
    fn test_generate_inferred_conflict_separates_stages() {
        let dir = init_repo();
        let manifest = write_manifest(
            &dir,
            "title: Overlap\nphases:\n  - title: X\n    files: [src/f1.rs]\n  - title: Y\n    files: [src/f1.rs]\n",
        );

        let orchestrator = BatchOrchestrator::new(dir.path(), fast_config());
        let state = orchestrator.generate(&manifest, 1).unwrap();

        assert_eq!(state.stages.len(), 2);
        assert_eq!(state.stages[0].unit_ids, vec!["x"]);
        assert_eq!(state.stages[1].unit_ids, vec!["y"]);
    }

    #[test]
    fn test_generate_rejects_cycle_before_side_effects() {
        let dir = init_repo();
        let manifest = write_manifest(
            &dir,
            "title: Cyclic\nphases:\n  - title: A\n    depends_on: [b]\n  - title: B\n    depends_on: [a]\n",
        );

        let orchestrator = BatchOrchestrator::new(dir.path(), fast_config());
        let err = orchestrator.generate(&manifest, 1).unwrap_err();
        assert!(matches!(err, SchedulerError::Cycle { .. }));
        assert!(err.is_fatal_pre_scheduling());
        // Planning never touches the repository
        assert!(!dir.path().join("worktrees").exists());
    }

    #[tokio::test]
    async fn test_execute_merges_all_units() {
        let dir = init_repo();
        let manifest = write_manifest(&dir, DIAMOND_MANIFEST);

        let orchestrator = BatchOrchestrator::new(dir.path(), fast_config());
        let mut state = orchestrator.generate(&manifest, 1).unwrap();

        let mut dispatcher = ScriptedDispatcher::all_zero(&["alpha", "beta", "gamma"]);
        let report = orchestrator
            .execute_with(&mut state, &mut dispatcher, &AlwaysAlive, &ExitStatusClassifier)
            .await
            .unwrap();

        assert!(report.all_merged());
        assert_eq!(state.status, BatchStatus::Completed);
        assert_eq!(state.merge_records.len(), 3);
        // Stage 0 merged before stage 1 was dispatched
        assert_eq!(dispatcher.dispatched[0], "alpha");
        // Workspaces were reclaimed
        assert!(!dir.path().join("worktrees").join("alpha").exists());
    }

    #[tokio::test]
    async fn test_execute_failed_dependency_not_dispatched() {
        let dir = init_repo();
        let manifest = write_manifest(
            &dir,
            "title: Partial\nphases:\n  - title: A\n  - title: C\n  - title: B\n    depends_on: [a]\n  - title: D\n    depends_on: [c]\n",
        );

        let orchestrator = BatchOrchestrator::new(dir.path(), fast_config());
        let mut state = orchestrator.generate(&manifest, 1).unwrap();

        // A fails; C and its dependent D succeed
        let mut dispatcher = ScriptedDispatcher::new(&[("a", 1), ("c", 0), ("d", 0)]);
        let report = orchestrator
            .execute_with(&mut state, &mut dispatcher, &AlwaysAlive, &ExitStatusClassifier)
            .await
            .unwrap();

        assert_eq!(state.status, BatchStatus::Failed);
        assert!(!report.all_merged());

        // B was never dispatched
        assert!(!dispatcher.dispatched.contains(&"b".to_string()));
        let b = state.unit("b").unwrap();
        assert_eq!(b.status, UnitStatus::Failed);
        assert!(b.error.as_deref().unwrap().contains("dependency 'a'"));

        assert_eq!(state.unit("a").unwrap().status, UnitStatus::Failed);
        assert_eq!(state.unit("c").unwrap().status, UnitStatus::Merged);
        assert_eq!(state.unit("d").unwrap().status, UnitStatus::Merged);
    }

    #[tokio::test]
    async fn test_execute_halts_when_whole_stage_fails() {
        let dir = init_repo();
        let manifest = write_manifest(
            &dir,
            "title: Doomed\nphases:\n  - title: A\n  - title: B\n    depends_on: [a]\n",
        );

        let orchestrator = BatchOrchestrator::new(dir.path(), fast_config());
        let mut state = orchestrator.generate(&manifest, 1).unwrap();

        let mut dispatcher = ScriptedDispatcher::new(&[("a", 2)]);
        let err = orchestrator
            .execute_with(&mut state, &mut dispatcher, &AlwaysAlive, &ExitStatusClassifier)
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::AllUnitsFailed { stage: 0, .. }));
        assert_eq!(state.status, BatchStatus::Failed);
        // Stage 1 never started
        assert!(!dispatcher.dispatched.contains(&"b".to_string()));
        assert_eq!(state.unit("b").unwrap().status, UnitStatus::Staged);
    }
}
