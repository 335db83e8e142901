// Sequential trunk integration in declared merge order

use crate::git::{BranchMergeResult, GitManager};
use crate::models::{MergeOutcome, MergeRecord, UnitOutcome, UnitStatus, WorkUnit};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Merges completed workspaces back into trunk, one stage at a time.
///
/// Merge order is the fixed `merge_order` declared at generation, never
/// wall-clock completion order. A conflicting unit blocks only itself and
/// its dependents; independent units in the same pass still merge. The
/// blocked set is carried across stages so a dependent of a conflicted unit
/// is aborted without ever being attempted.
pub struct MergeCoordinator {
    repo_path: PathBuf,
    /// Units whose work never reached trunk: conflicted, aborted, failed.
    blocked: HashSet<String>,
}

impl MergeCoordinator {
    pub fn new(repo_path: impl AsRef<Path>) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            blocked: HashSet::new(),
        }
    }

    /// Merge the units of one stage. Produces exactly one record per unit,
    /// in ascending `merge_order`.
    pub fn merge_stage(
        &mut self,
        units: &mut [WorkUnit],
        outcomes: &HashMap<String, UnitOutcome>,
    ) -> Result<Vec<MergeRecord>, git2::Error> {
        let git = GitManager::new(&self.repo_path)?;

        let mut order: Vec<usize> = (0..units.len()).collect();
        order.sort_by_key(|&i| units[i].merge_order.unwrap_or(usize::MAX));

        let mut records = Vec::with_capacity(units.len());

        for i in order {
            let unit = &mut units[i];

            if !matches!(outcomes.get(&unit.id), Some(UnitOutcome::Completed)) {
                // Never completed; there is nothing to integrate
                self.blocked.insert(unit.id.clone());
                records.push(MergeRecord::new(unit.id.clone(), MergeOutcome::Skipped));
                continue;
            }

            // A unit built on work that never landed cannot merge cleanly;
            // abort it without attempting.
            let blocked_deps: Vec<String> = unit
                .depends_on
                .iter()
                .filter(|dep| self.blocked.contains(*dep))
                .cloned()
                .collect();
            if !blocked_deps.is_empty() {
                log::warn!(
                    "[MergeCoordinator] Aborting {}: depends on unmerged {:?}",
                    unit.id,
                    blocked_deps
                );
                unit.status = UnitStatus::Aborted;
                unit.error = Some(format!("aborted: depends on unmerged {}", blocked_deps.join(", ")));
                self.blocked.insert(unit.id.clone());
                records.push(MergeRecord::new(
                    unit.id.clone(),
                    MergeOutcome::Aborted(blocked_deps),
                ));
                continue;
            }

            let Some(branch) = unit.branch.clone() else {
                log::error!("[MergeCoordinator] Unit {} completed without a branch", unit.id);
                self.blocked.insert(unit.id.clone());
                records.push(MergeRecord::new(unit.id.clone(), MergeOutcome::Skipped));
                continue;
            };

            let message = format!("Merge unit {} (batch {})", unit.id, unit.batch_id);
            match git.merge_branch(&branch, &message) {
                Ok(BranchMergeResult::Merged(commit)) => {
                    log::info!("[MergeCoordinator] Merged {} as {}", unit.id, commit);
                    unit.status = UnitStatus::Merged;
                    records.push(MergeRecord::new(unit.id.clone(), MergeOutcome::Merged(commit)));
                }
                Ok(BranchMergeResult::AlreadyMerged) => {
                    // Branch tip is already reachable from trunk
                    let commit = git.branch_tip(&branch)?;
                    unit.status = UnitStatus::Merged;
                    records.push(MergeRecord::new(unit.id.clone(), MergeOutcome::Merged(commit)));
                }
                Ok(BranchMergeResult::Conflict(paths)) => {
                    log::warn!(
                        "[MergeCoordinator] Conflict merging {}: {:?}",
                        unit.id,
                        paths
                    );
                    unit.status = UnitStatus::Conflicted;
                    unit.error = Some(format!("merge conflict in {}", paths.join(", ")));
                    self.blocked.insert(unit.id.clone());
                    records.push(MergeRecord::new(unit.id.clone(), MergeOutcome::Conflict(paths)));
                }
                Err(e) => {
                    // Unit-scoped: an unexpected git failure blocks this unit
                    // but not the rest of the pass
                    log::error!("[MergeCoordinator] Failed to merge {}: {}", unit.id, e);
                    unit.status = UnitStatus::Failed;
                    unit.error = Some(format!("merge failed: {}", e));
                    self.blocked.insert(unit.id.clone());
                    records.push(MergeRecord::new(unit.id.clone(), MergeOutcome::Skipped));
                }
            }
        }

        Ok(records)
    }

    /// Dependencies of `unit` whose work never reached trunk. Non-empty
    /// means the unit should be aborted rather than dispatched.
    pub fn blocking_dependencies(&self, unit: &WorkUnit) -> Vec<String> {
        unit.depends_on
            .iter()
            .filter(|dep| self.blocked.contains(*dep))
            .cloned()
            .collect()
    }

    /// Record a unit as aborted before dispatch, propagating the block to
    /// its own dependents.
    pub fn abort_unit(&mut self, unit: &mut WorkUnit, blocked_on: Vec<String>) -> MergeRecord {
        unit.status = UnitStatus::Aborted;
        unit.error = Some(format!("aborted: depends on unmerged {}", blocked_on.join(", ")));
        self.blocked.insert(unit.id.clone());
        MergeRecord::new(unit.id.clone(), MergeOutcome::Aborted(blocked_on))
    }

    pub fn is_blocked(&self, unit_id: &str) -> bool {
        self.blocked.contains(unit_id)
    }
}
