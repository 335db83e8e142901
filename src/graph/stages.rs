// Topological layering of the dependency graph into parallel stages

use super::DependencyGraph;
use crate::models::Stage;

/// Partitions an acyclic dependency graph into ordered stages of mutually
/// independent units.
pub struct StageAssigner;

impl StageAssigner {
    pub fn new() -> Self {
        Self
    }

    /// Iterative topological layering: repeatedly collect every node whose
    /// remaining in-degree is zero, emit those as the next stage, remove
    /// them, and repeat until no nodes are left.
    ///
    /// Within a stage, units are ordered ascending by manifest position;
    /// that ordering becomes the merge order, it does not constrain
    /// execution order. An empty graph yields zero stages.
    pub fn assign(&self, graph: &DependencyGraph) -> Vec<Stage> {
        let mut degrees = graph.in_degrees();
        let mut remaining: Vec<String> = graph.nodes().to_vec();
        let mut stages = Vec::new();

        while !remaining.is_empty() {
            let mut ready: Vec<String> = remaining
                .iter()
                .filter(|id| degrees.get(*id).copied().unwrap_or(0) == 0)
                .cloned()
                .collect();

            // `build` guarantees acyclicity, so progress is always possible;
            // an empty ready set here would mean a broken invariant upstream.
            debug_assert!(!ready.is_empty(), "no ready nodes in a non-empty acyclic graph");
            if ready.is_empty() {
                log::error!(
                    "[StageAssigner] No schedulable nodes among {} remaining; aborting layering",
                    remaining.len()
                );
                break;
            }

            ready.sort_by_key(|id| graph.manifest_position(id).unwrap_or(usize::MAX));

            for id in &ready {
                for target in graph.targets_of(id) {
                    if let Some(count) = degrees.get_mut(target) {
                        *count = count.saturating_sub(1);
                    }
                }
            }

            remaining.retain(|id| !ready.contains(id));

            stages.push(Stage {
                index: stages.len(),
                unit_ids: ready,
            });
        }

        stages
    }
}

impl Default for StageAssigner {
    fn default() -> Self {
        Self::new()
    }
}
