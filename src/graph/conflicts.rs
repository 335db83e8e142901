// Inferred dependency edges from resource-footprint overlap

use crate::models::WorkUnit;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A dependency edge inferred from overlapping resource footprints rather
/// than declared by the plan author.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InferredEdge {
    /// Unit that must run first (earlier in manifest order)
    pub from: String,
    /// Unit that must wait
    pub to: String,
    /// The colliding paths that forced the ordering
    pub shared_paths: Vec<String>,
}

/// Detects implicit ordering constraints between units that declare
/// intersecting file footprints.
///
/// Two units touching the same file cannot safely run in parallel even if
/// the author forgot to declare the dependency; inference is a conservative
/// safety net, not a substitute for explicit declaration.
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Infer edges for every unordered pair of units with no explicit
    /// dependency between them and a non-empty footprint intersection.
    ///
    /// `units` must be in manifest order; the edge always points from the
    /// earlier unit to the later one, so identical input yields an
    /// identical edge set.
    pub fn infer_edges(&self, units: &[WorkUnit]) -> Vec<InferredEdge> {
        let mut edges = Vec::new();

        for i in 0..units.len() {
            for j in (i + 1)..units.len() {
                let earlier = &units[i];
                let later = &units[j];

                if has_explicit_dependency(earlier, later) {
                    continue;
                }

                let shared = shared_paths(earlier, later);
                if shared.is_empty() {
                    continue;
                }

                log::debug!(
                    "[ConflictDetector] Inferred edge {} -> {} over {} shared path(s)",
                    earlier.id,
                    later.id,
                    shared.len()
                );

                edges.push(InferredEdge {
                    from: earlier.id.clone(),
                    to: later.id.clone(),
                    shared_paths: shared,
                });
            }
        }

        edges
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether either unit declares the other as a dependency.
fn has_explicit_dependency(a: &WorkUnit, b: &WorkUnit) -> bool {
    a.depends_on.iter().any(|d| d == &b.id) || b.depends_on.iter().any(|d| d == &a.id)
}

/// Intersection of the two units' footprints, sorted for determinism.
fn shared_paths(a: &WorkUnit, b: &WorkUnit) -> Vec<String> {
    let a_files: HashSet<&String> = a.files.iter().collect();
    let mut shared: Vec<String> = b
        .files
        .iter()
        .filter(|f| a_files.contains(f))
        .cloned()
        .collect();
    shared.sort();
    shared.dedup();
    shared
}
