// Dependency graph construction and cycle detection

pub mod conflicts;
pub mod stages;

pub use conflicts::{ConflictDetector, InferredEdge};
pub use stages::StageAssigner;

use crate::error::SchedulerError;
use crate::models::WorkUnit;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Declared via `depends_on` in the manifest
    Explicit,
    /// Derived from resource-footprint overlap
    Inferred,
}

/// A directed edge: `from` must finish before `to` starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// In-memory dependency graph over work-unit ids.
///
/// Nodes are kept in manifest order; construction fails with the full cycle
/// path when the combined explicit + inferred edge set is not acyclic. An
/// edge is never silently dropped.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    edges: Vec<Edge>,
    /// from -> targets, in insertion order
    adjacency: HashMap<String, Vec<String>>,
    /// node -> position in `nodes` (manifest order)
    node_index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Build the graph from units (explicit edges come from each unit's
    /// `depends_on`) plus the inferred edges from conflict detection.
    pub fn build(units: &[WorkUnit], inferred: &[InferredEdge]) -> Result<Self, SchedulerError> {
        let nodes: Vec<String> = units.iter().map(|u| u.id.clone()).collect();
        let node_index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut edges = Vec::new();

        for unit in units {
            for dep in &unit.depends_on {
                edges.push(Edge {
                    from: dep.clone(),
                    to: unit.id.clone(),
                    kind: EdgeKind::Explicit,
                });
            }
        }

        for edge in inferred {
            edges.push(Edge {
                from: edge.from.clone(),
                to: edge.to.clone(),
                kind: EdgeKind::Inferred,
            });
        }

        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &edges {
            adjacency
                .entry(edge.from.clone())
                .or_default()
                .push(edge.to.clone());
        }

        let graph = Self {
            nodes,
            edges,
            adjacency,
            node_index,
        };

        if let Some(path) = graph.find_cycle() {
            return Err(SchedulerError::Cycle { path });
        }

        Ok(graph)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Manifest-order position of a node.
    pub fn manifest_position(&self, id: &str) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    /// Successors of a node, if any.
    pub fn targets_of(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Number of incoming edges per node.
    pub fn in_degrees(&self) -> HashMap<String, usize> {
        let mut degrees: HashMap<String, usize> =
            self.nodes.iter().map(|n| (n.clone(), 0)).collect();
        for edge in &self.edges {
            if let Some(count) = degrees.get_mut(&edge.to) {
                *count += 1;
            }
        }
        degrees
    }

    /// Depth-first search for a back-edge. Returns the complete cycle as an
    /// ordered path from the repeated node back to itself.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, VisitState> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), VisitState::Unvisited))
            .collect();

        // Nodes visited in manifest order so the reported cycle is stable
        for start in &self.nodes {
            if marks[start.as_str()] != VisitState::Unvisited {
                continue;
            }

            let mut path: Vec<&str> = Vec::new();
            if let Some(cycle) = self.dfs(start, &mut marks, &mut path) {
                return Some(cycle);
            }
        }

        None
    }

    fn dfs<'a>(
        &'a self,
        node: &'a str,
        marks: &mut HashMap<&'a str, VisitState>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, VisitState::OnStack);
        path.push(node);

        for target in self.targets_of(node) {
            match marks
                .get(target.as_str())
                .copied()
                .unwrap_or(VisitState::Done)
            {
                VisitState::OnStack => {
                    // Back-edge: slice the recursion stack from the repeated
                    // node and close the loop.
                    let start = path.iter().position(|n| *n == target.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(target.clone());
                    return Some(cycle);
                }
                VisitState::Unvisited => {
                    if let Some(cycle) = self.dfs(target, marks, path) {
                        return Some(cycle);
                    }
                }
                VisitState::Done => {}
            }
        }

        path.pop();
        marks.insert(node, VisitState::Done);
        None
    }
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    Unvisited,
    OnStack,
    Done,
}
