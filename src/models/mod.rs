// Data model for batches, work units, workspaces and merge records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Staged,
    Running,
    Completed,
    Failed,
    Merged,
    Conflicted,
    Aborted,
}

impl UnitStatus {
    /// Whether the unit has reached an execution-terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UnitStatus::Pending | UnitStatus::Staged | UnitStatus::Running)
    }
}

/// Informational conflict-risk hint declared in the manifest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictRisk {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl ConflictRisk {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictRisk::None => "none",
            ConflictRisk::Low => "low",
            ConflictRisk::Medium => "medium",
            ConflictRisk::High => "high",
        }
    }
}

impl std::fmt::Display for ConflictRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConflictRisk {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ConflictRisk::None),
            "low" => Ok(ConflictRisk::Low),
            "medium" => Ok(ConflictRisk::Medium),
            "high" => Ok(ConflictRisk::High),
            _ => Err(format!(
                "Invalid conflict risk: '{}'. Expected 'none', 'low', 'medium', or 'high'",
                s
            )),
        }
    }
}

/// Effort size estimation, used only for reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EffortSize {
    Small,
    Medium,
    Large,
}

impl EffortSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffortSize::Small => "small",
            EffortSize::Medium => "medium",
            EffortSize::Large => "large",
        }
    }
}

impl std::fmt::Display for EffortSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EffortSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" | "s" => Ok(EffortSize::Small),
            "medium" | "m" => Ok(EffortSize::Medium),
            "large" | "l" => Ok(EffortSize::Large),
            _ => Err(format!(
                "Invalid effort size: '{}'. Expected 'small', 'medium', or 'large'",
                s
            )),
        }
    }
}

/// One schedulable item of planned work.
///
/// Created when the manifest is parsed, mutated by the supervisor (status
/// transitions) and the merge coordinator (terminal status). Units are
/// archived in the batch state, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkUnit {
    /// Stable identity; what `depends_on` entries reference.
    pub id: String,
    pub batch_id: u32,
    pub title: String,
    pub description: String,
    pub status: UnitStatus,
    /// Declared dependency unit ids.
    pub depends_on: Vec<String>,
    /// Declared resource footprint (paths this unit will touch).
    pub files: Vec<String>,
    pub conflict_risk: ConflictRisk,
    pub effort: Option<EffortSize>,
    /// Position in the original manifest; the deterministic tie-breaker.
    pub manifest_index: usize,
    /// Stage index assigned by the stage assigner.
    pub stage: Option<usize>,
    /// Fixed merge position within the stage, distinct from completion order.
    pub merge_order: Option<usize>,
    pub branch: Option<String>,
    pub worktree_path: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl WorkUnit {
    pub fn new(id: String, batch_id: u32, title: String, manifest_index: usize) -> Self {
        Self {
            id,
            batch_id,
            title,
            description: String::new(),
            status: UnitStatus::Pending,
            depends_on: Vec::new(),
            files: Vec::new(),
            conflict_risk: ConflictRisk::None,
            effort: None,
            manifest_index,
            stage: None,
            merge_order: None,
            branch: None,
            worktree_path: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// A set of units with no dependency edges among them, safe to run
/// concurrently. Unit ids are kept in merge order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub index: usize,
    pub unit_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Allocated,
    Active,
    Completed,
    Reclaimed,
}

/// An isolated execution environment (worktree directory + branch) owned
/// exclusively by one work unit for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub unit_id: String,
    pub path: String,
    pub branch: String,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
}

/// Why a unit ended in `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Wall-clock timeout elapsed, or no liveness progress across
    /// consecutive polls.
    Timeout,
    /// Workspace could not be created; no worker was dispatched.
    WorkspaceAllocation(String),
    /// Worker process could not be started.
    SpawnFailed(String),
    /// Worker exited but the workspace was classified as a failure.
    WorkerFailed(i32),
    /// A dependency never reached `merged`, so this unit was not dispatched.
    DependencyFailed(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::WorkspaceAllocation(e) => write!(f, "workspace allocation: {}", e),
            FailureReason::SpawnFailed(e) => write!(f, "spawn failed: {}", e),
            FailureReason::WorkerFailed(code) => write!(f, "worker failed (exit code {})", code),
            FailureReason::DependencyFailed(dep) => write!(f, "dependency '{}' failed", dep),
        }
    }
}

/// Terminal outcome of one unit's execution within a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    Completed,
    Failed(FailureReason),
}

impl UnitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, UnitOutcome::Completed)
    }
}

/// Result of integrating one workspace into trunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Branch integrated; carries the merge commit id.
    Merged(String),
    /// Path collision during integration; the unit's merge was abandoned.
    Conflict(Vec<String>),
    /// Not attempted because a predecessor this unit depends on failed to merge.
    Aborted(Vec<String>),
    /// Not attempted because the unit never completed execution.
    Skipped,
}

/// Immutable record of one unit's merge attempt. Created once per unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRecord {
    pub unit_id: String,
    pub outcome: MergeOutcome,
    pub recorded_at: DateTime<Utc>,
}

impl MergeRecord {
    pub fn new(unit_id: String, outcome: MergeOutcome) -> Self {
        Self {
            unit_id,
            outcome,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Planned,
    Executing,
    Completed,
    Failed,
}

/// All state for one batch, passed explicitly through the pipeline and
/// persisted by the caller between the generate and execute phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchState {
    pub batch_id: u32,
    pub title: String,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub units: Vec<WorkUnit>,
    pub stages: Vec<Stage>,
    pub merge_records: Vec<MergeRecord>,
}

impl BatchState {
    pub fn unit(&self, id: &str) -> Option<&WorkUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    pub fn unit_mut(&mut self, id: &str) -> Option<&mut WorkUnit> {
        self.units.iter_mut().find(|u| u.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_status_terminal() {
        assert!(!UnitStatus::Pending.is_terminal());
        assert!(!UnitStatus::Staged.is_terminal());
        assert!(!UnitStatus::Running.is_terminal());
        assert!(UnitStatus::Completed.is_terminal());
        assert!(UnitStatus::Failed.is_terminal());
        assert!(UnitStatus::Merged.is_terminal());
        assert!(UnitStatus::Conflicted.is_terminal());
        assert!(UnitStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_conflict_risk_round_trip() {
        for risk in ["none", "low", "medium", "high"] {
            let parsed: ConflictRisk = risk.parse().unwrap();
            assert_eq!(parsed.as_str(), risk);
        }
        assert!("extreme".parse::<ConflictRisk>().is_err());
    }

    #[test]
    fn test_effort_size_short_forms() {
        assert_eq!("s".parse::<EffortSize>().unwrap(), EffortSize::Small);
        assert_eq!("M".parse::<EffortSize>().unwrap(), EffortSize::Medium);
        assert_eq!("l".parse::<EffortSize>().unwrap(), EffortSize::Large);
    }

    #[test]
    fn test_work_unit_new_defaults() {
        let unit = WorkUnit::new("api".to_string(), 7, "Build API".to_string(), 0);
        assert_eq!(unit.status, UnitStatus::Pending);
        assert_eq!(unit.batch_id, 7);
        assert!(unit.depends_on.is_empty());
        assert!(unit.stage.is_none());
        assert!(unit.merge_order.is_none());
    }

    #[test]
    fn test_work_unit_serialization() {
        let unit = WorkUnit::new("api".to_string(), 1, "Build API".to_string(), 2);
        let json = serde_json::to_string(&unit).unwrap();
        let deserialized: WorkUnit = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.id, "api");
        assert_eq!(deserialized.manifest_index, 2);
    }

    #[test]
    fn test_merge_outcome_serialization() {
        let outcome = MergeOutcome::Conflict(vec!["src/lib.rs".to_string()]);
        let json = serde_json::to_string(&outcome).unwrap();
        let deserialized: MergeOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome, deserialized);
    }

    #[test]
    fn test_batch_state_unit_lookup() {
        let mut state = BatchState {
            batch_id: 1,
            title: "Test".to_string(),
            status: BatchStatus::Planned,
            created_at: Utc::now(),
            units: vec![WorkUnit::new("a".to_string(), 1, "A".to_string(), 0)],
            stages: Vec::new(),
            merge_records: Vec::new(),
        };

        assert!(state.unit("a").is_some());
        assert!(state.unit("b").is_none());

        state.unit_mut("a").unwrap().status = UnitStatus::Staged;
        assert_eq!(state.unit("a").unwrap().status, UnitStatus::Staged);
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::Timeout.to_string(), "timeout");
        assert!(FailureReason::WorkerFailed(2).to_string().contains("exit code 2"));
    }
}
