// Scheduler error taxonomy

use thiserror::Error;

/// Errors surfaced by the scheduling pipeline.
///
/// Pre-scheduling errors (`ManifestParse`, `DanglingDependency`,
/// `DuplicateUnit`, `Cycle`) abort the whole batch before any side effect.
/// Everything after scheduling begins is unit-scoped and recorded in the
/// per-unit outcomes instead of being raised here, except for the
/// batch-halting `AllUnitsFailed` case.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Unit '{unit}' depends on '{reference}', which is not declared in the manifest")]
    DanglingDependency { unit: String, reference: String },

    #[error("Duplicate unit id in manifest: '{0}'")]
    DuplicateUnit(String),

    #[error("Dependency cycle detected: {}", format_cycle(path))]
    Cycle { path: Vec<String> },

    #[error("Failed to allocate workspace for unit '{unit}': {reason}")]
    WorkspaceAllocation { unit: String, reason: String },

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Batch state error: {0}")]
    State(String),

    #[error("Every unit in stage {stage} failed; halting batch {batch_id}")]
    AllUnitsFailed { batch_id: u32, stage: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_cycle(path: &[String]) -> String {
    path.join(" -> ")
}

impl SchedulerError {
    /// Whether this error must abort the batch before anything is dispatched.
    pub fn is_fatal_pre_scheduling(&self) -> bool {
        matches!(
            self,
            SchedulerError::ManifestParse(_)
                | SchedulerError::DanglingDependency { .. }
                | SchedulerError::DuplicateUnit(_)
                | SchedulerError::Cycle { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
