//! Stagehand: a batch work-unit scheduler.
//!
//! Takes a flat manifest of planned work units, infers dependencies from
//! explicit declarations and overlapping resource footprints, partitions the
//! units into ordered parallel-execution stages, dispatches each stage to
//! isolated git-worktree workspaces supervised by a polling liveness loop,
//! and merges completed work back into trunk in a fixed, declared order.

pub mod batch;
pub mod config;
pub mod error;
pub mod git;
pub mod graph;
pub mod merge;
pub mod models;
pub mod parsers;
pub mod supervisor;
pub mod utils;
pub mod workspace;

pub use batch::{BatchOrchestrator, BatchReport};
pub use config::SchedulerConfig;
pub use error::{Result, SchedulerError};
pub use models::{BatchState, BatchStatus, UnitStatus, WorkUnit};
