// Batch state persistence between the generate and execute phases

use crate::error::{Result, SchedulerError};
use crate::models::BatchState;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Directory (relative to the repository root) holding batch state files.
pub const STATE_DIR: &str = ".stagehand";

/// Default state file location for a batch.
pub fn state_path(repo_path: &Path, batch_id: u32) -> PathBuf {
    repo_path.join(STATE_DIR).join(format!("batch-{}.json", batch_id))
}

/// Save batch state as JSON. The write is atomic (temp file + rename) and
/// serialized against concurrent schedulers with an advisory lock.
pub fn save_state(path: &Path, state: &BatchState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let lock = lock_file(path)?;
    lock.lock_exclusive()
        .map_err(|e| SchedulerError::State(format!("Failed to lock state file: {}", e)))?;

    let content = serde_json::to_string_pretty(state)?;
    let temp_path = path.with_extension("json.tmp");
    let result = fs::write(&temp_path, &content).and_then(|_| fs::rename(&temp_path, path));

    let _ = fs2::FileExt::unlock(&lock);
    result?;

    log::debug!("[BatchState] Saved batch {} to {}", state.batch_id, path.display());
    Ok(())
}

/// Load batch state from JSON.
pub fn load_state(path: &Path) -> Result<BatchState> {
    let lock = lock_file(path)?;
    lock.lock_shared()
        .map_err(|e| SchedulerError::State(format!("Failed to lock state file: {}", e)))?;

    let content = fs::read_to_string(path);
    let _ = fs2::FileExt::unlock(&lock);

    let content = content.map_err(|e| {
        SchedulerError::State(format!("Failed to read state file {}: {}", path.display(), e))
    })?;
    let state: BatchState = serde_json::from_str(&content)?;
    Ok(state)
}

fn lock_file(path: &Path) -> Result<std::fs::File> {
    let lock_path = path.with_extension("json.lock");
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| SchedulerError::State(format!("Failed to open lock file: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BatchStatus, Stage, WorkUnit};
    use chrono::Utc;
    use tempfile::TempDir;

    fn sample_state() -> BatchState {
        BatchState {
            batch_id: 3,
            title: "Sample batch".to_string(),
            status: BatchStatus::Planned,
            created_at: Utc::now(),
            units: vec![WorkUnit::new("a".to_string(), 3, "A".to_string(), 0)],
            stages: vec![Stage {
                index: 0,
                unit_ids: vec!["a".to_string()],
            }],
            merge_records: Vec::new(),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = state_path(dir.path(), 3);

        let state = sample_state();
        save_state(&path, &state).unwrap();

        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded.batch_id, 3);
        assert_eq!(loaded.units.len(), 1);
        assert_eq!(loaded.stages[0].unit_ids, vec!["a"]);
    }

    #[test]
    fn test_save_creates_state_directory() {
        let dir = TempDir::new().unwrap();
        let path = state_path(dir.path(), 1);
        assert!(!path.parent().unwrap().exists());

        save_state(&path, &sample_state()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = state_path(dir.path(), 9);
        assert!(load_state(&path).is_err());
    }

    #[test]
    fn test_save_overwrites_previous_state() {
        let dir = TempDir::new().unwrap();
        let path = state_path(dir.path(), 3);

        let mut state = sample_state();
        save_state(&path, &state).unwrap();

        state.status = BatchStatus::Completed;
        save_state(&path, &state).unwrap();

        let loaded = load_state(&path).unwrap();
        assert_eq!(loaded.status, BatchStatus::Completed);
    }
}
