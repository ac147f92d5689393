//! Run snapshots
//!
//! A run is fully described by its [`OrchestratorState`], so saving that state
//! as JSON is enough to resume it later.

use crate::conductor::types::{OrchestratorState, StepStatus};
use sdk::errors::EngineError;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Write `state` to `path` as pretty JSON, atomically (temp file + rename).
pub fn save(state: &OrchestratorState, path: &Path) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| EngineError::Snapshot(format!("failed to serialize run: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            EngineError::Snapshot(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).map_err(|e| {
        EngineError::Snapshot(format!("failed to write {}: {}", tmp_path.display(), e))
    })?;
    fs::rename(&tmp_path, path).map_err(|e| {
        EngineError::Snapshot(format!("failed to replace {}: {}", path.display(), e))
    })?;

    debug!("Saved run {} to {}", state.run_id, path.display());
    Ok(())
}

/// Read a snapshot back. Steps interrupted mid-dispatch are reset to pending.
pub fn load(path: &Path) -> Result<OrchestratorState, EngineError> {
    let content = fs::read_to_string(path).map_err(|e| {
        EngineError::Snapshot(format!("failed to read {}: {}", path.display(), e))
    })?;
    let mut state: OrchestratorState = serde_json::from_str(&content).map_err(|e| {
        EngineError::Snapshot(format!("invalid snapshot {}: {}", path.display(), e))
    })?;

    for step in state.plan.steps.iter_mut() {
        if step.status == StepStatus::Running {
            step.status = StepStatus::Pending;
            step.started_at = None;
        }
    }

    debug!("Loaded run {} from {}", state.run_id, path.display());
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::types::{Budget, Plan, RunStatus, Step};
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> OrchestratorState {
        let mut state = OrchestratorState::new(
            "summarize notes",
            "weekly",
            vec![sdk::types::CapabilitySpec::new("read_file", "read")],
            Budget::new(500, 30, 5),
        );
        let mut done = Step::new("read", "read_file").with_input("path", json!("notes.md"));
        done.status = StepStatus::Completed;
        let mut interrupted = Step::new("write", "write_file").depends_on(&["read"]);
        interrupted.status = StepStatus::Running;
        state.plan = Plan::new(vec![done, interrupted]);
        state.completed_steps.push("read".to_string());
        state.artifacts.record("read", json!({"content": "hi"}));
        state.status = RunStatus::Executing;
        state
    }

    #[test]
    fn test_save_and_load_resets_running_steps() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("runs").join("run.json");
        let state = sample();

        save(&state, &path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.run_id, state.run_id);
        assert_eq!(loaded.artifacts, state.artifacts);
        assert_eq!(loaded.plan.steps[0].status, StepStatus::Completed);
        assert_eq!(loaded.plan.steps[1].status, StepStatus::Pending);
        assert_eq!(loaded.status, RunStatus::Executing);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(EngineError::Snapshot(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            load(&temp.path().join("missing.json")),
            Err(EngineError::Snapshot(_))
        ));
    }
}
