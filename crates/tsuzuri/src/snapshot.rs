//! Persisting suspended runs as flat JSON records.

use crate::orchestrator::RunStatus;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use tsuzuri_core::{WorkflowError, WorkflowState};

/// Key holding the stage cursor in a persisted record.
pub const CURSOR_KEY: &str = "_cursor";
/// Key holding the run status in a persisted record.
pub const STATUS_KEY: &str = "_status";

/// Returns `true` for keys a state entry may not use.
pub(crate) fn is_reserved(key: &str) -> bool {
    key == CURSOR_KEY || key == STATUS_KEY
}

/// A run captured between turns.
///
/// Serializes as one flat JSON object: every state entry under its own key,
/// plus the reserved [`CURSOR_KEY`] and [`STATUS_KEY`].
///
/// # Examples
///
/// ```
/// use tsuzuri::{RunSnapshot, RunStatus};
/// use tsuzuri_core::WorkflowState;
///
/// let mut state = WorkflowState::new();
/// state.set("topic", "rust");
/// let snapshot = RunSnapshot { cursor: 2, status: RunStatus::AwaitingInput, state };
///
/// let json = serde_json::to_value(&snapshot).unwrap();
/// assert_eq!(json["_cursor"], 2);
/// assert_eq!(json["topic"], "rust");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Index of the current stage.
    #[serde(rename = "_cursor")]
    pub cursor: usize,
    /// Run status.
    #[serde(rename = "_status")]
    pub status: RunStatus,
    /// State entries.
    #[serde(flatten)]
    pub state: WorkflowState,
}

impl RunSnapshot {
    /// Writes the snapshot to `path`, replacing any previous file.
    ///
    /// Fails if a state entry uses a reserved key, since the record could not
    /// be read back.
    pub async fn save(&self, path: &Path) -> Result<(), WorkflowError> {
        if let Some(key) = self.state.keys().find(|k| is_reserved(k.as_str())) {
            return Err(WorkflowError::Persistence(format!(
                "state key '{}' is reserved",
                key
            )));
        }
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| WorkflowError::Persistence(format!("encode snapshot: {}", e)))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                WorkflowError::Persistence(format!("create {}: {}", parent.display(), e))
            })?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| WorkflowError::Persistence(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| WorkflowError::Persistence(format!("rename {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), cursor = self.cursor, "snapshot saved");
        Ok(())
    }

    /// Reads a snapshot from `path`.
    pub async fn load(path: &Path) -> Result<Self, WorkflowError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| WorkflowError::Persistence(format!("read {}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| WorkflowError::Persistence(format!("decode {}: {}", path.display(), e)))
    }
}
