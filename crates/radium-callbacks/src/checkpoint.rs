//! Checkpoint location convention.
//!
//! A log directory holds a `checkpoint` state file naming the latest
//! checkpoint and the retained history. Writers update it after every save;
//! readers only ever look at `model_checkpoint_path`.

use crate::error::{CallbackError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the state file inside a log directory.
pub const CHECKPOINT_STATE_FILE: &str = "checkpoint";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Latest checkpoint.
    pub model_checkpoint_path: PathBuf,
    /// Retained checkpoints, oldest first. Includes the latest.
    #[serde(default)]
    pub all_model_checkpoint_paths: Vec<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

#[must_use]
pub fn checkpoint_state_path(dir: &Path) -> PathBuf {
    dir.join(CHECKPOINT_STATE_FILE)
}

/// Read the state file of `dir`. A missing file means no checkpoint yet.
pub fn get_checkpoint_state(dir: &Path) -> Result<Option<CheckpointState>> {
    let bytes = match std::fs::read(checkpoint_state_path(dir)) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state = serde_json::from_slice::<CheckpointState>(&bytes).map_err(|e| {
        CallbackError::Checkpoint(format!("corrupt checkpoint state in {}: {}", dir.display(), e))
    })?;
    Ok(Some(state))
}

/// Record `latest` as the newest checkpoint of `dir`.
///
/// At most `keep_last` paths stay in the history (0 keeps everything); files
/// that fall out of the history are deleted from disk once the new state is
/// in place. The state file is replaced atomically, so a failed update leaves
/// the previous state and every checkpoint it names intact.
pub fn update_checkpoint_state(
    dir: &Path,
    latest: &Path,
    keep_last: usize,
) -> Result<CheckpointState> {
    let mut all = get_checkpoint_state(dir)?
        .map(|s| s.all_model_checkpoint_paths)
        .unwrap_or_default();
    all.retain(|p| p != latest);
    all.push(latest.to_path_buf());

    let dropped: Vec<PathBuf> = if keep_last > 0 && all.len() > keep_last {
        all.drain(..all.len() - keep_last).collect()
    } else {
        Vec::new()
    };

    let state = CheckpointState {
        model_checkpoint_path: latest.to_path_buf(),
        all_model_checkpoint_paths: all,
        updated_at: Utc::now(),
    };

    std::fs::create_dir_all(dir)?;
    write_state(dir, &state)?;

    for old in dropped {
        if let Err(e) = std::fs::remove_file(&old) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %old.display(),
                    error = %e,
                    "Failed to remove old checkpoint"
                );
            }
        }
    }
    Ok(state)
}

/// Write to a temp file next to the state file, then rename over it.
fn write_state(dir: &Path, state: &CheckpointState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    let state_path = checkpoint_state_path(dir);
    let temp_path = dir.join(format!("{CHECKPOINT_STATE_FILE}.tmp"));

    std::fs::write(&temp_path, json)?;
    if let Err(e) = std::fs::rename(&temp_path, &state_path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Finds the checkpoint a secondary context should restore.
pub trait CheckpointLocator {
    /// Directory searched, used in error messages.
    fn location(&self) -> &Path;

    fn latest_checkpoint(&self) -> Result<Option<PathBuf>>;
}

/// Filesystem locator over a log directory's state file.
#[derive(Debug, Clone)]
pub struct CheckpointDir {
    dir: PathBuf,
}

impl CheckpointDir {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a checkpoint for `step` is written to.
    #[must_use]
    pub fn model_path(&self, step: u64) -> PathBuf {
        self.dir.join(format!("model-{step}.json"))
    }
}

impl CheckpointLocator for CheckpointDir {
    fn location(&self) -> &Path {
        &self.dir
    }

    fn latest_checkpoint(&self) -> Result<Option<PathBuf>> {
        Ok(get_checkpoint_state(&self.dir)?.map(|s| s.model_checkpoint_path))
    }
}
