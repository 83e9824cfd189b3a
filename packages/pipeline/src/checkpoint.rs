//! Durable run cursors.
//!
//! Each run owns one JSON file (see
//! `star_seeker_catalog::paths::checkpoint_path`). Saves write a sibling
//! `.tmp` file, flush it to disk and rename it over the real one, so a
//! crash or power loss mid-save leaves the previous checkpoint intact. A missing or unreadable file
//! means "start from the beginning".

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use star_seeker_catalog::paths;
use star_seeker_pipeline_models::{Checkpoint, JobKind};

/// Errors that can occur while persisting a checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Filesystem error.
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Checkpoint JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Loads and saves the checkpoint of one run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store backed by an explicit file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `job` run as `process_id`, under the data directory.
    #[must_use]
    pub fn for_job(job: JobKind, process_id: u32) -> Self {
        Self::new(paths::checkpoint_path(job.as_ref(), process_id))
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the checkpoint.
    ///
    /// Returns `None` when the file does not exist or cannot be parsed; a
    /// corrupt file is logged and treated as a fresh start.
    #[must_use]
    pub fn load(&self) -> Option<Checkpoint> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!(
                    "Could not read checkpoint {}: {e}; starting fresh",
                    self.path.display()
                );
                return None;
            }
        };

        match serde_json::from_str(&contents) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                log::warn!(
                    "Ignoring corrupt checkpoint {}: {e}; starting fresh",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Atomically replaces the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the directory cannot be created or
    /// the file cannot be written or renamed.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        if let Some(dir) = self.path.parent() {
            paths::ensure_dir(dir)?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(checkpoint)?;

        let mut file = File::create(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp_path, &self.path)?;
        sync_parent(&self.path)?;
        log::debug!(
            "Saved checkpoint at cursor {} to {}",
            checkpoint.last_processed_id,
            self.path.display()
        );
        Ok(())
    }

    /// Deletes the checkpoint, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the file exists but cannot be
    /// removed.
    pub fn clear(&self) -> Result<(), CheckpointError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Flushes the directory entry of `path` so a completed rename survives
/// power loss.
fn sync_parent(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
