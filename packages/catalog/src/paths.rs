#![allow(clippy::module_name_repetitions)]
//! Canonical file paths for the catalog database and run checkpoints.
//!
//! Paths default to the project root's `data/` directory. Set
//! `STAR_SEEKER_DATA_DIR` to relocate the whole directory, or
//! `STAR_SEEKER_DB` to point at a specific catalog file.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`.
///
/// # Panics
///
/// Panics if the project root cannot be resolved.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("Failed to find project root from CARGO_MANIFEST_DIR")
        .to_path_buf()
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    std::env::var("STAR_SEEKER_DATA_DIR")
        .ok()
        .filter(|s| !s.is_empty())
        .map_or_else(|| project_root().join("data"), PathBuf::from)
}

/// Returns the path of the catalog `DuckDB` file.
#[must_use]
pub fn catalog_db_path() -> PathBuf {
    std::env::var("STAR_SEEKER_DB")
        .ok()
        .filter(|s| !s.is_empty())
        .map_or_else(|| data_dir().join("catalog.duckdb"), PathBuf::from)
}

/// Returns the `data/checkpoints/` directory.
#[must_use]
pub fn checkpoints_dir() -> PathBuf {
    data_dir().join("checkpoints")
}

/// Returns the checkpoint file for one run of `job`.
///
/// Each process of a sharded run gets its own file so that parallel runs
/// never race on a cursor.
#[must_use]
pub fn checkpoint_path(job: &str, process_id: u32) -> PathBuf {
    checkpoints_dir().join(format!("{job}_{process_id}.json"))
}

/// Returns the output log of one child process of a parallel run.
#[must_use]
pub fn shard_log_path(job: &str, process_id: u32) -> PathBuf {
    data_dir()
        .join("logs")
        .join(format!("{job}_{process_id}.log"))
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
