#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Resumable, rate-limited batch enrichment of the artist catalog.
//!
//! A run repeatedly pulls the next chunk of catalog rows that still need
//! an attribute, splits it into batches, resolves the batches
//! concurrently against an external provider, writes the results with
//! conditional updates and only then advances the durable cursor. A
//! restarted run therefore never skips unfinished work, and re-processing
//! a chunk after a crash is harmless.
//!
//! The [`import`] module applies the same commit-then-checkpoint loop to
//! paging through the registry's artist listing.

pub mod checkpoint;
pub mod import;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod resolve;
pub mod writer;

#[cfg(test)]
mod testing;

pub use checkpoint::{CheckpointError, CheckpointStore};
pub use import::Importer;
pub use orchestrator::Orchestrator;
pub use progress::{NullProgress, ProgressCallback};

use star_seeker_catalog::CatalogError;
use star_seeker_provider::ProviderError;

/// A checkpoint save may fail this many times in a row before the run
/// gives up.
pub const MAX_CONSECUTIVE_SAVE_FAILURES: u32 = 3;

/// Run-fatal errors.
///
/// Failures of individual targets never surface here; they are counted
/// in the run summary instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Reading the next chunk or inserting imported rows failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// The checkpoint could not be persisted.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// The provider could not be initialised (e.g. authentication).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The single-artist override named an ID that is not in the catalog.
    #[error("Artist {id} not found in the catalog")]
    ArtistNotFound {
        /// Requested catalog ID.
        id: i64,
    },

    /// Invalid run settings.
    #[error("Invalid configuration: {message}")]
    Config {
        /// What is wrong.
        message: String,
    },
}
