#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Artist catalog storage for the enrichment pipeline.
//!
//! The catalog lives in a single `DuckDB` file (see [`paths`]). This crate
//! exposes the two contracts the pipeline depends on: ordered, filtered
//! chunk reads past a cursor ([`store::Catalog::fetch_chunk`]) and
//! conditional updates that no-op when a row no longer needs the
//! attribute ([`store::Catalog::update_if_needed`]).

pub mod paths;
pub mod store;

pub use store::Catalog;

/// Errors that can occur during catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// `DuckDB` query or connection error.
    #[error("Database error: {0}")]
    Database(#[from] duckdb::Error),

    /// Filesystem error while preparing the data directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
