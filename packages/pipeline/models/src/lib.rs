#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Checkpoint, outcome, and run configuration types for enrichment jobs.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use star_seeker_catalog_models::{EnrichmentField, EnrichmentTarget, FieldValue};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// A resumable job, as named on the command line and in checkpoint files.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    /// Genre backfill.
    Genres,
    /// Profile image backfill.
    Images,
    /// Popularity backfill.
    Popularity,
    /// Artist name import from the registry listing.
    Import,
}

impl JobKind {
    /// Returns the catalog field an enrichment job fills, or `None` for
    /// the import.
    #[must_use]
    pub const fn field(self) -> Option<EnrichmentField> {
        match self {
            Self::Genres => Some(EnrichmentField::Genre),
            Self::Images => Some(EnrichmentField::Image),
            Self::Popularity => Some(EnrichmentField::Popularity),
            Self::Import => None,
        }
    }

    /// Returns the enrichment job for `field`.
    #[must_use]
    pub const fn for_field(field: EnrichmentField) -> Self {
        match field {
            EnrichmentField::Genre => Self::Genres,
            EnrichmentField::Image => Self::Images,
            EnrichmentField::Popularity => Self::Popularity,
        }
    }
}

/// Cumulative per-outcome tallies for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Targets whose attribute was written.
    pub updated: u64,
    /// Targets the external service had no data for.
    pub not_found: u64,
    /// Targets that failed (call or write error).
    pub errored: u64,
    /// Targets that no longer needed enrichment.
    pub skipped: u64,
}

impl Counters {
    /// Sum of all outcomes.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.updated + self.not_found + self.errored + self.skipped
    }

    /// Adds `other` into `self`.
    pub const fn absorb(&mut self, other: &Self) {
        self.updated += other.updated;
        self.not_found += other.not_found;
        self.errored += other.errored;
        self.skipped += other.skipped;
    }
}

/// Durable resume point of one run.
///
/// For enrichment jobs `last_processed_id` is the highest catalog ID of
/// the last committed chunk. For the import it is the next listing
/// offset to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Resume cursor.
    pub last_processed_id: i64,
    /// Tallies accumulated up to the cursor.
    pub counters: Counters,
    /// When this checkpoint was written.
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Creates a checkpoint stamped with the current time.
    #[must_use]
    pub fn new(last_processed_id: i64, counters: Counters) -> Self {
        Self {
            last_processed_id,
            counters,
            saved_at: Utc::now(),
        }
    }
}

/// Result of processing one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A value was found and should be written.
    Updated(FieldValue),
    /// The external service had no usable data.
    NotFound,
    /// The target no longer needed enrichment.
    Skipped,
    /// The call failed; the message is logged and counted.
    Error(String),
}

/// Outcome for one target, tagged with its catalog ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentResult {
    /// Catalog ID of the target.
    pub target_id: i64,
    /// What happened.
    pub outcome: Outcome,
}

impl EnrichmentResult {
    /// Pairs `target_id` with `outcome`.
    #[must_use]
    pub const fn new(target_id: i64, outcome: Outcome) -> Self {
        Self { target_id, outcome }
    }
}

/// A slice of a chunk handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Position of this batch within its chunk.
    pub seq: usize,
    /// Targets, in ascending ID order.
    pub targets: Vec<EnrichmentTarget>,
}

impl Batch {
    /// Splits `targets` into batches of at most `batch_size` items.
    #[must_use]
    pub fn split(targets: Vec<EnrichmentTarget>, batch_size: usize) -> Vec<Self> {
        let batch_size = batch_size.max(1);
        let mut batches = Vec::with_capacity(targets.len().div_ceil(batch_size));
        let mut iter = targets.into_iter().peekable();
        let mut seq = 0;

        while iter.peek().is_some() {
            batches.push(Self {
                seq,
                targets: iter.by_ref().take(batch_size).collect(),
            });
            seq += 1;
        }
        batches
    }
}

/// Default number of targets per batch.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default number of concurrently processed batches.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Default number of targets fetched per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Settings for one enrichment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Attribute to fill.
    pub field: EnrichmentField,
    /// Targets per batch.
    pub batch_size: usize,
    /// Batches processed concurrently.
    pub max_workers: usize,
    /// Targets per chunk (the commit unit).
    pub chunk_size: usize,
    /// Start after this ID instead of the checkpoint cursor.
    pub resume_from: Option<i64>,
    /// Exclusive upper ID bound (sharded runs).
    pub max_id: Option<i64>,
    /// Stop once this many targets have been processed.
    pub limit: Option<u64>,
    /// Selects the checkpoint file.
    pub process_id: u32,
}

impl RunConfig {
    /// Default settings for `field`.
    #[must_use]
    pub const fn new(field: EnrichmentField) -> Self {
        Self {
            field,
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            resume_from: None,
            max_id: None,
            limit: None,
            process_id: 1,
        }
    }

    /// The job this run belongs to.
    #[must_use]
    pub const fn job(&self) -> JobKind {
        JobKind::for_field(self.field)
    }
}

/// Default number of artists an import adds before stopping.
pub const DEFAULT_IMPORT_LIMIT: u64 = 100_000;

/// Default listing page size of an import.
pub const DEFAULT_IMPORT_BATCH_SIZE: u32 = 100;

/// Settings for one name import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Stop once this many new artists have been added.
    pub limit: u64,
    /// Listing page size.
    pub batch_size: u32,
    /// First listing offset; `0` means "resume from the checkpoint".
    pub start_offset: u64,
    /// Exclusive end offset (sharded runs).
    pub end_offset: Option<u64>,
    /// Selects the checkpoint file.
    pub process_id: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_IMPORT_LIMIT,
            batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            start_offset: 0,
            end_offset: None,
            process_id: 1,
        }
    }
}

/// Final report of a run, produced even when it was interrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Which job ran.
    pub job: JobKind,
    /// Checkpointed tallies (including those of earlier sessions).
    pub counters: Counters,
    /// Cursor after the last committed chunk.
    pub last_processed_id: i64,
    /// Chunks committed during this session.
    pub chunks_committed: u64,
    /// `true` if a stop signal ended the run early.
    pub interrupted: bool,
    /// Wall-clock duration of this session.
    pub duration: Duration,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = &self.counters;
        writeln!(
            f,
            "{} {} after {:.1}s ({} chunks this session)",
            self.job,
            if self.interrupted {
                "interrupted"
            } else {
                "finished"
            },
            self.duration.as_secs_f64(),
            self.chunks_committed,
        )?;
        writeln!(f, "  cursor:    {}", self.last_processed_id)?;
        writeln!(f, "  updated:   {}", c.updated)?;
        writeln!(f, "  not found: {}", c.not_found)?;
        writeln!(f, "  errored:   {}", c.errored)?;
        writeln!(f, "  skipped:   {}", c.skipped)?;
        write!(f, "  total:     {}", c.total())
    }
}
