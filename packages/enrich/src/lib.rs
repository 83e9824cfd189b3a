#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Artist catalog enrichment and import tool.
//!
//! Wires the catalog, the external providers and the pipeline together
//! for the `star_seeker_enrich` binary: one entry point per job, a status
//! report, the parallel shard launcher in [`parallel`] and the
//! menu-driven front end in [`interactive`].

pub mod interactive;
pub mod parallel;

use std::fmt::Write as _;
use std::sync::Arc;

use clap::{Args, ValueEnum};
use star_seeker_catalog::Catalog;
use star_seeker_catalog_models::EnrichmentField;
use star_seeker_cli_utils::{IndicatifProgress, MultiProgress};
use star_seeker_pipeline::{CheckpointStore, Importer, Orchestrator};
use star_seeker_pipeline_models::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_IMPORT_BATCH_SIZE, DEFAULT_IMPORT_LIMIT,
    DEFAULT_MAX_WORKERS, ImportConfig, JobKind, RunConfig, RunSummary,
};
use star_seeker_provider::musicbrainz::MusicBrainzClient;
use star_seeker_provider::spotify::SpotifyClient;
use star_seeker_provider::{ArtistProvider, ProviderError};
use tokio_util::sync::CancellationToken;

/// External service used to resolve artists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Spotify Web API (genres, images, popularity).
    Spotify,
    /// `MusicBrainz` (genres only).
    Musicbrainz,
}

impl ProviderKind {
    /// Command-line spelling of this provider.
    #[must_use]
    pub const fn as_arg(self) -> &'static str {
        match self {
            Self::Spotify => "spotify",
            Self::Musicbrainz => "musicbrainz",
        }
    }
}

/// Flags shared by the enrichment jobs.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct EnrichArgs {
    /// Number of artists per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    /// Number of batches processed concurrently
    #[arg(long, default_value_t = DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,
    /// Number of artists fetched and checkpointed together
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Requests per second (defaults to the service's configured budget)
    #[arg(long)]
    pub rate_limit: Option<f64>,
    /// Process only the artist with this catalog ID
    #[arg(long)]
    pub artist_id: Option<i64>,
    /// With `--artist-id`, overwrite the value even if already set
    #[arg(long, requires = "artist_id")]
    pub force: bool,
    /// Start after this catalog ID instead of the saved checkpoint
    #[arg(long)]
    pub resume_from: Option<i64>,
    /// Only process IDs below this value
    #[arg(long)]
    pub max_id: Option<i64>,
    /// Checkpoint file selector for parallel runs
    #[arg(long, default_value_t = 1)]
    pub process_id: u32,
    /// Stop after this many artists
    #[arg(long)]
    pub limit: Option<u64>,
}

impl Default for EnrichArgs {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            rate_limit: None,
            artist_id: None,
            force: false,
            resume_from: None,
            max_id: None,
            process_id: 1,
            limit: None,
        }
    }
}

impl EnrichArgs {
    /// Run settings for a chunked run over `field`.
    #[must_use]
    pub const fn run_config(&self, field: EnrichmentField) -> RunConfig {
        RunConfig {
            field,
            batch_size: self.batch_size,
            max_workers: self.max_workers,
            chunk_size: self.chunk_size,
            resume_from: self.resume_from,
            max_id: self.max_id,
            limit: self.limit,
            process_id: self.process_id,
        }
    }
}

/// Flags of the name import.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct ImportArgs {
    /// Stop once this many new artists have been added
    #[arg(long, default_value_t = DEFAULT_IMPORT_LIMIT)]
    pub limit: u64,
    /// Artists requested per listing page
    #[arg(long, default_value_t = DEFAULT_IMPORT_BATCH_SIZE)]
    pub batch_size: u32,
    /// First listing offset (0 resumes from the checkpoint)
    #[arg(long, default_value_t = 0)]
    pub start_offset: u64,
    /// Stop at this listing offset
    #[arg(long)]
    pub end_offset: Option<u64>,
    /// Checkpoint file selector for parallel runs
    #[arg(long, default_value_t = 1)]
    pub process_id: u32,
    /// Requests per second (defaults to the service's configured budget)
    #[arg(long)]
    pub rate_limit: Option<f64>,
}

impl Default for ImportArgs {
    fn default() -> Self {
        Self {
            limit: DEFAULT_IMPORT_LIMIT,
            batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            start_offset: 0,
            end_offset: None,
            process_id: 1,
            rate_limit: None,
        }
    }
}

impl ImportArgs {
    /// Import settings for these flags.
    #[must_use]
    pub const fn import_config(&self) -> ImportConfig {
        ImportConfig {
            limit: self.limit,
            batch_size: self.batch_size,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            process_id: self.process_id,
        }
    }
}

/// Builds the client for `kind`, limited to `rate_limit` requests per
/// second when given.
///
/// # Errors
///
/// Returns [`ProviderError`] if credentials are missing or the client
/// cannot be configured.
pub fn build_provider(
    kind: ProviderKind,
    rate_limit: Option<f64>,
) -> Result<Arc<dyn ArtistProvider>, ProviderError> {
    Ok(match kind {
        ProviderKind::Spotify => Arc::new(SpotifyClient::from_registry(rate_limit)?),
        ProviderKind::Musicbrainz => Arc::new(MusicBrainzClient::from_registry(rate_limit)?),
    })
}

/// Returns a token that is cancelled on the first Ctrl-C.
///
/// Runs stop at the next chunk boundary, so the current chunk is still
/// written and checkpointed.
#[must_use]
pub fn stop_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Stop requested, finishing the current chunk...");
            trigger.cancel();
        }
    });
    token
}

/// Runs the enrichment job for `field`.
///
/// # Errors
///
/// Returns an error if the catalog cannot be opened, the provider cannot
/// be built, or the run fails fatally.
#[allow(clippy::future_not_send)]
pub async fn enrich(
    field: EnrichmentField,
    provider: ProviderKind,
    args: &EnrichArgs,
    multi: &MultiProgress,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    if provider == ProviderKind::Musicbrainz && field != EnrichmentField::Genre {
        return Err(format!("MusicBrainz does not provide {field}").into());
    }

    let catalog = Catalog::open_default()?;
    let client = build_provider(provider, args.rate_limit)?;
    let config = args.run_config(field);
    let store = CheckpointStore::for_job(config.job(), args.process_id);
    log::info!(
        "{}: using {} (checkpoint {})",
        config.job(),
        provider.as_arg(),
        store.path().display()
    );

    let orchestrator = Orchestrator::new(&catalog, client, store)
        .with_progress(IndicatifProgress::run_bar(
            multi,
            &format!("Enriching {field}"),
        ))
        .with_cancellation(stop_on_ctrl_c());

    let summary = match args.artist_id {
        Some(id) => orchestrator.run_single(field, id, args.force).await?,
        None => orchestrator.run(&config).await?,
    };
    Ok(summary)
}

/// Runs the artist name import.
///
/// # Errors
///
/// Returns an error if the catalog cannot be opened, the registry client
/// cannot be built, or the import fails fatally.
#[allow(clippy::future_not_send)]
pub async fn import(
    args: &ImportArgs,
    multi: &MultiProgress,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let catalog = Catalog::open_default()?;
    let directory = Arc::new(MusicBrainzClient::from_registry(args.rate_limit)?);
    let store = CheckpointStore::for_job(JobKind::Import, args.process_id);

    let importer = Importer::new(&catalog, directory, store)
        .with_progress(IndicatifProgress::run_bar(multi, "Importing artists"))
        .with_cancellation(stop_on_ctrl_c());

    Ok(importer.run(&args.import_config()).await?)
}

/// Describes the saved checkpoint of one run and how much work is left.
///
/// # Errors
///
/// Returns an error if the catalog cannot be opened or queried.
pub fn status(job: JobKind, process_id: u32) -> Result<String, Box<dyn std::error::Error>> {
    let store = CheckpointStore::for_job(job, process_id);
    let checkpoint = store.load();
    let catalog = Catalog::open_default()?;
    let mut out = String::new();

    writeln!(out, "{job} (process {process_id})")?;
    writeln!(out, "  checkpoint: {}", store.path().display())?;
    match &checkpoint {
        Some(cp) => {
            let label = if job == JobKind::Import {
                "next offset"
            } else {
                "last id"
            };
            writeln!(out, "  {label}: {}", cp.last_processed_id)?;
            writeln!(out, "  saved at:  {}", cp.saved_at.to_rfc3339())?;
            writeln!(
                out,
                "  updated {} / not found {} / errored {} / skipped {}",
                cp.counters.updated, cp.counters.not_found, cp.counters.errored, cp.counters.skipped
            )?;
        }
        None => writeln!(out, "  no checkpoint saved yet")?,
    }

    match job.field() {
        Some(field) => {
            let after = checkpoint.as_ref().map_or(0, |cp| cp.last_processed_id);
            let pending = catalog.count_pending(field, after, None)?;
            let total = catalog.count_pending(field, 0, None)?;
            write!(
                out,
                "  pending:   {pending} after the cursor ({total} in the whole catalog)"
            )?;
        }
        None => {
            write!(
                out,
                "  catalog:   highest artist id {}",
                catalog.max_id()?.unwrap_or(0)
            )?;
        }
    }
    Ok(out)
}
