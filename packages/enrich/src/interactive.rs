#![allow(clippy::module_name_repetitions)]

//! Interactive TUI for the enrichment tool.
//!
//! Provides a menu-driven interface using `dialoguer` for running jobs
//! without memorizing CLI flags.

use dialoguer::{Confirm, Input, Select};
use star_seeker_catalog_models::EnrichmentField;
use star_seeker_cli_utils::MultiProgress;
use star_seeker_pipeline_models::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_SIZE, DEFAULT_IMPORT_BATCH_SIZE, DEFAULT_IMPORT_LIMIT,
    DEFAULT_MAX_WORKERS, JobKind,
};
use strum::IntoEnumIterator as _;

use crate::parallel::{self, ParallelArgs};
use crate::{EnrichArgs, ImportArgs, ProviderKind};

/// Top-level actions available in the interactive menu.
enum EnrichAction {
    Genres,
    Images,
    Popularity,
    Import,
    Parallel,
    Status,
}

impl EnrichAction {
    const ALL: &[Self] = &[
        Self::Genres,
        Self::Images,
        Self::Popularity,
        Self::Import,
        Self::Parallel,
        Self::Status,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Genres => "Enrich genres",
            Self::Images => "Enrich profile images",
            Self::Popularity => "Enrich popularity",
            Self::Import => "Import artist names",
            Self::Parallel => "Run a job across several processes",
            Self::Status => "Show checkpoint status",
        }
    }
}

/// Runs the interactive menu, prompting the user to select and configure
/// one job.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected job fails.
#[allow(clippy::future_not_send)]
pub async fn run(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let labels: Vec<&str> = EnrichAction::ALL.iter().map(EnrichAction::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    match EnrichAction::ALL[idx] {
        EnrichAction::Genres => {
            let provider = prompt_provider()?;
            enrich_interactive(EnrichmentField::Genre, provider, multi).await?;
        }
        EnrichAction::Images => {
            enrich_interactive(EnrichmentField::Image, ProviderKind::Spotify, multi).await?;
        }
        EnrichAction::Popularity => {
            enrich_interactive(EnrichmentField::Popularity, ProviderKind::Spotify, multi)
                .await?;
        }
        EnrichAction::Import => import_interactive(multi).await?,
        EnrichAction::Parallel => parallel_interactive(multi).await?,
        EnrichAction::Status => {
            let job = prompt_job("Job")?;
            let process_id = prompt_u64("Process ID", 1)?;
            println!("{}", crate::status(job, u32::try_from(process_id)?)?);
        }
    }

    Ok(())
}

fn prompt_provider() -> Result<ProviderKind, Box<dyn std::error::Error>> {
    let idx = Select::new()
        .with_prompt("Provider")
        .items(&["Spotify", "MusicBrainz"])
        .default(0)
        .interact()?;
    Ok(if idx == 0 {
        ProviderKind::Spotify
    } else {
        ProviderKind::Musicbrainz
    })
}

fn prompt_job(prompt: &str) -> Result<JobKind, Box<dyn std::error::Error>> {
    let jobs: Vec<JobKind> = JobKind::iter().collect();
    let labels: Vec<String> = jobs.iter().map(ToString::to_string).collect();
    let idx = Select::new()
        .with_prompt(prompt)
        .items(&labels)
        .default(0)
        .interact()?;
    Ok(jobs[idx])
}

/// Prompts for run settings and runs one enrichment job.
#[allow(clippy::future_not_send)]
async fn enrich_interactive(
    field: EnrichmentField,
    provider: ProviderKind,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = EnrichArgs::default();

    if let Some(id) = prompt_optional_u64("Single artist ID (empty for a full run)")? {
        args.artist_id = Some(i64::try_from(id)?);
        args.force = Confirm::new()
            .with_prompt("Overwrite an existing value?")
            .default(false)
            .interact()?;
    } else {
        args.batch_size = usize::try_from(prompt_u64("Batch size", DEFAULT_BATCH_SIZE as u64)?)?;
        args.max_workers =
            usize::try_from(prompt_u64("Concurrent batches", DEFAULT_MAX_WORKERS as u64)?)?;
        args.chunk_size = usize::try_from(prompt_u64("Chunk size", DEFAULT_CHUNK_SIZE as u64)?)?;
        args.limit = prompt_optional_u64("Artist limit (empty for no limit)")?;
        if let Some(from) = prompt_optional_u64("Resume after ID (empty to use the checkpoint)")? {
            args.resume_from = Some(i64::try_from(from)?);
        }
    }
    args.rate_limit = prompt_optional_f64("Requests per second (empty for the service default)")?;

    let summary = crate::enrich(field, provider, &args, multi).await?;
    println!("{summary}");
    Ok(())
}

/// Prompts for import settings and runs the name import.
#[allow(clippy::future_not_send)]
async fn import_interactive(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let args = ImportArgs {
        limit: prompt_u64("Artists to add", DEFAULT_IMPORT_LIMIT)?,
        batch_size: u32::try_from(prompt_u64(
            "Page size",
            u64::from(DEFAULT_IMPORT_BATCH_SIZE),
        )?)?,
        start_offset: prompt_u64("Start offset (0 to use the checkpoint)", 0)?,
        rate_limit: prompt_optional_f64("Requests per second (empty for the service default)")?,
        ..ImportArgs::default()
    };

    let summary = crate::import(&args, multi).await?;
    println!("{summary}");
    Ok(())
}

/// Prompts for a job and a process count and launches the shards.
#[allow(clippy::future_not_send)]
async fn parallel_interactive(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let job = prompt_job("Job to split")?;
    let mut options = ParallelArgs {
        job,
        processes: u32::try_from(prompt_u64("Processes", 4)?)?,
        rate_limit: prompt_optional_f64(
            "Combined requests per second (empty for the service default)",
        )?,
        ..ParallelArgs::default()
    };
    if job == JobKind::Genres {
        options.provider = prompt_provider()?;
    }
    if job == JobKind::Import {
        options.limit = prompt_u64("Listing entries to cover", DEFAULT_IMPORT_LIMIT)?;
        options.start_offset = prompt_u64("Start offset", 0)?;
    }

    let reports = parallel::launch(&options, multi).await?;
    for report in &reports {
        let status = match &report.status {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        };
        println!(
            "process {:<3} {:>10}..{:<10} {status}",
            report.shard.process_id, report.shard.start, report.shard.end
        );
    }
    Ok(())
}

fn prompt_u64(prompt: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    let input: String = Input::new()
        .with_prompt(prompt)
        .default(default.to_string())
        .interact_text()?;
    Ok(input.trim().parse()?)
}

fn prompt_optional_u64(prompt: &str) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    let input: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()?;

    if input.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(input.trim().parse()?))
    }
}

fn prompt_optional_f64(prompt: &str) -> Result<Option<f64>, Box<dyn std::error::Error>> {
    let input: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()?;

    if input.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(input.trim().parse()?))
    }
}
