#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the artist catalog enrichment tool.

use clap::{Parser, Subcommand};
use star_seeker_catalog_models::EnrichmentField;
use star_seeker_enrich::parallel::{self, ParallelArgs};
use star_seeker_enrich::{EnrichArgs, ImportArgs, ProviderKind};
use star_seeker_pipeline_models::JobKind;

#[derive(Parser)]
#[command(name = "star_seeker_enrich", about = "Artist catalog enrichment tool")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill in missing or "Unknown" genres
    Genres {
        /// Service to look artists up in
        #[arg(long, value_enum, default_value_t = ProviderKind::Spotify)]
        provider: ProviderKind,
        #[command(flatten)]
        args: EnrichArgs,
    },
    /// Replace missing and placeholder profile images
    Images {
        #[command(flatten)]
        args: EnrichArgs,
    },
    /// Fill in popularity scores that are still 0
    Popularity {
        #[command(flatten)]
        args: EnrichArgs,
    },
    /// Import new artist names from the `MusicBrainz` listing
    Import {
        #[command(flatten)]
        args: ImportArgs,
    },
    /// Split a job across several child processes
    Parallel {
        #[command(flatten)]
        args: ParallelArgs,
    },
    /// Show the saved checkpoint and pending work of a job
    Status {
        /// Job to inspect (genres, images, popularity, import)
        #[arg(long)]
        job: JobKind,
        /// Checkpoint file selector
        #[arg(long, default_value_t = 1)]
        process_id: u32,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = star_seeker_cli_utils::init_logger();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return star_seeker_enrich::interactive::run(&multi).await;
    };

    match command {
        Commands::Genres { provider, args } => {
            let summary =
                star_seeker_enrich::enrich(EnrichmentField::Genre, provider, &args, &multi).await?;
            println!("{summary}");
        }
        Commands::Images { args } => {
            let summary = star_seeker_enrich::enrich(
                EnrichmentField::Image,
                ProviderKind::Spotify,
                &args,
                &multi,
            )
            .await?;
            println!("{summary}");
        }
        Commands::Popularity { args } => {
            let summary = star_seeker_enrich::enrich(
                EnrichmentField::Popularity,
                ProviderKind::Spotify,
                &args,
                &multi,
            )
            .await?;
            println!("{summary}");
        }
        Commands::Import { args } => {
            let summary = star_seeker_enrich::import(&args, &multi).await?;
            println!("{summary}");
        }
        Commands::Parallel { args } => {
            let reports = parallel::launch(&args, &multi).await?;
            let failed = reports.iter().filter(|r| !r.succeeded()).count();
            if failed > 0 {
                return Err(format!("{failed} of {} processes failed", reports.len()).into());
            }
        }
        Commands::Status { job, process_id } => {
            println!("{}", star_seeker_enrich::status(job, process_id)?);
        }
    }

    Ok(())
}
