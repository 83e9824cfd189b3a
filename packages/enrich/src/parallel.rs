//! Sharded parallel runs.
//!
//! Splits a job's range into contiguous shards and runs each shard as a
//! child process of this binary with its own `--process-id`, so every
//! shard keeps its own checkpoint file. The combined rate budget is
//! divided evenly between the children.

use std::process::{ExitStatus, Stdio};

use clap::Args;
use futures::StreamExt as _;
use futures::stream::FuturesUnordered;
use star_seeker_catalog::{Catalog, paths};
use star_seeker_cli_utils::{IndicatifProgress, MultiProgress};
use star_seeker_pipeline::CheckpointStore;
use star_seeker_pipeline_models::{
    DEFAULT_CHUNK_SIZE, DEFAULT_IMPORT_LIMIT, DEFAULT_MAX_WORKERS, JobKind,
};
use star_seeker_provider::musicbrainz;
use star_seeker_provider::service_registry;
use tokio::process::Command;

use crate::ProviderKind;

/// Flags of the `parallel` subcommand.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct ParallelArgs {
    /// Job to split (genres, images, popularity, import)
    #[arg(long)]
    pub job: JobKind,
    /// Number of child processes
    #[arg(long, default_value_t = 4)]
    pub processes: u32,
    /// Service used by the genres job
    #[arg(long, value_enum, default_value_t = ProviderKind::Spotify)]
    pub provider: ProviderKind,
    /// Combined requests per second, split evenly across the processes
    #[arg(long)]
    pub rate_limit: Option<f64>,
    /// Artists per batch, or per listing page for the import
    #[arg(long)]
    pub batch_size: Option<u32>,
    /// Batches processed concurrently by each process
    #[arg(long, default_value_t = DEFAULT_MAX_WORKERS)]
    pub max_workers: usize,
    /// Artists fetched and checkpointed together by each process
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Highest catalog ID to cover (defaults to the current maximum)
    #[arg(long)]
    pub max_id: Option<i64>,
    /// Import only: listing entries to cover
    #[arg(long, default_value_t = DEFAULT_IMPORT_LIMIT)]
    pub limit: u64,
    /// Import only: first listing offset
    #[arg(long, default_value_t = 0)]
    pub start_offset: u64,
}

impl Default for ParallelArgs {
    fn default() -> Self {
        Self {
            job: JobKind::Genres,
            processes: 4,
            provider: ProviderKind::Spotify,
            rate_limit: None,
            batch_size: None,
            max_workers: DEFAULT_MAX_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_id: None,
            limit: DEFAULT_IMPORT_LIMIT,
            start_offset: 0,
        }
    }
}

/// One contiguous slice of a job's range, `[start, end)`.
///
/// For enrichment jobs the bounds are catalog IDs; for the import they
/// are listing offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    /// Checkpoint selector of the child running this shard.
    pub process_id: u32,
    /// First ID or offset covered.
    pub start: u64,
    /// First ID or offset past the shard.
    pub end: u64,
}

impl Shard {
    /// Cursor value a child starts after for an ID shard.
    #[must_use]
    pub fn resume_cursor(&self) -> i64 {
        i64::try_from(self.start).map_or(i64::MAX, |start| start - 1)
    }

    /// Returns `true` if a saved cursor belongs to this shard, so the
    /// child should resume from it instead of the shard start.
    #[must_use]
    pub fn owns_cursor(&self, job: JobKind, cursor: i64) -> bool {
        let Ok(cursor) = u64::try_from(cursor) else {
            return false;
        };
        match job {
            JobKind::Import => cursor >= self.start && cursor <= self.end,
            _ => cursor + 1 >= self.start && cursor < self.end,
        }
    }
}

/// Exit status of one child process.
#[derive(Debug)]
pub struct ShardReport {
    /// The shard the child ran.
    pub shard: Shard,
    /// How the child exited, or why it could not be waited on.
    pub status: std::io::Result<ExitStatus>,
}

impl ShardReport {
    /// Returns `true` if the child exited successfully.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status.as_ref().is_ok_and(ExitStatus::success)
    }
}

/// Splits `[start, end)` into at most `processes` contiguous shards of
/// near-equal size, numbered from 1.
#[must_use]
pub fn split_range(start: u64, end: u64, processes: u32) -> Vec<Shard> {
    let len = end.saturating_sub(start);
    if len == 0 {
        return Vec::new();
    }
    let per = len.div_ceil(u64::from(processes.max(1)));

    (1..=processes.max(1))
        .map_while(|process_id| {
            let lo = start + u64::from(process_id - 1) * per;
            (lo < end).then(|| Shard {
                process_id,
                start: lo,
                end: (lo + per).min(end),
            })
        })
        .collect()
}

/// Shards covering catalog IDs `1..=max_id`.
#[must_use]
pub fn id_shards(max_id: i64, processes: u32) -> Vec<Shard> {
    let max_id = u64::try_from(max_id).unwrap_or(0);
    split_range(1, max_id + 1, processes)
}

/// Per-process rate limit for a combined budget of `total`.
#[must_use]
pub fn split_rate(total: f64, processes: u32) -> f64 {
    total / f64::from(processes.max(1))
}

/// Builds the child command line for `shard`.
///
/// `resume` says whether the child should continue from its saved
/// checkpoint rather than start at the shard's lower bound.
#[must_use]
pub fn child_args(
    options: &ParallelArgs,
    shard: &Shard,
    resume: bool,
    rate_limit: Option<f64>,
) -> Vec<String> {
    let mut args = vec![
        options.job.as_ref().to_string(),
        "--process-id".to_string(),
        shard.process_id.to_string(),
    ];

    if options.job == JobKind::Import {
        // Offset 0 means "continue from the checkpoint".
        let start = if resume { 0 } else { shard.start };
        args.extend([
            "--start-offset".to_string(),
            start.to_string(),
            "--end-offset".to_string(),
            shard.end.to_string(),
            "--limit".to_string(),
            (shard.end - shard.start).to_string(),
        ]);
    } else {
        if options.job == JobKind::Genres {
            args.extend(["--provider".to_string(), options.provider.as_arg().to_string()]);
        }
        args.extend([
            "--max-id".to_string(),
            shard.end.to_string(),
            "--max-workers".to_string(),
            options.max_workers.to_string(),
            "--chunk-size".to_string(),
            options.chunk_size.to_string(),
        ]);
        if !resume {
            args.extend(["--resume-from".to_string(), shard.resume_cursor().to_string()]);
        }
    }

    if let Some(batch_size) = options.batch_size {
        args.extend(["--batch-size".to_string(), batch_size.to_string()]);
    }
    if let Some(rate) = rate_limit {
        args.extend(["--rate-limit".to_string(), rate.to_string()]);
    }
    args
}

fn service_id(options: &ParallelArgs) -> &'static str {
    if options.job == JobKind::Import {
        musicbrainz::SERVICE_ID
    } else if options.job == JobKind::Genres {
        options.provider.as_arg()
    } else {
        ProviderKind::Spotify.as_arg()
    }
}

fn plan(options: &ParallelArgs) -> Result<Vec<Shard>, Box<dyn std::error::Error>> {
    if options.processes == 0 {
        return Err("--processes must be at least 1".into());
    }
    if options.job == JobKind::Import {
        return Ok(split_range(
            options.start_offset,
            options.start_offset + options.limit,
            options.processes,
        ));
    }

    let max_id = match options.max_id {
        Some(id) => id,
        None => Catalog::open_default()?.max_id()?.unwrap_or(0),
    };
    Ok(id_shards(max_id, options.processes))
}

/// Decides whether the child for `shard` resumes from its checkpoint.
///
/// A checkpoint left by a differently-sized earlier launch is cleared so
/// the child starts at its own lower bound.
fn resume_from_checkpoint(job: JobKind, shard: &Shard) -> Result<bool, Box<dyn std::error::Error>> {
    let store = CheckpointStore::for_job(job, shard.process_id);
    let Some(checkpoint) = store.load() else {
        return Ok(false);
    };
    if shard.owns_cursor(job, checkpoint.last_processed_id) {
        log::info!(
            "Process {} resumes from {}",
            shard.process_id,
            checkpoint.last_processed_id
        );
        return Ok(true);
    }

    log::warn!(
        "Checkpoint {} ({}) lies outside shard {}..{}, starting over",
        store.path().display(),
        checkpoint.last_processed_id,
        shard.start,
        shard.end
    );
    store.clear()?;
    Ok(false)
}

async fn run_child(
    shard: Shard,
    args: Vec<String>,
    log_name: &str,
) -> Result<ShardReport, Box<dyn std::error::Error>> {
    let log_path = paths::shard_log_path(log_name, shard.process_id);
    if let Some(parent) = log_path.parent() {
        paths::ensure_dir(parent)?;
    }
    let log_file = std::fs::File::create(&log_path)?;

    log::info!(
        "Starting process {} for {}..{} (log: {})",
        shard.process_id,
        shard.start,
        shard.end,
        log_path.display()
    );
    log::debug!("Child arguments: {}", args.join(" "));

    let mut child = Command::new(std::env::current_exe()?)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .kill_on_drop(true)
        .spawn()?;

    let status = child.wait().await;
    Ok(ShardReport { shard, status })
}

/// Runs `options.job` across `options.processes` child processes and
/// waits for all of them.
///
/// # Errors
///
/// Returns an error if the shards cannot be planned or a child cannot be
/// started. Children that fail after starting are reported, not raised.
#[allow(clippy::future_not_send)]
pub async fn launch(
    options: &ParallelArgs,
    multi: &MultiProgress,
) -> Result<Vec<ShardReport>, Box<dyn std::error::Error>> {
    let shards = plan(options)?;
    if shards.is_empty() {
        log::warn!("Nothing to split for {}", options.job);
        return Ok(Vec::new());
    }

    let service = service_id(options);
    let total_rate = options.rate_limit.or_else(|| {
        service_registry::service(service).map(|svc| svc.requests_per_second)
    });
    let per_process = total_rate.map(|rate| split_rate(rate, options.processes));
    if let Some(rate) = per_process {
        log::info!(
            "{} process(es) for {} at {rate:.3} req/s each ({service})",
            shards.len(),
            options.job
        );
    }

    let progress = IndicatifProgress::shards_bar(
        multi,
        &format!("{} shards", options.job),
        shards.len() as u64,
    );

    let mut children = FuturesUnordered::new();
    for shard in shards {
        let resume = resume_from_checkpoint(options.job, &shard)?;
        let args = child_args(options, &shard, resume, per_process);
        children.push(run_child(shard, args, options.job.as_ref()));
    }

    let mut reports = Vec::new();
    while let Some(report) = children.next().await {
        let report = report?;
        match &report.status {
            Ok(status) if status.success() => {
                log::info!("Process {} finished", report.shard.process_id);
            }
            Ok(status) => {
                log::error!("Process {} exited with {status}", report.shard.process_id);
            }
            Err(e) => log::error!("Process {} could not be awaited: {e}", report.shard.process_id),
        }
        progress.inc(1);
        reports.push(report);
    }

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    progress.finish(format!(
        "{} shards: {} ok, {failed} failed",
        options.job,
        reports.len() - failed
    ));
    reports.sort_by_key(|r| r.shard.process_id);
    Ok(reports)
}
