//! Artist name import from the registry's paginated listing.
//!
//! Pages through the listing, inserts every artist not yet in the catalog
//! with placeholder attributes (so the enrichment jobs pick them up), and
//! checkpoints the next listing offset after each page. Duplicates are
//! detected by registry ID and counted as skipped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use star_seeker_catalog::Catalog;
use star_seeker_catalog_models::{NewArtist, UNKNOWN_GENRE, placeholder_image, truncate_text};
use star_seeker_pipeline_models::{Checkpoint, Counters, ImportConfig, JobKind, RunSummary};
use star_seeker_provider::{ArtistDirectory, ArtistRecord};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::progress::{ProgressCallback, null_progress};
use crate::{MAX_CONSECUTIVE_SAVE_FAILURES, PipelineError};

/// Pause after a failed listing request.
pub const PAGE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Consecutive listing failures after which the import stops.
pub const MAX_CONSECUTIVE_PAGE_FAILURES: u32 = 3;

/// Location stored when the registry reports no country.
const UNKNOWN_LOCATION: &str = "Unknown";

/// Drives name imports into one catalog.
pub struct Importer<'a> {
    catalog: &'a Catalog,
    directory: Arc<dyn ArtistDirectory>,
    checkpoints: CheckpointStore,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancellationToken,
}

impl<'a> Importer<'a> {
    /// Creates an importer persisting its offset in `checkpoints`.
    #[must_use]
    pub fn new(
        catalog: &'a Catalog,
        directory: Arc<dyn ArtistDirectory>,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self {
            catalog,
            directory,
            checkpoints,
            progress: null_progress(),
            cancel: CancellationToken::new(),
        }
    }

    /// Reports progress to `progress` instead of discarding it.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Stops the import at the next page boundary once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Imports artists until `config.limit` have been added (across all
    /// sessions of this checkpoint), the listing or the shard range is
    /// exhausted, or a stop is requested.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::Config`] for a zero page size.
    /// * [`PipelineError::Catalog`] if inserting a page fails.
    /// * [`PipelineError::Checkpoint`] if the checkpoint cannot be saved
    ///   [`MAX_CONSECUTIVE_SAVE_FAILURES`] times in a row, or at the end.
    #[allow(clippy::future_not_send, clippy::too_many_lines)]
    pub async fn run(&self, config: &ImportConfig) -> Result<RunSummary, PipelineError> {
        if config.batch_size == 0 {
            return Err(PipelineError::Config {
                message: "import batch size must be at least 1".to_string(),
            });
        }
        let started = Instant::now();
        let job = JobKind::Import;

        let (mut offset, mut counters) = match self.checkpoints.load() {
            _ if config.start_offset > 0 => {
                log::info!("import: starting at explicit offset {}", config.start_offset);
                (config.start_offset, Counters::default())
            }
            Some(saved) => {
                let offset = u64::try_from(saved.last_processed_id).unwrap_or(0);
                log::info!(
                    "import: resuming at offset {offset} ({} artists added so far)",
                    saved.counters.updated
                );
                (offset, saved.counters)
            }
            None => (0, Counters::default()),
        };

        let goal = config.end_offset.map_or(config.limit, |end| {
            config.limit.min(end.saturating_sub(offset))
        });
        self.progress.set_total(goal);

        let mut pages = 0u64;
        let mut interrupted = false;
        let mut unsaved = false;
        let mut save_failures = 0u32;
        let mut page_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                log::warn!("import: stop requested at offset {offset}");
                interrupted = true;
                break;
            }
            if counters.updated >= config.limit {
                log::info!("import: reached limit of {} artists", config.limit);
                break;
            }
            let page_size = match config.end_offset {
                Some(end) if offset >= end => {
                    log::info!("import: reached end offset {end}");
                    break;
                }
                Some(end) => u32::try_from(end - offset)
                    .map_or(config.batch_size, |left| left.min(config.batch_size)),
                None => config.batch_size,
            };

            let page = match self.directory.list_artists(offset, page_size).await {
                Ok(page) => {
                    page_failures = 0;
                    page
                }
                Err(e) => {
                    page_failures += 1;
                    if page_failures >= MAX_CONSECUTIVE_PAGE_FAILURES {
                        log::error!(
                            "import: listing failed {page_failures} times at offset {offset}, \
                             stopping: {e}"
                        );
                        interrupted = true;
                        break;
                    }
                    log::warn!(
                        "import: listing failed at offset {offset} \
                         ({page_failures}/{MAX_CONSECUTIVE_PAGE_FAILURES}), \
                         retrying in {PAGE_RETRY_DELAY:?}: {e}"
                    );
                    tokio::time::sleep(PAGE_RETRY_DELAY).await;
                    continue;
                }
            };

            if page.artists.is_empty() {
                log::info!("import: listing exhausted at offset {offset}");
                break;
            }

            let remaining = usize::try_from(config.limit - counters.updated).unwrap_or(usize::MAX);
            let rows: Vec<NewArtist> = page
                .artists
                .iter()
                .take(remaining)
                .map(placeholder_row)
                .collect();
            let consumed = rows.len() as u64;

            let inserted = self.catalog.insert_artists(&rows)?;
            counters.updated += inserted;
            counters.skipped += consumed - inserted;
            offset += consumed;
            pages += 1;

            match self.checkpoints.save(&Checkpoint::new(to_cursor(offset), counters)) {
                Ok(()) => {
                    save_failures = 0;
                    unsaved = false;
                }
                Err(e) => {
                    save_failures += 1;
                    unsaved = true;
                    log::error!(
                        "import: failed to save checkpoint at offset {offset} \
                         ({save_failures}/{MAX_CONSECUTIVE_SAVE_FAILURES}): {e}"
                    );
                    if save_failures >= MAX_CONSECUTIVE_SAVE_FAILURES {
                        return Err(e.into());
                    }
                }
            }

            self.progress.inc(inserted);
            self.progress.set_message(format!(
                "offset {offset} of {} ({} added)",
                page.total, counters.updated
            ));
            log::info!(
                "import: page {pages} at offset {offset}: {inserted} added, {} duplicates",
                consumed - inserted
            );

            if offset >= page.total {
                log::info!("import: reached end of listing ({} artists)", page.total);
                break;
            }
        }

        if unsaved {
            self.checkpoints
                .save(&Checkpoint::new(to_cursor(offset), counters))?;
        }

        self.progress.finish(format!(
            "import: {} added, {} duplicates",
            counters.updated, counters.skipped
        ));
        Ok(RunSummary {
            job,
            counters,
            last_processed_id: to_cursor(offset),
            chunks_committed: pages,
            interrupted,
            duration: started.elapsed(),
        })
    }
}

fn to_cursor(offset: u64) -> i64 {
    i64::try_from(offset).unwrap_or(i64::MAX)
}

/// Catalog row for a freshly listed artist, with every enrichable
/// attribute left at its "needs enrichment" value.
fn placeholder_row(record: &ArtistRecord) -> NewArtist {
    NewArtist {
        name: truncate_text(&record.name),
        genre: UNKNOWN_GENRE.to_string(),
        location: record
            .country
            .as_deref()
            .map_or_else(|| UNKNOWN_LOCATION.to_string(), truncate_text),
        profile_picture: placeholder_image(&record.id),
        external_id: record.id.clone(),
    }
}
