//! The chunk loop driving an enrichment run.
//!
//! One iteration: fetch up to `chunk_size` pending targets past the
//! cursor, split them into batches, dispatch the batches to the
//! [`WorkerPool`], wait for all of them, write the results, advance the
//! cursor to the highest ID of the chunk and save the checkpoint. The
//! next chunk is only fetched after that save, so the checkpoint never
//! points past work whose results were not written.
//!
//! A stop signal is checked between chunks only; the chunk in flight is
//! always finished and committed.

use std::sync::Arc;
use std::time::Instant;

use star_seeker_catalog::Catalog;
use star_seeker_catalog_models::EnrichmentField;
use star_seeker_pipeline_models::{
    Batch, Checkpoint, Counters, EnrichmentResult, JobKind, RunConfig, RunSummary,
};
use star_seeker_provider::ArtistProvider;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::pool::WorkerPool;
use crate::progress::{ProgressCallback, null_progress};
use crate::resolve::resolve;
use crate::writer::{self, WriteMode};
use crate::{MAX_CONSECUTIVE_SAVE_FAILURES, PipelineError};

/// Drives enrichment runs against one catalog and one provider.
pub struct Orchestrator<'a> {
    catalog: &'a Catalog,
    provider: Arc<dyn ArtistProvider>,
    checkpoints: CheckpointStore,
    progress: Arc<dyn ProgressCallback>,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator persisting its cursor in `checkpoints`.
    #[must_use]
    pub fn new(
        catalog: &'a Catalog,
        provider: Arc<dyn ArtistProvider>,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self {
            catalog,
            provider,
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

    /// Stops the run at the next chunk boundary once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the chunk loop until no pending targets remain, the limit is
    /// reached, or a stop is requested.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::Config`] for invalid settings.
    /// * [`PipelineError::Provider`] if the provider cannot authenticate.
    /// * [`PipelineError::Catalog`] if a chunk cannot be read.
    /// * [`PipelineError::Checkpoint`] if the checkpoint cannot be saved
    ///   [`MAX_CONSECUTIVE_SAVE_FAILURES`] times in a row, or at the end.
    #[allow(clippy::future_not_send, clippy::too_many_lines)]
    pub async fn run(&self, config: &RunConfig) -> Result<RunSummary, PipelineError> {
        validate(config)?;
        let started = Instant::now();
        let job = config.job();
        let field = config.field;

        self.provider.authenticate().await?;

        let (mut cursor, mut counters) = match (config.resume_from, self.checkpoints.load()) {
            (Some(from), Some(saved)) if from >= saved.last_processed_id => {
                log::info!(
                    "{job}: skipping ahead from checkpoint id {} to explicit cursor {from}",
                    saved.last_processed_id
                );
                (from, saved.counters)
            }
            (Some(from), Some(saved)) => {
                log::warn!(
                    "{job}: explicit cursor {from} is behind checkpoint id {}; \
                     discarding {} and starting a new checkpoint",
                    saved.last_processed_id,
                    self.checkpoints.path().display()
                );
                self.checkpoints.clear()?;
                (from, Counters::default())
            }
            (Some(from), None) => {
                log::info!("{job}: starting after explicit cursor {from}");
                (from, Counters::default())
            }
            (None, Some(saved)) => {
                log::info!(
                    "{job}: resuming after id {} (checkpoint from {}, {} processed so far)",
                    saved.last_processed_id,
                    saved.saved_at.to_rfc3339(),
                    saved.counters.total()
                );
                (saved.last_processed_id, saved.counters)
            }
            (None, None) => {
                log::info!("{job}: no checkpoint found, starting from the beginning");
                (0, Counters::default())
            }
        };

        let pending = self.catalog.count_pending(field, cursor, config.max_id)?;
        let total = config.limit.map_or(pending, |limit| pending.min(limit));
        log::info!(
            "{job}: {pending} rows need {field} \
             (processing up to {total}, chunk {}, batch {}, {} workers)",
            config.chunk_size,
            config.batch_size,
            config.max_workers
        );
        self.progress.set_total(total);

        let pool = WorkerPool::new(Arc::clone(&self.provider), field, config.max_workers);
        let mut processed = 0u64;
        let mut chunks = 0u64;
        let mut interrupted = false;
        let mut unsaved = false;
        let mut save_failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                log::warn!("{job}: stop requested, ending after id {cursor}");
                interrupted = true;
                break;
            }

            let want = match config.limit {
                Some(limit) => {
                    let left = limit.saturating_sub(processed);
                    if left == 0 {
                        log::info!("{job}: reached limit of {limit} targets");
                        break;
                    }
                    usize::try_from(left).map_or(config.chunk_size, |l| l.min(config.chunk_size))
                }
                None => config.chunk_size,
            };

            let targets = self
                .catalog
                .fetch_chunk(field, cursor, config.max_id, want)?;
            let (Some(first), Some(last)) = (targets.first(), targets.last()) else {
                log::info!("{job}: no pending targets after id {cursor}");
                break;
            };
            let (first_id, chunk_end) = (first.id, last.id);
            let chunk_len = targets.len() as u64;

            self.progress
                .set_message(format!("chunk {} (ids {first_id}..={chunk_end})", chunks + 1));

            let results = pool.process(Batch::split(targets, config.batch_size)).await;
            let chunk_counters = writer::commit(self.catalog, field, &results, WriteMode::IfNeeded);

            counters.absorb(&chunk_counters);
            cursor = chunk_end;
            processed += chunk_len;
            chunks += 1;

            match self.checkpoints.save(&Checkpoint::new(cursor, counters)) {
                Ok(()) => {
                    save_failures = 0;
                    unsaved = false;
                }
                Err(e) => {
                    save_failures += 1;
                    unsaved = true;
                    log::error!(
                        "{job}: failed to save checkpoint at id {cursor} \
                         ({save_failures}/{MAX_CONSECUTIVE_SAVE_FAILURES}): {e}"
                    );
                    if save_failures >= MAX_CONSECUTIVE_SAVE_FAILURES {
                        return Err(e.into());
                    }
                }
            }

            self.progress.inc(chunk_len);
            log::info!(
                "{job}: chunk {chunks} committed through id {cursor}: \
                 {} updated, {} not found, {} errored, {} skipped",
                chunk_counters.updated,
                chunk_counters.not_found,
                chunk_counters.errored,
                chunk_counters.skipped,
            );
        }

        if unsaved {
            self.checkpoints.save(&Checkpoint::new(cursor, counters))?;
        }

        let summary = RunSummary {
            job,
            counters,
            last_processed_id: cursor,
            chunks_committed: chunks,
            interrupted,
            duration: started.elapsed(),
        };
        self.progress.finish(format!(
            "{job}: {} updated, {} not found, {} errored, {} skipped",
            counters.updated, counters.not_found, counters.errored, counters.skipped
        ));
        Ok(summary)
    }

    /// Processes exactly one catalog row, bypassing chunking and the
    /// checkpoint.
    ///
    /// Unless `force` is set a row that no longer needs `field` is
    /// skipped; with `force` it is looked up and overwritten anyway.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::ArtistNotFound`] if no row has `artist_id`.
    /// * [`PipelineError::Provider`] if the provider cannot authenticate.
    /// * [`PipelineError::Catalog`] if the row cannot be read.
    #[allow(clippy::future_not_send)]
    pub async fn run_single(
        &self,
        field: EnrichmentField,
        artist_id: i64,
        force: bool,
    ) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let row = self
            .catalog
            .get(artist_id)?
            .ok_or(PipelineError::ArtistNotFound { id: artist_id })?;

        self.provider.authenticate().await?;

        let mut target = row.to_target(field);
        if force {
            target.current = None;
        }
        let outcome = resolve(self.provider.as_ref(), &target, field).await;
        log::info!("{} (id {artist_id}): {outcome:?}", row.name);

        let mode = if force {
            WriteMode::Force
        } else {
            WriteMode::IfNeeded
        };
        let counters = writer::commit(
            self.catalog,
            field,
            &[EnrichmentResult::new(artist_id, outcome)],
            mode,
        );

        Ok(RunSummary {
            job: JobKind::for_field(field),
            counters,
            last_processed_id: artist_id,
            chunks_committed: 0,
            interrupted: false,
            duration: started.elapsed(),
        })
    }
}

fn validate(config: &RunConfig) -> Result<(), PipelineError> {
    let invalid = |message: String| Err(PipelineError::Config { message });

    if config.batch_size == 0 {
        return invalid("batch size must be at least 1".to_string());
    }
    if config.max_workers == 0 {
        return invalid("max workers must be at least 1".to_string());
    }
    if config.chunk_size == 0 {
        return invalid("chunk size must be at least 1".to_string());
    }
    if let (Some(from), Some(max)) = (config.resume_from, config.max_id)
        && from >= max
    {
        return invalid(format!("resume cursor {from} is not below max id {max}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use star_seeker_catalog_models::FieldValue;
    use star_seeker_pipeline_models::{DEFAULT_CHUNK_SIZE, Outcome};
    use star_seeker_provider::rate_limit::RateLimiter;
    use star_seeker_provider::retry::RetryPolicy;
    use star_seeker_provider::service_registry::SpotifyConfig;
    use star_seeker_provider::spotify::{ClientCredentials, SpotifyClient};
    use star_seeker_provider::test_server::{CannedResponse, TestServer};

    use super::*;
    use crate::checkpoint::tests::ScratchDir;
    use crate::testing::{FakeProvider, seeded_catalog};

    fn genre_of(catalog: &Catalog, id: i64) -> Option<String> {
        catalog.get(id).unwrap().unwrap().genre
    }

    fn config(chunk_size: usize, batch_size: usize) -> RunConfig {
        RunConfig {
            chunk_size,
            batch_size,
            max_workers: 2,
            ..RunConfig::new(EnrichmentField::Genre)
        }
    }

    #[tokio::test]
    async fn fresh_run_commits_every_chunk_and_checkpoints_last_id() {
        // Five rows, two with a known match, one of them failing.
        let catalog = seeded_catalog(&["a", "b", "c", "d", "e"]);
        let provider = FakeProvider::default()
            .with_full_artist("a")
            .with_full_artist("c")
            .failing_for("e");
        let scratch = ScratchDir::new("fresh_run");
        let store = scratch.store();

        let summary = Orchestrator::new(&catalog, Arc::new(provider), store.clone())
            .run(&config(2, 1))
            .await
            .unwrap();

        assert_eq!(
            summary.counters,
            Counters {
                updated: 2,
                not_found: 2,
                errored: 1,
                skipped: 0,
            }
        );
        assert_eq!(summary.chunks_committed, 3);
        assert_eq!(summary.last_processed_id, 5);
        assert!(!summary.interrupted);
        assert_eq!(store.load().unwrap().last_processed_id, 5);
        assert_eq!(genre_of(&catalog, 1).as_deref(), Some("A Core"));
        assert_eq!(genre_of(&catalog, 2).as_deref(), Some("Unknown"));
    }

    #[tokio::test]
    async fn restart_resumes_after_checkpoint() {
        // Scenario: the previous session committed ids 1..=1000.
        let names: Vec<String> = (1..=1500).map(|i| format!("artist {i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let catalog = seeded_catalog(&names);
        let scratch = ScratchDir::new("restart");
        let store = scratch.store();
        store
            .save(&Checkpoint::new(
                1000,
                Counters {
                    not_found: 1000,
                    ..Counters::default()
                },
            ))
            .unwrap();
        let provider = Arc::new(FakeProvider::default());

        let summary = Orchestrator::new(&catalog, provider.clone(), store.clone())
            .run(&config(DEFAULT_CHUNK_SIZE, 50))
            .await
            .unwrap();

        let searched = provider.searched();
        assert_eq!(searched.len(), 500);
        assert!(!searched.contains(&"artist 1000".to_string()));
        assert!(searched.contains(&"artist 1001".to_string()));
        assert_eq!(summary.counters.not_found, 1500);
        assert_eq!(store.load().unwrap().last_processed_id, 1500);
    }

    #[tokio::test]
    async fn full_chunk_of_successes_commits_once() {
        let names: Vec<String> = (1..=100).map(|i| format!("artist {i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let catalog = seeded_catalog(&names);
        let provider = names
            .iter()
            .fold(FakeProvider::default(), |p, name| p.with_full_artist(name));
        let scratch = ScratchDir::new("full_chunk");
        let store = scratch.store();

        let summary = Orchestrator::new(&catalog, Arc::new(provider), store.clone())
            .run(&RunConfig {
                chunk_size: 100,
                batch_size: 25,
                max_workers: 4,
                ..RunConfig::new(EnrichmentField::Genre)
            })
            .await
            .unwrap();

        let expected = Counters {
            updated: 100,
            not_found: 0,
            errored: 0,
            skipped: 0,
        };
        assert_eq!(summary.counters, expected);
        assert_eq!(summary.chunks_committed, 1);
        let saved = store.load().unwrap();
        assert_eq!(saved.last_processed_id, 100);
        assert_eq!(saved.counters, expected);
        assert_eq!(catalog.count_pending(EnrichmentField::Genre, 0, None).unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_checkpoint_restarts_from_the_beginning() {
        let catalog = seeded_catalog(&["a", "b", "c"]);
        let scratch = ScratchDir::new("corrupt_run");
        let store = scratch.store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{\"last_processed_id\": 2, \"coun").unwrap();
        let provider = Arc::new(FakeProvider::default());

        let summary = Orchestrator::new(&catalog, provider.clone(), store.clone())
            .run(&config(10, 1))
            .await
            .unwrap();

        let mut searched = provider.searched();
        searched.sort();
        assert_eq!(searched, vec!["a", "b", "c"]);
        assert_eq!(summary.counters.not_found, 3);
        assert_eq!(store.load().unwrap().last_processed_id, 3);
    }

    #[tokio::test]
    async fn explicit_cursor_behind_checkpoint_starts_a_new_checkpoint() {
        let catalog = seeded_catalog(&["a", "b", "c", "d", "e"]);
        let scratch = ScratchDir::new("rewind");
        let store = scratch.store();
        store
            .save(&Checkpoint::new(
                5,
                Counters {
                    not_found: 5,
                    ..Counters::default()
                },
            ))
            .unwrap();
        let provider = Arc::new(FakeProvider::default());

        let summary = Orchestrator::new(&catalog, provider.clone(), store.clone())
            .run(&RunConfig {
                resume_from: Some(0),
                max_id: Some(3),
                ..config(10, 1)
            })
            .await
            .unwrap();

        let mut searched = provider.searched();
        searched.sort();
        assert_eq!(searched, vec!["a", "b"]);
        assert_eq!(summary.last_processed_id, 2);
        // The old checkpoint was discarded, not rolled back in place.
        let saved = store.load().unwrap();
        assert_eq!(saved.last_processed_id, 2);
        assert_eq!(saved.counters.not_found, 2);
    }

    #[tokio::test]
    async fn explicit_cursor_ahead_of_checkpoint_keeps_counters() {
        let catalog = seeded_catalog(&["a", "b", "c", "d", "e"]);
        let scratch = ScratchDir::new("skip_ahead");
        let store = scratch.store();
        store
            .save(&Checkpoint::new(
                1,
                Counters {
                    updated: 1,
                    ..Counters::default()
                },
            ))
            .unwrap();

        let summary = Orchestrator::new(&catalog, Arc::new(FakeProvider::default()), store.clone())
            .run(&RunConfig {
                resume_from: Some(3),
                ..config(10, 1)
            })
            .await
            .unwrap();

        assert_eq!(summary.counters.updated, 1);
        assert_eq!(summary.counters.not_found, 2);
        assert_eq!(store.load().unwrap().last_processed_id, 5);
    }

    #[tokio::test]
    async fn throttled_lookup_waits_for_retry_after_then_updates() {
        let server = TestServer::start(vec![
            CannedResponse::json(200, r#"{"access_token": "tok", "expires_in": 3600}"#),
            CannedResponse::throttled(2),
            CannedResponse::json(
                200,
                r#"{"artists": {"items": [{
                    "id": "sp-1",
                    "name": "Daft Punk",
                    "genres": ["french house"],
                    "popularity": 77,
                    "images": []
                }]}}"#,
            ),
        ])
        .await;
        let spotify = SpotifyClient::new(
            SpotifyConfig {
                api_base_url: server.url("/v1"),
                auth_url: server.url("/api/token"),
                search_limit: 1,
            },
            ClientCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            Arc::new(RateLimiter::new(0.0)),
            RetryPolicy::default(),
        );
        let catalog = seeded_catalog(&["Daft Punk"]);
        let scratch = ScratchDir::new("throttled");

        let started = std::time::Instant::now();
        let summary = Orchestrator::new(&catalog, Arc::new(spotify), scratch.store())
            .run(&config(10, 1))
            .await
            .unwrap();

        assert!(started.elapsed() >= std::time::Duration::from_secs(2));
        assert_eq!(summary.counters.updated, 1);
        assert_eq!(genre_of(&catalog, 1).as_deref(), Some("French House"));
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn stop_signal_finishes_current_chunk_then_halts() {
        let catalog = seeded_catalog(&["a", "b", "c", "d", "e", "f"]);
        let cancel = CancellationToken::new();
        let provider = FakeProvider::default().cancelling_on("a", cancel.clone());
        let scratch = ScratchDir::new("cancel");
        let store = scratch.store();

        let summary = Orchestrator::new(&catalog, Arc::new(provider), store.clone())
            .with_cancellation(cancel)
            .run(&config(3, 1))
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.chunks_committed, 1);
        assert_eq!(summary.counters.total(), 3);
        assert_eq!(store.load().unwrap().last_processed_id, 3);
    }

    #[tokio::test]
    async fn already_enriched_rows_are_not_fetched_again() {
        let catalog = seeded_catalog(&["a", "b", "c"]);
        catalog
            .update_if_needed(2, EnrichmentField::Genre, &FieldValue::Text("Jazz".into()))
            .unwrap();
        let provider = Arc::new(FakeProvider::default().with_full_artist("a"));
        let scratch = ScratchDir::new("enriched");

        let summary = Orchestrator::new(&catalog, provider.clone(), scratch.store())
            .run(&config(10, 10))
            .await
            .unwrap();

        assert_eq!(provider.searched(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(summary.counters.updated, 1);
        assert_eq!(genre_of(&catalog, 2).as_deref(), Some("Jazz"));
    }

    #[tokio::test]
    async fn shard_bounds_and_limit_are_respected() {
        let catalog = seeded_catalog(&["a", "b", "c", "d", "e", "f", "g"]);
        let provider = Arc::new(FakeProvider::default());
        let scratch = ScratchDir::new("shard");
        let config = RunConfig {
            resume_from: Some(2),
            max_id: Some(7),
            limit: Some(3),
            ..config(2, 1)
        };

        let summary = Orchestrator::new(&catalog, provider.clone(), scratch.store())
            .run(&config)
            .await
            .unwrap();

        let mut searched = provider.searched();
        searched.sort();
        assert_eq!(searched, vec!["c", "d", "e"]);
        assert_eq!(summary.last_processed_id, 5);
    }

    #[tokio::test]
    async fn failed_checkpoint_save_is_retried_then_fatal() {
        let catalog = seeded_catalog(&["a", "b", "c", "d"]);
        let scratch = ScratchDir::new("save_fail");
        // A directory where the checkpoint file should be makes every
        // rename fail.
        let blocked = scratch.0.join("blocked.json");
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();

        let err = Orchestrator::new(
            &catalog,
            Arc::new(FakeProvider::default()),
            CheckpointStore::new(&blocked),
        )
        .run(&config(1, 1))
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Checkpoint(_)));
    }

    #[tokio::test]
    async fn single_artist_override_skips_or_forces() {
        let catalog = seeded_catalog(&["a"]);
        catalog
            .update_if_needed(1, EnrichmentField::Genre, &FieldValue::Text("Jazz".into()))
            .unwrap();
        let scratch = ScratchDir::new("single");
        let store = scratch.store();
        let orchestrator = Orchestrator::new(
            &catalog,
            Arc::new(FakeProvider::default().with_full_artist("a")),
            store.clone(),
        );

        let skipped = orchestrator
            .run_single(EnrichmentField::Genre, 1, false)
            .await
            .unwrap();
        assert_eq!(skipped.counters.skipped, 1);
        assert_eq!(genre_of(&catalog, 1).as_deref(), Some("Jazz"));

        let forced = orchestrator
            .run_single(EnrichmentField::Genre, 1, true)
            .await
            .unwrap();
        assert_eq!(forced.counters.updated, 1);
        assert_eq!(genre_of(&catalog, 1).as_deref(), Some("A Core"));
        assert!(store.load().is_none());

        let missing = orchestrator.run_single(EnrichmentField::Genre, 99, false).await;
        assert!(matches!(missing, Err(PipelineError::ArtistNotFound { id: 99 })));
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let catalog = seeded_catalog(&[]);
        let scratch = ScratchDir::new("invalid");
        let orchestrator =
            Orchestrator::new(&catalog, Arc::new(FakeProvider::default()), scratch.store());

        let err = orchestrator.run(&config(10, 0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }

    #[test]
    fn popularity_results_write_scores() {
        let catalog = seeded_catalog(&["a"]);
        let counters = writer::commit(
            &catalog,
            EnrichmentField::Popularity,
            &[EnrichmentResult::new(1, Outcome::Updated(FieldValue::Score(12)))],
            WriteMode::IfNeeded,
        );
        assert_eq!(counters.updated, 1);
        assert_eq!(catalog.get(1).unwrap().unwrap().popularity, 12);
    }
}
