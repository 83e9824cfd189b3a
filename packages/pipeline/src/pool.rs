//! Bounded concurrent dispatch of batches.
//!
//! Every batch of a chunk becomes one tokio task; a semaphore caps how
//! many run at once. Items within a batch are processed one after the
//! other, so parallelism is across batches only. Each task hands its
//! results back through its join handle and [`WorkerPool::process`]
//! returns only once every batch has finished (the chunk barrier).
//!
//! A panic while processing one item is caught and recorded as an
//! [`Outcome::Error`] for that item; the rest of the batch continues.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt as _;
use star_seeker_catalog_models::EnrichmentField;
use star_seeker_pipeline_models::{Batch, EnrichmentResult, Outcome};
use star_seeker_provider::ArtistProvider;
use tokio::sync::Semaphore;

use crate::resolve::resolve;

/// Dispatches batches to at most `max_workers` concurrent tasks.
pub struct WorkerPool {
    provider: Arc<dyn ArtistProvider>,
    field: EnrichmentField,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    /// Creates a pool resolving `field` through `provider`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ArtistProvider>,
        field: EnrichmentField,
        max_workers: usize,
    ) -> Self {
        Self {
            provider,
            field,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Processes all `batches` and returns one result per target.
    ///
    /// Results are grouped by batch in `seq` order. A batch whose task
    /// dies without reporting gets an [`Outcome::Error`] for each of its
    /// targets, so the returned list always covers the whole chunk.
    pub async fn process(&self, batches: Vec<Batch>) -> Vec<EnrichmentResult> {
        let total: usize = batches.iter().map(|b| b.targets.len()).sum();
        let mut handles = Vec::with_capacity(batches.len());

        for batch in batches {
            let ids: Vec<i64> = batch.targets.iter().map(|t| t.id).collect();
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&self.semaphore);
            let field = self.field;

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return failed_batch(&batch, "worker pool closed");
                };
                log::debug!(
                    "Batch {} started ({} targets)",
                    batch.seq,
                    batch.targets.len()
                );

                let mut results = Vec::with_capacity(batch.targets.len());
                for target in &batch.targets {
                    let outcome = AssertUnwindSafe(resolve(provider.as_ref(), target, field))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            let message = panic_message(panic.as_ref());
                            log::error!("Worker panicked on id {}: {message}", target.id);
                            Outcome::Error(format!("worker panicked: {message}"))
                        });
                    results.push(EnrichmentResult::new(target.id, outcome));
                }
                results
            });
            handles.push((ids, handle));
        }

        let mut results = Vec::with_capacity(total);
        for (ids, handle) in handles {
            match handle.await {
                Ok(batch_results) => results.extend(batch_results),
                Err(e) => {
                    log::error!("Batch task failed: {e}");
                    let message = format!("batch task failed: {e}");
                    results.extend(
                        ids.into_iter()
                            .map(|id| EnrichmentResult::new(id, Outcome::Error(message.clone()))),
                    );
                }
            }
        }
        results
    }
}

fn failed_batch(batch: &Batch, message: &str) -> Vec<EnrichmentResult> {
    batch
        .targets
        .iter()
        .map(|t| EnrichmentResult::new(t.id, Outcome::Error(message.to_string())))
        .collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use star_seeker_catalog_models::EnrichmentTarget;
    use star_seeker_provider::{ArtistRecord, ProviderError, RecordField};
    use tokio::sync::Mutex;

    use super::*;
    use crate::testing::FakeProvider;

    fn batches(names: &[&str], batch_size: usize) -> Vec<Batch> {
        let targets = names
            .iter()
            .zip(1..)
            .map(|(name, id)| EnrichmentTarget {
                id,
                name: (*name).to_string(),
                current: None,
            })
            .collect();
        Batch::split(targets, batch_size)
    }

    #[tokio::test]
    async fn every_target_gets_exactly_one_result() {
        let provider = FakeProvider::default()
            .with_full_artist("a")
            .with_full_artist("c")
            .failing_for("d");
        let pool = WorkerPool::new(Arc::new(provider), EnrichmentField::Genre, 2);

        let results = pool.process(batches(&["a", "b", "c", "d", "e"], 2)).await;

        let ids: Vec<i64> = results.iter().map(|r| r.target_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(matches!(results[0].outcome, Outcome::Updated(_)));
        assert_eq!(results[1].outcome, Outcome::NotFound);
        assert!(matches!(results[3].outcome, Outcome::Error(_)));
    }

    #[tokio::test]
    async fn panic_is_isolated_to_one_item() {
        let provider = FakeProvider::default()
            .with_full_artist("a")
            .with_full_artist("c")
            .panicking_on("b");
        let pool = WorkerPool::new(Arc::new(provider), EnrichmentField::Genre, 1);

        let results = pool.process(batches(&["a", "b", "c"], 3)).await;

        assert_eq!(results.len(), 3);
        assert!(matches!(&results[1].outcome, Outcome::Error(msg) if msg.contains("panicked")));
        assert!(matches!(results[2].outcome, Outcome::Updated(_)));
    }

    /// Records how many searches are in flight at once.
    struct SlowProvider {
        in_flight: Mutex<usize>,
        peak: Mutex<usize>,
    }

    #[async_trait]
    impl ArtistProvider for SlowProvider {
        fn id(&self) -> &str {
            "slow"
        }

        async fn search_by_name(
            &self,
            _name: &str,
        ) -> Result<Option<ArtistRecord>, ProviderError> {
            {
                let mut in_flight = self.in_flight.lock().await;
                *in_flight += 1;
                let mut peak = self.peak.lock().await;
                *peak = (*peak).max(*in_flight);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            *self.in_flight.lock().await -= 1;
            Ok(None)
        }

        async fn fetch_by_id(
            &self,
            id: &str,
            _fields: &[RecordField],
        ) -> Result<ArtistRecord, ProviderError> {
            Err(ProviderError::NotFound { id: id.to_string() })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_by_max_workers() {
        let provider = Arc::new(SlowProvider {
            in_flight: Mutex::new(0),
            peak: Mutex::new(0),
        });
        let pool = WorkerPool::new(provider.clone(), EnrichmentField::Genre, 3);
        let names: Vec<String> = (0..20).map(|i| format!("artist {i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();

        let results = pool.process(batches(&names, 2)).await;

        assert_eq!(results.len(), 20);
        assert_eq!(*provider.peak.lock().await, 3);
    }
}
