//! Applies a chunk's results to the catalog and tallies them.
//!
//! Writes are conditional (see `Catalog::update_if_needed`), so applying
//! the same results twice, or racing another process on the same row,
//! never overwrites a value that is already good. A failed write is
//! logged and counted, and the remaining results are still applied.

use star_seeker_catalog::Catalog;
use star_seeker_catalog_models::EnrichmentField;
use star_seeker_pipeline_models::{Counters, EnrichmentResult, Outcome};

/// How an `Updated` result is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Only write rows that still need the field.
    IfNeeded,
    /// Overwrite unconditionally.
    Force,
}

/// Writes every `Updated` result and returns the chunk's tallies.
///
/// An `Updated` result whose write changes nothing (the row was enriched
/// in the meantime) counts as skipped; a failed write counts as errored.
#[must_use]
pub fn commit(
    catalog: &Catalog,
    field: EnrichmentField,
    results: &[EnrichmentResult],
    mode: WriteMode,
) -> Counters {
    let mut counters = Counters::default();

    for result in results {
        match &result.outcome {
            Outcome::Updated(value) => {
                let written = match mode {
                    WriteMode::IfNeeded => catalog.update_if_needed(result.target_id, field, value),
                    WriteMode::Force => catalog.force_update(result.target_id, field, value),
                };
                match written {
                    Ok(true) => {
                        log::debug!("Set {field} of id {} to '{value}'", result.target_id);
                        counters.updated += 1;
                    }
                    Ok(false) => {
                        log::warn!(
                            "Write of {field} for id {} changed nothing \
                             (already enriched or removed)",
                            result.target_id
                        );
                        counters.skipped += 1;
                    }
                    Err(e) => {
                        log::error!("Failed to write {field} for id {}: {e}", result.target_id);
                        counters.errored += 1;
                    }
                }
            }
            Outcome::NotFound => counters.not_found += 1,
            Outcome::Skipped => counters.skipped += 1,
            Outcome::Error(_) => counters.errored += 1,
        }
    }

    counters
}
