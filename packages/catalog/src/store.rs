//! `DuckDB` artist table with cursor-paginated reads.
//!
//! Rows are keyed by a monotonically increasing `id` drawn from a
//! sequence, so new rows always land beyond any existing cursor and are
//! picked up by later chunks of a running job.
//!
//! A file-backed catalog opens a short-lived connection per operation.
//! `DuckDB` grants a file's write lock to one process at a time, so the
//! shard processes of a parallel run take turns on the file instead of
//! one of them holding it for the whole run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use duckdb::{Connection, params};
use star_seeker_catalog_models::{
    ArtistRow, EnrichmentField, EnrichmentTarget, FieldValue, NewArtist,
};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::CatalogError;

/// Attempts to open a file that another process holds locked.
const LOCK_ATTEMPTS: u32 = 40;

/// Pause between lock attempts.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(250);

enum Backing {
    File(PathBuf),
    Memory(Connection),
}

/// Handle to the artist catalog.
pub struct Catalog {
    backing: Backing,
}

/// SQL form of [`EnrichmentField::needs`].
#[must_use]
pub const fn pending_predicate(field: EnrichmentField) -> &'static str {
    match field {
        EnrichmentField::Genre => {
            "(genre IS NULL OR trim(genre) = '' OR lower(genre) = 'unknown')"
        }
        EnrichmentField::Image => {
            "(profile_picture IS NULL OR profile_picture = '' \
             OR starts_with(profile_picture, 'https://picsum.photos/'))"
        }
        EnrichmentField::Popularity => "(popularity = 0)",
    }
}

const ROW_COLUMNS: &str = "id, name, genre, profile_picture, location, popularity, external_id";

impl Catalog {
    /// Opens (or creates) the catalog at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let catalog = Self {
            backing: Backing::File(path.to_path_buf()),
        };
        catalog.with_conn(create_schema)?;
        Ok(catalog)
    }

    /// Opens the catalog at the default path.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the connection or schema creation fails.
    pub fn open_default() -> Result<Self, CatalogError> {
        Self::open(&crate::paths::catalog_db_path())
    }

    /// Opens a throwaway in-memory catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            backing: Backing::Memory(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        match &self.backing {
            Backing::Memory(conn) => f(conn),
            Backing::File(path) => {
                let conn = connect(path)?;
                f(&conn)
            }
        }
    }

    /// Returns up to `limit` targets with `id > after` (and `id < before`
    /// when given) that still need `field`, ordered by `id` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the query fails.
    pub fn fetch_chunk(
        &self,
        field: EnrichmentField,
        after: i64,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<EnrichmentTarget>, CatalogError> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM artists
             WHERE id > ? AND id < ? AND {}
             ORDER BY id
             LIMIT ?",
            pending_predicate(field)
        );
        let limit = i64::try_from(limit).map_err(|_| CatalogError::Conversion {
            message: format!("chunk limit {limit} out of range"),
        })?;

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows =
                stmt.query_map(params![after, before.unwrap_or(i64::MAX), limit], read_row)?;

            let mut targets = Vec::new();
            for row in rows {
                targets.push(row?.to_target(field));
            }
            Ok(targets)
        })
    }

    /// Counts rows past `after` (and below `before`) that still need
    /// `field`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the query fails.
    pub fn count_pending(
        &self,
        field: EnrichmentField,
        after: i64,
        before: Option<i64>,
    ) -> Result<u64, CatalogError> {
        let sql = format!(
            "SELECT COUNT(*) FROM artists WHERE id > ? AND id < ? AND {}",
            pending_predicate(field)
        );
        let count: i64 = self.with_conn(|conn| {
            Ok(conn.query_row(&sql, params![after, before.unwrap_or(i64::MAX)], |row| {
                row.get(0)
            })?)
        })?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count.max(0) as u64)
    }

    /// Loads a single artist row.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the query fails.
    pub fn get(&self, id: i64) -> Result<Option<ArtistRow>, CatalogError> {
        let sql = format!("SELECT {ROW_COLUMNS} FROM artists WHERE id = ?");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query_map(params![id], read_row)?;
            Ok(rows.next().transpose()?)
        })
    }

    /// Returns the highest artist ID, or `None` for an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the query fails.
    pub fn max_id(&self) -> Result<Option<i64>, CatalogError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT MAX(id) FROM artists", [], |row| row.get(0))?)
        })
    }

    /// Writes `value` to `field` only if the row still needs it.
    ///
    /// Returns `true` if the row was changed, `false` if the row is gone
    /// or was already enriched (by this or another process).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the update fails.
    pub fn update_if_needed(
        &self,
        id: i64,
        field: EnrichmentField,
        value: &FieldValue,
    ) -> Result<bool, CatalogError> {
        let sql = format!(
            "UPDATE artists SET {} = ? WHERE id = ? AND {}",
            field.column(),
            pending_predicate(field)
        );
        self.write_value(&sql, id, value)
    }

    /// Writes `value` to `field` regardless of the current value.
    ///
    /// Only used by the forced single-artist override.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the update fails.
    pub fn force_update(
        &self,
        id: i64,
        field: EnrichmentField,
        value: &FieldValue,
    ) -> Result<bool, CatalogError> {
        let sql = format!("UPDATE artists SET {} = ? WHERE id = ?", field.column());
        self.write_value(&sql, id, value)
    }

    fn write_value(&self, sql: &str, id: i64, value: &FieldValue) -> Result<bool, CatalogError> {
        let changed = self.with_conn(|conn| {
            Ok(match value {
                FieldValue::Text(text) => conn.execute(sql, params![text, id])?,
                FieldValue::Score(score) => conn.execute(sql, params![score, id])?,
            })
        })?;
        Ok(changed > 0)
    }

    /// Inserts imported artists, ignoring any whose `external_id` is
    /// already present.
    ///
    /// Returns the number of rows actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if any insert fails.
    pub fn insert_artists(&self, artists: &[NewArtist]) -> Result<u64, CatalogError> {
        if artists.is_empty() {
            return Ok(0);
        }

        let inserted = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO artists (name, genre, location, profile_picture, external_id)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT (external_id) DO NOTHING",
            )?;

            let mut inserted = 0u64;
            for artist in artists {
                let rows = stmt.execute(params![
                    artist.name,
                    artist.genre,
                    artist.location,
                    artist.profile_picture,
                    artist.external_id,
                ])?;
                inserted += u64::try_from(rows).unwrap_or(0);
            }
            Ok(inserted)
        })?;

        log::debug!("Inserted {inserted}/{} imported artists", artists.len());
        Ok(inserted)
    }
}

/// Opens `path`, waiting while another process holds the file lock.
fn connect(path: &Path) -> Result<Connection, CatalogError> {
    let mut attempt = 1;
    loop {
        match Connection::open(path) {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < LOCK_ATTEMPTS && is_lock_conflict(&e) => {
                log::debug!(
                    "{} is locked (attempt {attempt}/{LOCK_ATTEMPTS}), waiting",
                    path.display()
                );
                attempt += 1;
                pause_before_retry(LOCK_RETRY_DELAY);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Waits `delay` without stalling the other tasks of a multi-threaded
/// tokio runtime: the calling worker hands them off while it waits.
///
/// A current-thread runtime cannot hand its tasks off, so there (and
/// outside any runtime) the calling thread simply sleeps.
fn pause_before_retry(delay: Duration) {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(tokio::time::sleep(delay)));
        }
        _ => std::thread::sleep(delay),
    }
}

fn is_lock_conflict(error: &duckdb::Error) -> bool {
    error.to_string().to_ascii_lowercase().contains("lock")
}

fn create_schema(conn: &Connection) -> Result<(), CatalogError> {
    conn.execute_batch(
        "CREATE SEQUENCE IF NOT EXISTS artist_id_seq START 1;

        CREATE TABLE IF NOT EXISTS artists (
            id BIGINT PRIMARY KEY DEFAULT nextval('artist_id_seq'),
            name TEXT NOT NULL,
            genre TEXT,
            profile_picture TEXT,
            location TEXT NOT NULL DEFAULT 'Unknown',
            popularity INTEGER NOT NULL DEFAULT 0,
            external_id TEXT UNIQUE
        );",
    )?;
    Ok(())
}

fn read_row(row: &duckdb::Row<'_>) -> duckdb::Result<ArtistRow> {
    Ok(ArtistRow {
        id: row.get(0)?,
        name: row.get(1)?,
        genre: row.get(2)?,
        profile_picture: row.get(3)?,
        location: row.get(4)?,
        popularity: row.get(5)?,
        external_id: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use star_seeker_catalog_models::{UNKNOWN_GENRE, placeholder_image};

    fn new_artist(name: &str, external_id: &str) -> NewArtist {
        NewArtist {
            name: name.to_string(),
            genre: UNKNOWN_GENRE.to_string(),
            location: "Unknown".to_string(),
            profile_picture: placeholder_image(external_id),
            external_id: external_id.to_string(),
        }
    }

    fn seeded(n: usize) -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        let artists: Vec<NewArtist> = (0..n)
            .map(|i| new_artist(&format!("Artist {i}"), &format!("mbid-{i}")))
            .collect();
        catalog.insert_artists(&artists).unwrap();
        catalog
    }

    #[test]
    fn fetch_chunk_is_ordered_and_respects_cursor() {
        let catalog = seeded(10);
        let first = catalog
            .fetch_chunk(EnrichmentField::Genre, 0, None, 4)
            .unwrap();
        assert_eq!(first.iter().map(|t| t.id).collect::<Vec<_>>(), [1, 2, 3, 4]);

        let next = catalog
            .fetch_chunk(EnrichmentField::Genre, 4, None, 4)
            .unwrap();
        assert_eq!(next.iter().map(|t| t.id).collect::<Vec<_>>(), [5, 6, 7, 8]);

        let bounded = catalog
            .fetch_chunk(EnrichmentField::Genre, 8, Some(10), 4)
            .unwrap();
        assert_eq!(bounded.iter().map(|t| t.id).collect::<Vec<_>>(), [9]);
    }

    #[test]
    fn fetch_chunk_skips_rows_that_have_the_attribute() {
        let catalog = seeded(3);
        catalog
            .force_update(2, EnrichmentField::Genre, &FieldValue::Text("Jazz".into()))
            .unwrap();

        let chunk = catalog
            .fetch_chunk(EnrichmentField::Genre, 0, None, 10)
            .unwrap();
        assert_eq!(chunk.iter().map(|t| t.id).collect::<Vec<_>>(), [1, 3]);
        assert_eq!(catalog.count_pending(EnrichmentField::Genre, 0, None).unwrap(), 2);
    }

    #[test]
    fn conditional_update_is_idempotent() {
        let catalog = seeded(1);
        let value = FieldValue::Text("Trip Hop".into());

        assert!(catalog.update_if_needed(1, EnrichmentField::Genre, &value).unwrap());
        assert!(!catalog
            .update_if_needed(1, EnrichmentField::Genre, &FieldValue::Text("Other".into()))
            .unwrap());

        let row = catalog.get(1).unwrap().unwrap();
        assert_eq!(row.genre.as_deref(), Some("Trip Hop"));
    }

    #[test]
    fn popularity_update_and_image_predicate() {
        let catalog = seeded(2);
        assert!(catalog
            .update_if_needed(1, EnrichmentField::Popularity, &FieldValue::Score(63))
            .unwrap());
        assert_eq!(catalog.get(1).unwrap().unwrap().popularity, 63);
        assert_eq!(
            catalog.count_pending(EnrichmentField::Popularity, 0, None).unwrap(),
            1
        );

        // Placeholder images count as missing.
        assert_eq!(catalog.count_pending(EnrichmentField::Image, 0, None).unwrap(), 2);
        catalog
            .update_if_needed(
                2,
                EnrichmentField::Image,
                &FieldValue::Text("https://i.scdn.co/image/x".into()),
            )
            .unwrap();
        assert_eq!(catalog.count_pending(EnrichmentField::Image, 0, None).unwrap(), 1);
    }

    #[test]
    fn insert_ignores_duplicate_external_ids() {
        let catalog = seeded(2);
        let inserted = catalog
            .insert_artists(&[new_artist("Again", "mbid-0"), new_artist("New", "mbid-9")])
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(catalog.count_pending(EnrichmentField::Genre, 0, None).unwrap(), 3);
    }

    #[test]
    fn file_catalog_persists_between_handles() {
        let dir = std::env::temp_dir().join(format!(
            "star_seeker_catalog_{}",
            std::process::id()
        ));
        let path = dir.join("catalog.duckdb");

        let first = Catalog::open(&path).unwrap();
        first
            .insert_artists(&[new_artist("Kept", "mbid-kept")])
            .unwrap();
        let second = Catalog::open(&path).unwrap();
        second
            .update_if_needed(1, EnrichmentField::Popularity, &FieldValue::Score(12))
            .unwrap();

        let row = first.get(1).unwrap().unwrap();
        assert_eq!(row.name, "Kept");
        assert_eq!(row.popularity, 12);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn lock_wait_lets_other_tasks_run() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (ping_tx, ping_rx) = std::sync::mpsc::channel();
        let waiter = tokio::spawn(async move {
            started_tx.send(()).unwrap();
            pause_before_retry(Duration::from_millis(300));
            ping_rx.try_recv().is_ok()
        });

        started_rx.await.unwrap();
        tokio::spawn(async move { ping_tx.send(()).unwrap() });

        // The only worker is waiting, yet the ping still got through.
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn lock_wait_outside_a_runtime_sleeps() {
        let started = std::time::Instant::now();
        pause_before_retry(Duration::from_millis(50));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn missing_row_is_none() {
        let catalog = seeded(0);
        assert!(catalog.get(42).unwrap().is_none());
        assert_eq!(catalog.max_id().unwrap(), None);
    }
}
