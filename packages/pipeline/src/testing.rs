//! In-process provider and catalog fixtures shared by the pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use star_seeker_catalog::Catalog;
use star_seeker_catalog_models::{NewArtist, UNKNOWN_GENRE, placeholder_image};
use star_seeker_provider::{
    ArtistDirectory, ArtistImage, ArtistPage, ArtistProvider, ArtistRecord, ProviderError,
    RecordField,
};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct FakeProvider {
    artists: HashMap<String, ArtistRecord>,
    details: HashMap<String, ArtistRecord>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    cancel_on: Option<(String, CancellationToken)>,
    calls: AtomicUsize,
    searched: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn with_artist(mut self, name: &str, record: ArtistRecord) -> Self {
        self.artists.insert(name.to_string(), record);
        self
    }

    /// Registers `name` with genres, popularity and images all present.
    pub fn with_full_artist(self, name: &str) -> Self {
        let record = ArtistRecord {
            id: format!("sp-{name}"),
            name: name.to_string(),
            country: None,
            genres: Some(vec![format!("{name} core")]),
            popularity: Some(50),
            images: Some(vec![ArtistImage {
                url: format!("https://img.example/{name}"),
                width: Some(640),
                height: Some(640),
            }]),
        };
        self.with_artist(name, record)
    }

    pub fn with_detail(mut self, record: ArtistRecord) -> Self {
        self.details.insert(record.id.clone(), record);
        self
    }

    pub fn failing_for(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn panicking_on(mut self, name: &str) -> Self {
        self.panicking.insert(name.to_string());
        self
    }

    pub fn cancelling_on(mut self, name: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((name.to_string(), token));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn searched(&self) -> Vec<String> {
        self.searched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtistProvider for FakeProvider {
    fn id(&self) -> &str {
        "fake"
    }

    async fn search_by_name(&self, name: &str) -> Result<Option<ArtistRecord>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.searched.lock().unwrap().push(name.to_string());

        assert!(!self.panicking.contains(name), "provider blew up on {name}");
        if let Some((trigger, token)) = &self.cancel_on
            && trigger == name
        {
            token.cancel();
        }
        if self.failing.contains(name) {
            return Err(ProviderError::Status {
                status: 503,
                message: "Service unavailable".to_string(),
            });
        }
        Ok(self.artists.get(name).cloned())
    }

    async fn fetch_by_id(
        &self,
        id: &str,
        _fields: &[RecordField],
    ) -> Result<ArtistRecord, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound { id: id.to_string() })
    }
}

/// Listing of `total` registry artists named `Artist {n}` with IDs `mb-{n}`.
pub struct FakeDirectory {
    pub total: u64,
    pub fail_at: HashSet<u64>,
    pub calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            fail_at: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtistDirectory for FakeDirectory {
    async fn list_artists(&self, offset: u64, limit: u32) -> Result<ArtistPage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at.contains(&offset) {
            return Err(ProviderError::Status {
                status: 502,
                message: "Bad gateway".to_string(),
            });
        }
        let end = (offset + u64::from(limit)).min(self.total);
        Ok(ArtistPage {
            total: self.total,
            artists: (offset..end)
                .map(|n| ArtistRecord {
                    id: format!("mb-{n}"),
                    name: format!("Artist {n}"),
                    country: (n % 2 == 0).then(|| "SE".to_string()),
                    ..ArtistRecord::default()
                })
                .collect(),
        })
    }
}

/// In-memory catalog with one placeholder row per name, IDs `1..=n`.
pub fn seeded_catalog(names: &[&str]) -> Catalog {
    let catalog = Catalog::open_in_memory().unwrap();
    let rows: Vec<NewArtist> = names
        .iter()
        .map(|name| NewArtist {
            name: (*name).to_string(),
            genre: UNKNOWN_GENRE.to_string(),
            location: "Unknown".to_string(),
            profile_picture: placeholder_image(name),
            external_id: format!("ext-{name}"),
        })
        .collect();
    catalog.insert_artists(&rows).unwrap();
    catalog
}
