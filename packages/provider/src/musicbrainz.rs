//! `MusicBrainz` web service client.
//!
//! No authentication, but every request must carry a descriptive
//! `User-Agent` and the service allows one request per second. Search
//! results do not include genres, so genre enrichment always needs a
//! second `inc=genres` lookup by MBID.
//!
//! API documentation: <https://musicbrainz.org/doc/MusicBrainz_API>

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::rate_limit::RateLimiter;
use crate::retry::{self, RetryPolicy};
use crate::service_registry::{self, MusicBrainzConfig, ProviderConfig};
use crate::{
    ArtistDirectory, ArtistPage, ArtistProvider, ArtistRecord, ProviderError, RecordField,
    resource_url,
};

/// Registry ID of this service.
pub const SERVICE_ID: &str = "musicbrainz";

/// Largest page size the listing endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Client for the `MusicBrainz` web service.
pub struct MusicBrainzClient {
    http: reqwest::Client,
    api_base_url: String,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl MusicBrainzClient {
    /// Creates a client from explicit settings.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Http`] if the HTTP client cannot be built.
    pub fn new(
        config: &MusicBrainzConfig,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            limiter,
            policy,
        })
    }

    /// Creates a client from the embedded service registry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Parse`] if the registry entry is missing or
    /// is not a `MusicBrainz` configuration.
    pub fn from_registry(rate_override: Option<f64>) -> Result<Self, ProviderError> {
        let service = service_registry::service(SERVICE_ID).ok_or_else(|| ProviderError::Parse {
            message: format!("service '{SERVICE_ID}' is not registered"),
        })?;
        let ProviderConfig::MusicBrainz(config) = &service.provider else {
            return Err(ProviderError::Parse {
                message: format!("service '{SERVICE_ID}' is not a MusicBrainz configuration"),
            });
        };

        Self::new(
            config,
            service.rate_limiter(rate_override),
            service.retry_policy(),
        )
    }

    async fn search(
        &self,
        query: &str,
        offset: u64,
        limit: u32,
    ) -> Result<SearchResponse, ProviderError> {
        let url = format!("{}/artist", self.api_base_url);
        let offset = offset.to_string();
        let limit = limit.to_string();

        retry::send_json(&self.limiter, &self.policy, || {
            self.http.get(&url).query(&[
                ("query", query),
                ("limit", limit.as_str()),
                ("offset", offset.as_str()),
                ("fmt", "json"),
            ])
        })
        .await
    }
}

#[async_trait]
impl ArtistProvider for MusicBrainzClient {
    fn id(&self) -> &str {
        SERVICE_ID
    }

    async fn search_by_name(&self, name: &str) -> Result<Option<ArtistRecord>, ProviderError> {
        let response = self.search(&artist_query(name), 0, 1).await?;
        Ok(response.artists.into_iter().next().map(ArtistRecord::from))
    }

    async fn fetch_by_id(
        &self,
        id: &str,
        fields: &[RecordField],
    ) -> Result<ArtistRecord, ProviderError> {
        let url = resource_url(&self.api_base_url, &["artist", id])?;
        let inc = if fields.contains(&RecordField::Genres) {
            "genres"
        } else {
            ""
        };

        let result: Result<MbArtist, _> = retry::send_json(&self.limiter, &self.policy, || {
            let request = self.http.get(url.clone()).query(&[("fmt", "json")]);
            if inc.is_empty() {
                request
            } else {
                request.query(&[("inc", inc)])
            }
        })
        .await;

        match result {
            Ok(artist) => {
                let mut record = ArtistRecord::from(artist.clone());
                if !inc.is_empty() {
                    record.genres = Some(
                        artist
                            .genres
                            .unwrap_or_default()
                            .into_iter()
                            .map(|g| g.name)
                            .collect(),
                    );
                }
                Ok(record)
            }
            Err(ProviderError::Status { status: 404, .. }) => {
                Err(ProviderError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ArtistDirectory for MusicBrainzClient {
    async fn list_artists(&self, offset: u64, limit: u32) -> Result<ArtistPage, ProviderError> {
        let response = self.search("*", offset, limit.clamp(1, MAX_PAGE_SIZE)).await?;
        Ok(ArtistPage {
            total: response.count,
            artists: response.artists.into_iter().map(ArtistRecord::from).collect(),
        })
    }
}

/// Builds a Lucene query matching the artist name as a phrase.
fn artist_query(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("artist:\"{escaped}\"")
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    artists: Vec<MbArtist>,
}

#[derive(Debug, Clone, Deserialize)]
struct MbArtist {
    id: String,
    name: String,
    country: Option<String>,
    genres: Option<Vec<MbGenre>>,
}

#[derive(Debug, Clone, Deserialize)]
struct MbGenre {
    name: String,
}

impl From<MbArtist> for ArtistRecord {
    fn from(artist: MbArtist) -> Self {
        Self {
            id: artist.id,
            name: artist.name,
            country: artist.country.filter(|c| !c.is_empty()),
            genres: None,
            popularity: None,
            images: None,
        }
    }
}
