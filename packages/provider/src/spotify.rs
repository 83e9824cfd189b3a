//! Spotify Web API client.
//!
//! Authenticates with the client-credentials flow and caches the bearer
//! token until shortly before it expires. Search results already carry
//! genres, popularity and images, so a by-ID lookup is rarely needed.
//!
//! API documentation: <https://developer.spotify.com/documentation/web-api>

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::auth::{BearerCredential, CredentialCache};
use crate::rate_limit::RateLimiter;
use crate::retry::{self, RetryPolicy};
use crate::service_registry::{self, ProviderConfig, SpotifyConfig};
use crate::{
    ArtistImage, ArtistProvider, ArtistRecord, ProviderError, RecordField, resource_url,
};

/// Environment variable holding the Spotify client ID.
pub const CLIENT_ID_VAR: &str = "SPOTIFY_CLIENT_ID";

/// Environment variable holding the Spotify client secret.
pub const CLIENT_SECRET_VAR: &str = "SPOTIFY_CLIENT_SECRET";

/// Registry ID of this service.
pub const SERVICE_ID: &str = "spotify";

/// Application credentials for the client-credentials flow.
#[derive(Clone)]
pub struct ClientCredentials {
    /// Application client ID.
    pub client_id: String,
    /// Application client secret.
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl ClientCredentials {
    /// Reads the credentials from `SPOTIFY_CLIENT_ID` and
    /// `SPOTIFY_CLIENT_SECRET`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingCredentials`] naming the first
    /// variable that is unset or empty.
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self {
            client_id: required_var(CLIENT_ID_VAR)?,
            client_secret: required_var(CLIENT_SECRET_VAR)?,
        })
    }
}

fn required_var(var: &str) -> Result<String, ProviderError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ProviderError::MissingCredentials {
            var: var.to_string(),
        })
}

/// Client for the Spotify Web API.
pub struct SpotifyClient {
    http: reqwest::Client,
    config: SpotifyConfig,
    credentials: ClientCredentials,
    token: CredentialCache,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl SpotifyClient {
    /// Creates a client from explicit settings.
    #[must_use]
    pub fn new(
        config: SpotifyConfig,
        credentials: ClientCredentials,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            credentials,
            token: CredentialCache::new(),
            limiter,
            policy,
        }
    }

    /// Creates a client from the embedded service registry and the
    /// credential environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingCredentials`] if the credentials are
    /// not set, or [`ProviderError::Parse`] if the registry entry is not a
    /// Spotify configuration.
    pub fn from_registry(rate_override: Option<f64>) -> Result<Self, ProviderError> {
        let service = service_registry::service(SERVICE_ID).ok_or_else(|| ProviderError::Parse {
            message: format!("service '{SERVICE_ID}' is not registered"),
        })?;
        let ProviderConfig::Spotify(config) = service.provider.clone() else {
            return Err(ProviderError::Parse {
                message: format!("service '{SERVICE_ID}' is not a Spotify configuration"),
            });
        };

        Ok(Self::new(
            config,
            ClientCredentials::from_env()?,
            service.rate_limiter(rate_override),
            service.retry_policy(),
        ))
    }

    async fn mint_token(&self) -> Result<BearerCredential, ProviderError> {
        log::info!("Requesting Spotify access token");
        let response: TokenResponse = retry::send_json(&self.limiter, &self.policy, || {
            self.http
                .post(&self.config.auth_url)
                .basic_auth(
                    &self.credentials.client_id,
                    Some(&self.credentials.client_secret),
                )
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body("grant_type=client_credentials")
        })
        .await
        .map_err(|e| match e {
            ProviderError::Status { status, message } => ProviderError::Auth {
                message: format!("token endpoint returned {status}: {message}"),
            },
            other => other,
        })?;

        Ok(BearerCredential::new(
            response.access_token,
            Duration::from_secs(response.expires_in),
        ))
    }

    async fn bearer_token(&self) -> Result<String, ProviderError> {
        self.token.get_or_refresh(|| self.mint_token()).await
    }

    /// Issues an authenticated GET and parses the JSON body.
    ///
    /// A 401 drops the cached token so the next call re-authenticates.
    async fn get_json<T>(&self, url: &str, query: &[(&str, &str)]) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
    {
        let token = self.bearer_token().await?;
        let result = retry::send_json(&self.limiter, &self.policy, || {
            self.http.get(url).query(query).bearer_auth(&token)
        })
        .await;

        if let Err(ProviderError::Status {
            status: 401,
            message,
        }) = &result
        {
            log::warn!("Spotify rejected the access token ({message}), re-authenticating");
            self.token.invalidate().await;
            return Err(ProviderError::Auth {
                message: message.clone(),
            });
        }
        result
    }
}

#[async_trait]
impl ArtistProvider for SpotifyClient {
    fn id(&self) -> &str {
        SERVICE_ID
    }

    async fn authenticate(&self) -> Result<(), ProviderError> {
        self.bearer_token().await.map(|_| ())
    }

    async fn search_by_name(&self, name: &str) -> Result<Option<ArtistRecord>, ProviderError> {
        let url = format!("{}/search", self.config.api_base_url);
        let limit = self.config.search_limit.max(1).to_string();
        let response: SearchResponse = self
            .get_json(&url, &[("q", name), ("type", "artist"), ("limit", &limit)])
            .await?;

        Ok(response
            .artists
            .items
            .into_iter()
            .next()
            .map(ArtistRecord::from))
    }

    async fn fetch_by_id(
        &self,
        id: &str,
        _fields: &[RecordField],
    ) -> Result<ArtistRecord, ProviderError> {
        let url = resource_url(&self.config.api_base_url, &["artists", id])?;
        match self.get_json::<SpotifyArtist>(url.as_str(), &[]).await {
            Ok(artist) => Ok(artist.into()),
            Err(ProviderError::Status { status: 404, .. }) => {
                Err(ProviderError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(e),
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

const fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    artists: SearchPage,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<SpotifyArtist>,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    id: String,
    name: String,
    genres: Option<Vec<String>>,
    popularity: Option<u8>,
    images: Option<Vec<SpotifyImage>>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

impl From<SpotifyArtist> for ArtistRecord {
    fn from(artist: SpotifyArtist) -> Self {
        Self {
            id: artist.id,
            name: artist.name,
            country: None,
            genres: artist.genres,
            popularity: artist.popularity,
            images: artist.images.map(|images| {
                images
                    .into_iter()
                    .map(|i| ArtistImage {
                        url: i.url,
                        width: i.width,
                        height: i.height,
                    })
                    .collect()
            }),
        }
    }
}
