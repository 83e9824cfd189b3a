#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Clients for the external services that supply artist attributes.
//!
//! Two providers are configured via TOML files in `services/`:
//!
//! 1. **Spotify Web API**: client-credentials bearer auth, returns
//!    genres, popularity and images directly in search results.
//! 2. **MusicBrainz**: no auth, strict 1 req/sec, search results carry
//!    only IDs so genres require a second by-ID lookup. Also serves the
//!    paginated artist listing used by the name import.
//!
//! Every outgoing call goes through a shared [`rate_limit::RateLimiter`]
//! and the bounded 429 retry loop in [`retry`].

pub mod auth;
pub mod musicbrainz;
pub mod rate_limit;
pub mod retry;
pub mod service_registry;
pub mod spotify;

#[cfg(any(test, feature = "test-server"))]
pub mod test_server;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from external service calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status other than 429.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// Still rate limited after the allowed retries.
    #[error("Rate limited by remote service (retry after {retry_after:?})")]
    Throttled {
        /// Delay the service asked for on the last attempt.
        retry_after: Duration,
    },

    /// The requested record does not exist.
    #[error("Not found: {id}")]
    NotFound {
        /// ID that was looked up.
        id: String,
    },

    /// Obtaining a bearer credential failed.
    #[error("Authentication failed: {message}")]
    Auth {
        /// Description of the failure.
        message: String,
    },

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// A required credential environment variable is not set.
    #[error("Missing credentials: {var} is not set")]
    MissingCredentials {
        /// Name of the environment variable.
        var: String,
    },
}

impl ProviderError {
    /// Returns `true` for server-side (5xx) or transport failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// An attribute group that a provider record may or may not include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordField {
    /// Genre names.
    Genres,
    /// Profile images.
    Images,
    /// Popularity score.
    Popularity,
}

/// One profile image of an artist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistImage {
    /// Image URL.
    pub url: String,
    /// Width in pixels, if reported.
    pub width: Option<u32>,
    /// Height in pixels, if reported.
    pub height: Option<u32>,
}

/// An artist as returned by an external service.
///
/// `None` fields were not included in the response (as opposed to being
/// empty), which tells the caller a by-ID lookup is still needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtistRecord {
    /// Provider-specific artist ID.
    pub id: String,
    /// Name as known by the provider.
    pub name: String,
    /// Country or area code.
    pub country: Option<String>,
    /// Genre names, most relevant first.
    pub genres: Option<Vec<String>>,
    /// Popularity score (0-100).
    pub popularity: Option<u8>,
    /// Available profile images.
    pub images: Option<Vec<ArtistImage>>,
}

impl ArtistRecord {
    /// Returns `true` if this record carries `field`.
    #[must_use]
    pub const fn has(&self, field: RecordField) -> bool {
        match field {
            RecordField::Genres => self.genres.is_some(),
            RecordField::Images => self.images.is_some(),
            RecordField::Popularity => self.popularity.is_some(),
        }
    }
}

/// A service that can resolve artist names to records.
///
/// Implementations must be `Send + Sync`: a single client is shared by
/// every worker of a run.
#[async_trait]
pub trait ArtistProvider: Send + Sync {
    /// Short identifier (matches the service registry ID).
    fn id(&self) -> &str;

    /// Ensures a valid credential is cached. Providers without auth
    /// succeed immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if a credential cannot be obtained.
    async fn authenticate(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Returns the single best match for `name`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, status or parse failures.
    async fn search_by_name(&self, name: &str) -> Result<Option<ArtistRecord>, ProviderError>;

    /// Fetches the full record for `id`, including `fields`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if the ID does not exist, or
    /// any other [`ProviderError`] on failure.
    async fn fetch_by_id(
        &self,
        id: &str,
        fields: &[RecordField],
    ) -> Result<ArtistRecord, ProviderError>;
}

/// One page of a registry's artist listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtistPage {
    /// Total number of artists the listing reports.
    pub total: u64,
    /// Artists on this page, in listing order.
    pub artists: Vec<ArtistRecord>,
}

/// A registry that can enumerate its artists page by page.
#[async_trait]
pub trait ArtistDirectory: Send + Sync {
    /// Returns up to `limit` artists starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, status or parse failures.
    async fn list_artists(&self, offset: u64, limit: u32) -> Result<ArtistPage, ProviderError>;
}

/// Maximum length of an error body included in [`ProviderError::Status`].
const ERROR_PREVIEW_LEN: usize = 200;

/// Extracts a human-readable message from an error response body.
///
/// Understands both `{"error": {"message": "..."}}` and
/// `{"error": "..."}` shapes, falling back to a truncated body preview.
#[must_use]
pub fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let error = &value["error"];
        if let Some(msg) = error["message"].as_str() {
            return msg.to_string();
        }
        if let Some(msg) = error.as_str() {
            return msg.to_string();
        }
    }
    body.chars().take(ERROR_PREVIEW_LEN).collect()
}

/// Appends `segments` to `base`, percent-encoding each one so a `/`,
/// `?` or space inside a segment stays part of it.
///
/// # Errors
///
/// * [`ProviderError::Parse`] if `base` is not an absolute URL that can
///   carry a path.
pub fn resource_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, ProviderError> {
    let mut url = reqwest::Url::parse(base).map_err(|e| ProviderError::Parse {
        message: format!("invalid base URL '{base}': {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|()| ProviderError::Parse {
            message: format!("base URL '{base}' cannot take a path"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
