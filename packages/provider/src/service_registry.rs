//! Compile-time registry of external service configurations.
//!
//! Each provider is defined in a TOML file under `services/`. The
//! registry embeds these at compile time and exposes them via
//! [`all_services`] and [`service`].

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// An external service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Unique identifier (e.g., `"spotify"`, `"musicbrainz"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Request budget shared by every worker of one process.
    pub requests_per_second: f64,
    /// Retries allowed after an HTTP 429 response.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Wait used when a 429 response has no `Retry-After` header.
    #[serde(default = "default_retry_after_secs")]
    pub default_retry_after_secs: u64,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Spotify Web API.
    Spotify(SpotifyConfig),
    /// `MusicBrainz` web service.
    #[serde(rename = "musicbrainz")]
    MusicBrainz(MusicBrainzConfig),
}

/// Settings for the Spotify Web API client.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyConfig {
    /// API base URL (e.g., `"https://api.spotify.com/v1"`).
    pub api_base_url: String,
    /// Client-credentials token endpoint.
    pub auth_url: String,
    /// Number of search results requested per lookup.
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
}

/// Settings for the `MusicBrainz` client.
#[derive(Debug, Clone, Deserialize)]
pub struct MusicBrainzConfig {
    /// API base URL (e.g., `"https://musicbrainz.org/ws/2"`).
    pub api_base_url: String,
    /// `User-Agent` header; `MusicBrainz` rejects anonymous clients.
    pub user_agent: String,
}

const fn default_max_retries() -> u32 {
    1
}

const fn default_retry_after_secs() -> u64 {
    1
}

const fn default_search_limit() -> u32 {
    1
}

impl ServiceConfig {
    /// Returns the provider's API base URL regardless of variant.
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::Spotify(c) => &c.api_base_url,
            ProviderConfig::MusicBrainz(c) => &c.api_base_url,
        }
    }

    /// Returns the bounded 429 retry policy for this service.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            default_retry_after: Duration::from_secs(self.default_retry_after_secs),
        }
    }

    /// Builds the limiter shared by all workers of this process.
    ///
    /// `override_rps` replaces the configured budget when given (the
    /// `--rate-limit` flag).
    #[must_use]
    pub fn rate_limiter(&self, override_rps: Option<f64>) -> Arc<RateLimiter> {
        let rps = override_rps.unwrap_or(self.requests_per_second);
        log::info!("{}: limiting to {rps} requests/second", self.name);
        Arc::new(RateLimiter::new(rps))
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("spotify", include_str!("../services/spotify.toml")),
    ("musicbrainz", include_str!("../services/musicbrainz.toml")),
];

#[cfg(test)]
const EXPECTED_SERVICE_COUNT: usize = 2;

/// Returns all service configurations.
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<ServiceConfig> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse service '{name}': {e}"))
        })
        .collect()
}

/// Returns the service with the given ID, if registered.
#[must_use]
pub fn service(id: &str) -> Option<ServiceConfig> {
    all_services().into_iter().find(|s| s.id == id)
}
