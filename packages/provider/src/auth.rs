//! Bearer credential caching.
//!
//! A [`CredentialCache`] holds at most one credential. Callers go through
//! [`CredentialCache::get_or_refresh`], which re-mints the credential when
//! it is missing or expires within [`REFRESH_MARGIN`]. The cache lock is
//! held while minting, so concurrent workers never mint twice.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ProviderError;

/// Credentials are refreshed this long before they actually expire.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// An access token together with its expiry instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerCredential {
    /// Opaque access token.
    pub token: String,
    /// Instant after which the token is rejected.
    pub expires_at: Instant,
}

impl BearerCredential {
    /// Creates a credential expiring `expires_in` from now.
    #[must_use]
    pub fn new(token: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            token: token.into(),
            expires_at: Instant::now() + expires_in,
        }
    }

    /// Returns `true` if the credential stays valid past the refresh margin.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.expires_at > Instant::now() + REFRESH_MARGIN
    }
}

/// Single-slot cache of a [`BearerCredential`].
#[derive(Debug, Default)]
pub struct CredentialCache {
    current: Mutex<Option<BearerCredential>>,
}

impl CredentialCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh token, calling `mint` if the cached one is missing
    /// or about to expire.
    ///
    /// # Errors
    ///
    /// Returns whatever error `mint` returns. The cache is left empty in
    /// that case.
    pub async fn get_or_refresh<F, Fut>(&self, mint: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<BearerCredential, ProviderError>> + Send,
    {
        let mut current = self.current.lock().await;

        if let Some(credential) = current.as_ref()
            && credential.is_fresh()
        {
            return Ok(credential.token.clone());
        }

        *current = None;
        let credential = mint().await?;
        log::debug!(
            "Minted bearer credential, valid for {:?}",
            credential.expires_at.saturating_duration_since(Instant::now())
        );
        let token = credential.token.clone();
        *current = Some(credential);
        Ok(token)
    }

    /// Drops the cached credential so the next call re-mints it.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }
}
