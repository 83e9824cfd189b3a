//! Rate-limited HTTP sending with bounded retry on throttling.
//!
//! Provider clients should use [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly. Every attempt waits for the
//! service's [`RateLimiter`] first. An HTTP 429 response is retried after
//! the server-supplied `Retry-After` delay, at most
//! [`RetryPolicy::max_retries`] times, before surfacing
//! [`ProviderError::Throttled`]. Every other failure is returned to the
//! caller untouched.
//!
//! # Usage
//!
//! ```ignore
//! let body: SearchResponse =
//!     retry::send_json(&limiter, &policy, || client.get(&url).query(&params)).await?;
//! ```

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;

use crate::ProviderError;
use crate::rate_limit::RateLimiter;

/// Bounded retry settings for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How many times a throttled call is repeated.
    pub max_retries: u32,
    /// Delay used when a 429 response carries no usable `Retry-After`.
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            default_retry_after: Duration::from_secs(1),
        }
    }
}

/// Sends a request and returns the successful response.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`).
///
/// # Errors
///
/// * [`ProviderError::Throttled`] if the service still answers 429 after
///   `policy.max_retries` retries.
/// * [`ProviderError::Status`] for any other non-success status.
/// * [`ProviderError::Http`] for transport failures.
#[allow(clippy::future_not_send)]
pub async fn send<F>(
    limiter: &RateLimiter,
    policy: &RetryPolicy,
    build_request: F,
) -> Result<reqwest::Response, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;

    loop {
        limiter.acquire().await;
        let response = build_request().send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after =
                parse_retry_after(response.headers()).unwrap_or(policy.default_retry_after);
            if attempt >= policy.max_retries {
                log::warn!(
                    "  HTTP 429 from {} after {attempt} retries, giving up",
                    response.url()
                );
                return Err(ProviderError::Throttled { retry_after });
            }
            attempt += 1;
            log::warn!(
                "  HTTP 429 (rate limited), retry {attempt}/{} in {retry_after:?}...",
                policy.max_retries
            );
            tokio::time::sleep(retry_after).await;
            continue;
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message: crate::error_message(&body),
            });
        }

        return Ok(response);
    }
}

/// Sends a request and parses the successful response body as JSON.
///
/// # Errors
///
/// Returns the errors of [`send`], plus [`ProviderError::Parse`] if the
/// body does not match `T`.
#[allow(clippy::future_not_send)]
pub async fn send_json<T, F>(
    limiter: &RateLimiter,
    policy: &RetryPolicy,
    build_request: F,
) -> Result<T, ProviderError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send(limiter, policy, build_request).await?;
    let url = response.url().to_string();
    let text = response.text().await?;

    serde_json::from_str(&text).map_err(|e| ProviderError::Parse {
        message: format!("{url}: {e}"),
    })
}

/// Reads a `Retry-After` header given in whole seconds.
///
/// HTTP-date values are not used by the supported services and are
/// treated as absent.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
