//! Process-wide request pacing.
//!
//! One [`RateLimiter`] is shared (via `Arc`) by every worker that talks to
//! a given service. Each call to [`RateLimiter::acquire`] reserves the next
//! free slot under a mutex and then sleeps until that slot, so slots are
//! handed out in order and never closer together than the configured
//! interval, no matter how many workers are waiting.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces outbound requests at least `1 / requests_per_second` apart.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter allowing at most `requests_per_second` calls per
    /// second. A non-positive rate disables pacing.
    #[must_use]
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 && requests_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self::with_interval(min_interval)
    }

    /// Creates a limiter with an explicit minimum spacing.
    #[must_use]
    pub const fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::const_new(None),
        }
    }

    /// Minimum spacing between two consecutive calls.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the caller may issue its next request.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |reserved| reserved.max(now));
            *next = Some(slot + self.min_interval);
            slot
        };

        if slot > Instant::now() {
            tokio::time::sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_spaced_by_interval() {
        let limiter = Arc::new(RateLimiter::new(4.0));
        let interval = limiter.min_interval();
        assert_eq!(interval, Duration::from_millis(250));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= interval, "calls spaced {:?}", pair[1] - pair[0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_limiter_does_not_delay() {
        let limiter = RateLimiter::new(1.0);
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let before = Instant::now();
        limiter.acquire().await;
        assert!(Instant::now() - before < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn zero_rate_disables_pacing() {
        let limiter = RateLimiter::new(0.0);
        assert!(limiter.min_interval().is_zero());
        for _ in 0..100 {
            limiter.acquire().await;
        }
    }
}
