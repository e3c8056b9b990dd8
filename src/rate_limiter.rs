//! Per-client admission counter over a trailing time window
//!
//! Best-effort and process-local: nothing survives a restart and separate
//! processes do not share windows.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub struct RateLimiter {
    limit: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `client_key` if it is still under the limit.
    ///
    /// Returns `false` without recording anything once `limit` requests fall
    /// inside the trailing window.
    pub fn can_make_request(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let timestamps = windows.entry(client_key.to_string()).or_default();

        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() < self.limit {
            timestamps.push_back(now);
            true
        } else {
            log::debug!(
                "Rate limit hit for {} ({} requests in {}ms)",
                client_key,
                timestamps.len(),
                self.window.as_millis()
            );
            false
        }
    }

    /// Requests still available to `client_key` in the current window
    pub fn remaining(&self, client_key: &str) -> usize {
        let now = Instant::now();
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let used = windows
            .get(client_key)
            .map(|ts| {
                ts.iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .count()
            })
            .unwrap_or(0);
        self.limit.saturating_sub(used)
    }

    /// Forget clients whose windows have fully drained
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, ts| {
            ts.back()
                .map(|last| now.duration_since(*last) < self.window)
                .unwrap_or(false)
        });
        before - windows.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn test_thirty_per_minute() {
        let limiter = RateLimiter::new(30, Duration::from_millis(60_000));

        for i in 0..30 {
            assert!(limiter.can_make_request("1.2.3.4"), "request {} should pass", i + 1);
        }
        assert!(!limiter.can_make_request("1.2.3.4"));

        advance(Duration::from_millis(60_001)).await;
        assert!(limiter.can_make_request("1.2.3.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_from_first_request() {
        let limiter = RateLimiter::new(2, Duration::from_secs(10));

        assert!(limiter.can_make_request("k"));
        advance(Duration::from_secs(4)).await;
        assert!(limiter.can_make_request("k"));
        assert!(!limiter.can_make_request("k"));

        // Exactly one window after the first request: that slot is free again
        advance(Duration::from_secs(6)).await;
        assert!(limiter.can_make_request("k"));
        assert!(!limiter.can_make_request("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.can_make_request("a"));
        assert!(!limiter.can_make_request("a"));
        assert!(limiter.can_make_request("b"));
        assert_eq!(limiter.remaining("a"), 0);
        assert_eq!(limiter.remaining("c"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        limiter.can_make_request("a");
        limiter.can_make_request("b");
        advance(Duration::from_secs(2)).await;
        limiter.can_make_request("c");

        assert_eq!(limiter.prune_idle(), 2);
    }
}
