//! Per-user abuse guard for generation requests.
//!
//! A sliding-window counter keyed by user id (or the anonymous session
//! key), injected behind a trait so multi-instance deployments can swap in
//! an externally-backed implementation.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::error::{AppError, AppResult};

/// Key used when a request carries no user identity.
pub const ANONYMOUS_KEY: &str = "anonymous";

/// Rate limiter service interface.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record an attempt for `key`, rejecting it once the quota for the
    /// current window is exhausted.
    async fn check(&self, key: &str) -> AppResult<()>;

    /// Requests left in the current window for `key`.
    async fn remaining(&self, key: &str) -> u32;
}

/// In-process sliding-window rate limiter.
pub struct SlidingWindowLimiter {
    max_requests: u32,
    window: Duration,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter from configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            requests: Mutex::new(HashMap::new()),
        }
    }

    fn prune(window: Duration, now: Instant, timestamps: &mut VecDeque<Instant>) {
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check(&self, key: &str) -> AppResult<()> {
        let now = Instant::now();
        let mut requests = self.requests.lock().await;
        let timestamps = requests.entry(key.to_string()).or_default();

        Self::prune(self.window, now, timestamps);

        if timestamps.len() >= self.max_requests as usize {
            let retry_after = timestamps
                .front()
                .map(|oldest| {
                    self.window
                        .saturating_sub(now.duration_since(*oldest))
                        .as_secs()
                        .max(1)
                })
                .unwrap_or(1);
            return Err(AppError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        timestamps.push_back(now);
        Ok(())
    }

    async fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        let mut requests = self.requests.lock().await;
        let timestamps = requests.entry(key.to_string()).or_default();

        Self::prune(self.window, now, timestamps);

        self.max_requests.saturating_sub(timestamps.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_secs: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(RateLimitConfig {
            max_requests,
            window_secs,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion() {
        let limiter = limiter(3, 60);

        for _ in 0..3 {
            limiter.check("user-1").await.unwrap();
        }

        let err = limiter.check("user-1").await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, 60);

        limiter.check("user-1").await.unwrap();
        limiter.check("user-2").await.unwrap();
        assert!(limiter.check("user-1").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_admits_again() {
        let limiter = limiter(1, 60);

        limiter.check(ANONYMOUS_KEY).await.unwrap();
        assert!(limiter.check(ANONYMOUS_KEY).await.is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check(ANONYMOUS_KEY).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let limiter = limiter(3, 60);

        assert_eq!(limiter.remaining("user-1").await, 3);
        limiter.check("user-1").await.unwrap();
        assert_eq!(limiter.remaining("user-1").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_reflects_window() {
        let limiter = limiter(1, 60);

        limiter.check("user-1").await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        match limiter.check("user-1").await {
            Err(AppError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs <= 40);
                assert!(retry_after_secs >= 1);
            }
            other => panic!("expected rate limit error, got {:?}", other.err()),
        }
    }
}
