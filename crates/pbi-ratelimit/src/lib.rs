//! In-memory, per-key rate limiting.
//!
//! A process-wide sliding-window limiter keyed by an arbitrary string (the
//! daemon keys it by `Authorization` header value, falling back to `"anon"`
//! for unauthenticated requests). Generalizes the single global window the
//! daemon's middleware used to apply into a map of independent windows, one
//! per key, so one noisy tenant can't starve another.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit exceeded")]
    Exceeded,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimitConfig {
    pub fn new(window_seconds: u64, max_requests: u32) -> Self {
        Self {
            window: Duration::from_secs(window_seconds),
            max_requests,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(60, 120)
    }
}

#[derive(Debug, Default)]
struct Bucket {
    timestamps: VecDeque<Instant>,
}

impl Bucket {
    fn check(&mut self, now: Instant, config: &RateLimitConfig) -> Result<(), RateLimitError> {
        while let Some(&front) = self.timestamps.front() {
            if now.duration_since(front) > config.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        if self.timestamps.len() as u32 >= config.max_requests {
            return Err(RateLimitError::Exceeded);
        }
        self.timestamps.push_back(now);
        Ok(())
    }
}

/// A keyed rate limiter shared across all callers of a process via `Arc`.
///
/// Each distinct key gets its own independent sliding window; keys are never
/// evicted explicitly, which is acceptable for the bounded key space this
/// service sees (one bucket per distinct API key in active use).
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request for `key` against the current instant, returning
    /// `Err` if this request would exceed the configured window/max.
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), RateLimitError> {
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets.entry(key.to_string()).or_default();
        bucket.check(now, &self.config)
    }

    /// Drops buckets that have had no activity inside the current window, to
    /// bound memory for a process that has seen many distinct keys over its
    /// lifetime (e.g. rotated API keys). Not required for correctness.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        buckets.retain(|_, bucket| {
            bucket
                .timestamps
                .back()
                .is_some_and(|&last| now.duration_since(last) <= self.config.window)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_requests_in_window() {
        let limiter = RateLimiter::new(RateLimitConfig::new(60, 3));
        let now = Instant::now();
        assert!(limiter.check_at("tenant-a", now).is_ok());
        assert!(limiter.check_at("tenant-a", now).is_ok());
        assert!(limiter.check_at("tenant-a", now).is_ok());
        assert_eq!(
            limiter.check_at("tenant-a", now),
            Err(RateLimitError::Exceeded)
        );
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::new(60, 1));
        let now = Instant::now();
        assert!(limiter.check_at("tenant-a", now).is_ok());
        assert!(limiter.check_at("tenant-b", now).is_ok());
        assert_eq!(
            limiter.check_at("tenant-a", now),
            Err(RateLimitError::Exceeded)
        );
    }

    #[test]
    fn window_expiry_frees_capacity() {
        let limiter = RateLimiter::new(RateLimitConfig::new(10, 1));
        let t0 = Instant::now();
        assert!(limiter.check_at("tenant-a", t0).is_ok());
        assert_eq!(
            limiter.check_at("tenant-a", t0 + Duration::from_secs(1)),
            Err(RateLimitError::Exceeded)
        );
        assert!(
            limiter
                .check_at("tenant-a", t0 + Duration::from_secs(11))
                .is_ok()
        );
    }

    #[test]
    fn sweep_drops_idle_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig::new(0, 1));
        limiter.check("tenant-a").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        limiter.sweep();
        let buckets = limiter.buckets.lock().unwrap();
        assert!(!buckets.contains_key("tenant-a"));
    }
}
