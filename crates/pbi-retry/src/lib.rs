//! Exponential backoff with jitter, parameterized so callers pick their own
//! base/cap instead of hard-coding the constants inline.
//!
//! Grounded on the webhook delivery worker's retry loop, generalized out of
//! that crate so the shape (`min(cap, base * 2^(attempts-1)) * (1 ± 20%)`) has
//! a single owner.

use std::time::Duration;

use rand::Rng;

/// Base/cap parameters for [`backoff`]. Both are seconds.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_seconds: i64,
    pub cap_seconds: i64,
}

impl BackoffPolicy {
    pub const fn new(base_seconds: i64, cap_seconds: i64) -> Self {
        Self {
            base_seconds,
            cap_seconds,
        }
    }

    /// `min(cap, base * 2^(attempts-1)) * (1 ± 20%)`, floored at 1 second.
    /// `attempts` is 1-indexed: the delay computed *after* the Nth attempt
    /// has failed.
    pub fn delay(&self, attempts: i32) -> Duration {
        let exponent = (attempts - 1).max(0) as u32;
        let raw = self.base_seconds.saturating_mul(1i64 << exponent.min(20));
        let capped = raw.min(self.cap_seconds) as f64;
        let jitter = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = (capped * (1.0 + jitter)).max(1.0);
        Duration::from_secs_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_with_attempts() {
        let policy = BackoffPolicy::new(30, 3600);
        let first = policy.delay(1);
        let tenth = policy.delay(10);
        assert!(tenth.as_secs_f64() > first.as_secs_f64());
    }

    #[test]
    fn caps_at_configured_ceiling() {
        let policy = BackoffPolicy::new(30, 3600);
        let far = policy.delay(30);
        assert!(far.as_secs_f64() <= 3600.0 * 1.21);
    }

    #[test]
    fn first_attempt_stays_near_base() {
        for _ in 0..20 {
            let policy = BackoffPolicy::new(30, 3600);
            let d = policy.delay(1);
            assert!(d.as_secs_f64() >= 30.0 * 0.79);
            assert!(d.as_secs_f64() <= 30.0 * 1.21);
        }
    }

    #[test]
    fn never_below_one_second() {
        let policy = BackoffPolicy::new(0, 0);
        assert!(policy.delay(1).as_secs_f64() >= 1.0);
    }
}
