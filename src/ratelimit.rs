//! Per-user token-bucket rate limiting
//!
//! State is in-process only; limits are advisory and not coordinated
//! across replicas.

use dashmap::DashMap;
use std::time::Instant;

use crate::error::{MnemoError, Result};
use crate::types::RateLimitConfig;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter keyed by user id
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let per_minute = config.per_minute.max(1) as f64;
        Self {
            buckets: DashMap::new(),
            capacity: per_minute,
            refill_per_sec: per_minute / 60.0,
        }
    }

    /// Take one token for the user, or fail with `RateLimited` carrying the
    /// seconds until a token is available
    pub fn check(&self, user_id: &str) -> Result<()> {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(user_id.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let retry_after = ((1.0 - bucket.tokens) / self.refill_per_sec).ceil() as u64;
            Err(MnemoError::RateLimited(retry_after.max(1)))
        }
    }

    /// Drop a user's bucket (teardown / tests)
    pub fn reset(&self, user_id: &str) {
        self.buckets.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_capacity() {
        let limiter = RateLimiter::new(&RateLimitConfig { per_minute: 5 });
        for _ in 0..5 {
            assert!(limiter.check("u1").is_ok());
        }
        let err = limiter.check("u1").unwrap_err();
        match err {
            MnemoError::RateLimited(retry_after) => assert!(retry_after >= 1),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_buckets_are_per_user() {
        let limiter = RateLimiter::new(&RateLimitConfig { per_minute: 1 });
        assert!(limiter.check("u1").is_ok());
        assert!(limiter.check("u1").is_err());
        // a different tenant has its own bucket
        assert!(limiter.check("u2").is_ok());
    }

    #[test]
    fn test_reset() {
        let limiter = RateLimiter::new(&RateLimitConfig { per_minute: 1 });
        assert!(limiter.check("u1").is_ok());
        assert!(limiter.check("u1").is_err());
        limiter.reset("u1");
        assert!(limiter.check("u1").is_ok());
    }
}
