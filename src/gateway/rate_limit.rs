//! Token bucket rate limiting keyed by caller.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// One bucket per key (principal id or client IP).
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    rps: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rps: f64::from(requests_per_second.max(1)),
            burst: f64::from(burst_size.max(1)),
        }
    }

    /// `None` when rate limiting is disabled.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.requests_per_second, config.burst_size))
    }

    /// Take one token for `key`.
    pub fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(key) {
            return bucket.try_acquire(self.burst, self.rps);
        }
        let mut bucket = TokenBucket::new(self.burst);
        let allowed = bucket.try_acquire(self.burst, self.rps);
        buckets.insert(key.to_string(), bucket);
        allowed
    }

    /// Drop buckets untouched for `idle`; they would be full again anyway.
    pub fn prune(&self, idle: Duration) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, b| b.last_update.elapsed() < idle);
        before - buckets.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = RateLimiter::new(2, 3);
        for _ in 0..3 {
            assert!(limiter.check("1.2.3.4"));
        }
        assert!(!limiter.check("1.2.3.4"));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.check("1.2.3.4"));
        assert!(!limiter.check("1.2.3.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, 1);
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_idle_buckets() {
        let limiter = RateLimiter::new(1, 1);
        limiter.check("a");
        tokio::time::advance(Duration::from_secs(5)).await;
        limiter.check("b");

        assert_eq!(limiter.prune(Duration::from_secs(2)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_disabled_config_yields_none() {
        assert!(RateLimiter::from_config(&RateLimitConfig::default()).is_none());
    }
}
