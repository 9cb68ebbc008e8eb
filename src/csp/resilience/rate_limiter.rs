//! Token bucket rate limiter shared by every request a provider sends
//!
//! Uses the tokio clock so paused-time tests can drive refills.

use super::config::RateLimitConfig;
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<Bucket>>,
    config: RateLimitConfig,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    granted: u64,
    throttled: u64,
    waited: Duration,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Bucket {
                tokens: config.burst_capacity as f64,
                last_refill: Instant::now(),
                granted: 0,
                throttled: 0,
                waited: Duration::ZERO,
            })),
            config,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    /// Wait for a token; returns how long the caller was held back
    pub async fn acquire(&self) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }

        let mut waited = Duration::ZERO;
        loop {
            let wait = {
                let mut bucket = self.bucket();
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    bucket.granted += 1;
                    bucket.waited += waited;
                    return waited;
                }
                bucket.throttled += 1;
                self.time_until_next_token(&bucket)
            };

            debug!("Rate limiter: waiting {:?} for next token", wait);
            sleep(wait).await;
            waited += wait;
        }
    }

    /// Take a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut bucket = self.bucket();
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            bucket.granted += 1;
            true
        } else {
            bucket.throttled += 1;
            false
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        let bucket = self.bucket();
        RateLimiterStats {
            tokens_available: bucket.tokens,
            granted: bucket.granted,
            throttled: bucket.throttled,
            total_wait: bucket.waited,
            enabled: self.config.enabled,
        }
    }

    fn bucket(&self) -> MutexGuard<'_, Bucket> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn tokens_per_second(&self) -> f64 {
        self.config.requests_per_minute.max(1) as f64 / 60.0
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let added = now.duration_since(bucket.last_refill).as_secs_f64() * self.tokens_per_second();
        if added > 0.0 {
            bucket.tokens = (bucket.tokens + added).min(self.config.burst_capacity as f64);
            bucket.last_refill = now;
        }
    }

    fn time_until_next_token(&self, bucket: &Bucket) -> Duration {
        let missing = (1.0 - bucket.tokens).max(0.0);
        Duration::from_secs_f64(missing / self.tokens_per_second())
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub tokens_available: f64,
    pub granted: u64,
    /// Times a caller found the bucket empty
    pub throttled: u64,
    pub total_wait: Duration,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rpm: u32, burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_minute: rpm,
            burst_capacity: burst,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_disabled_never_blocks() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..1000 {
            assert!(limiter.try_acquire());
        }
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_throttle() {
        let limiter = RateLimiter::new(config(60, 3));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        let stats = limiter.stats();
        assert_eq!(stats.granted, 3);
        assert_eq!(stats.throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        // One token per 500ms
        let limiter = RateLimiter::new(config(120, 1));

        assert_eq!(limiter.acquire().await, Duration::ZERO);

        let waited = limiter.acquire().await;
        assert!(waited >= Duration::from_millis(450), "waited {:?}", waited);
        assert!(waited <= Duration::from_millis(550), "waited {:?}", waited);
        assert_eq!(limiter.stats().granted, 2);
    }
}
