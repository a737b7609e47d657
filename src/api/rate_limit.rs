//! Per-client request throttling.
//!
//! A token bucket per remote address: `burst` requests may arrive back to
//! back, after which the bucket refills at `per_second` tokens per second.
//! Buckets use tokio's clock so paused-time tests can drive refills.
//!
//! A bucket that has refilled to capacity and seen no traffic for
//! [`IDLE_BUCKET_TTL`] carries no state worth keeping; such buckets are swept
//! when a new client shows up, at most once per TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// How long a full bucket may sit unused before it is dropped.
pub const IDLE_BUCKET_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            tokens: config.burst as f64,
            capacity: config.burst as f64,
            refill_per_sec: config.per_second as f64,
            last_refill: Instant::now(),
        }
    }

    /// `Err(retry_after_secs)` when the bucket is empty.
    fn try_consume(&mut self) -> Result<(), u32> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let seconds_until_refill = (1.0 - self.tokens) / self.refill_per_sec;
            Err((seconds_until_refill.ceil() as u32).max(1))
        }
    }

    /// Full again and untouched for at least `ttl`.
    fn is_idle(&self, now: Instant, ttl: Duration) -> bool {
        let idle = now.duration_since(self.last_refill);
        let until_full = (self.capacity - self.tokens).max(0.0) / self.refill_per_sec;
        idle >= ttl && idle.as_secs_f64() >= until_full
    }
}

#[derive(Debug)]
struct Buckets {
    clients: HashMap<String, TokenBucket>,
    last_sweep: Instant,
}

impl Buckets {
    fn sweep_if_due(&mut self, now: Instant, ttl: Duration) {
        if now.duration_since(self.last_sweep) < ttl {
            return;
        }
        let before = self.clients.len();
        self.clients.retain(|_, bucket| !bucket.is_idle(now, ttl));
        self.last_sweep = now;

        let evicted = before - self.clients.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.clients.len(), "Dropped idle rate limit buckets");
        }
    }
}

/// Token bucket rate limiter keyed by client address.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<Buckets>>,
    config: RateLimitConfig,
    idle_ttl: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_idle_ttl(config, IDLE_BUCKET_TTL)
    }

    pub fn with_idle_ttl(config: RateLimitConfig, idle_ttl: Duration) -> Self {
        let buckets = Buckets { clients: HashMap::new(), last_sweep: Instant::now() };
        Self { buckets: Arc::new(Mutex::new(buckets)), config, idle_ttl }
    }

    /// `Err(retry_after_secs)` if `key` has exhausted its bucket.
    pub async fn check_rate_limit(&self, key: &str) -> Result<(), u32> {
        let mut buckets = self.buckets.lock().await;
        if !buckets.clients.contains_key(key) {
            buckets.sweep_if_due(Instant::now(), self.idle_ttl);
        }
        let bucket =
            buckets.clients.entry(key.to_string()).or_insert_with(|| TokenBucket::new(self.config));

        match bucket.try_consume() {
            Ok(()) => {
                debug!(
                    key = %key,
                    remaining_tokens = bucket.tokens as u32,
                    "Rate limit check passed"
                );
                Ok(())
            }
            Err(retry_after) => {
                warn!(key = %key, retry_after_seconds = retry_after, "Rate limit exceeded");
                Err(retry_after)
            }
        }
    }

    /// Number of clients currently tracked.
    pub async fn tracked_clients(&self) -> usize {
        self.buckets.lock().await.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_allowed_then_blocked() {
        let limiter = RateLimiter::default();

        for i in 0..10 {
            let result = limiter.check_rate_limit("10.0.0.1").await;
            assert!(result.is_ok(), "request {} should pass", i + 1);
        }
        let result = limiter.check_rate_limit("10.0.0.1").await;
        assert!(result.is_err(), "11th request should be limited");
    }

    #[tokio::test]
    async fn test_clients_are_isolated() {
        let limiter = RateLimiter::new(RateLimitConfig { burst: 1, per_second: 1 });

        limiter.check_rate_limit("10.0.0.1").await.unwrap();
        assert!(limiter.check_rate_limit("10.0.0.1").await.is_err());
        assert!(limiter.check_rate_limit("10.0.0.2").await.is_ok());
        assert_eq!(limiter.tracked_clients().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refills_at_configured_rate() {
        let limiter = RateLimiter::new(RateLimitConfig { burst: 2, per_second: 5 });

        limiter.check_rate_limit("client").await.unwrap();
        limiter.check_rate_limit("client").await.unwrap();
        assert!(limiter.check_rate_limit("client").await.is_err());

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(limiter.check_rate_limit("client").await.is_ok(), "one token after 200ms");
        assert!(limiter.check_rate_limit("client").await.is_err());
    }

    #[tokio::test]
    async fn test_retry_after_is_at_least_one_second() {
        let limiter = RateLimiter::new(RateLimitConfig { burst: 1, per_second: 5 });
        limiter.check_rate_limit("client").await.unwrap();
        assert_eq!(limiter.check_rate_limit("client").await.unwrap_err(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_buckets_are_dropped() {
        let limiter = RateLimiter::new(RateLimitConfig { burst: 2, per_second: 1 });
        limiter.check_rate_limit("10.0.0.1").await.unwrap();
        limiter.check_rate_limit("10.0.0.2").await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check_rate_limit("10.0.0.2").await.unwrap();
        limiter.check_rate_limit("10.0.0.3").await.unwrap();
        assert_eq!(limiter.tracked_clients().await, 3, "no sweep before the ttl");

        tokio::time::advance(Duration::from_secs(31)).await;
        limiter.check_rate_limit("10.0.0.4").await.unwrap();
        assert_eq!(limiter.tracked_clients().await, 3, "only 10.0.0.1 idled for a full ttl");

        tokio::time::advance(IDLE_BUCKET_TTL).await;
        limiter.check_rate_limit("10.0.0.5").await.unwrap();
        assert_eq!(limiter.tracked_clients().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drained_bucket_survives_until_refilled() {
        let config = RateLimitConfig { burst: 100, per_second: 1 };
        let limiter = RateLimiter::with_idle_ttl(config, Duration::from_secs(10));
        for _ in 0..100 {
            limiter.check_rate_limit("busy").await.unwrap();
        }

        tokio::time::advance(Duration::from_secs(20)).await;
        limiter.check_rate_limit("other").await.unwrap();
        assert_eq!(limiter.tracked_clients().await, 2, "a drained bucket keeps its debt");

        tokio::time::advance(Duration::from_secs(90)).await;
        limiter.check_rate_limit("third").await.unwrap();
        assert_eq!(limiter.tracked_clients().await, 1);
    }
}
