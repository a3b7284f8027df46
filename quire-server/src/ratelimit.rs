//! Per-owner rate limiting for write routes.
//!
//! Token bucket per user id. Autosave traffic goes over the chapter
//! websocket and is paced by the debounce, so only REST writes are counted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum burst size (bucket capacity)
    pub burst: u32,
    /// Tokens refilled per second
    pub refill_rate: f64,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 20,
            refill_rate: 2.0,
            enabled: true,
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: u32) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: u32, rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(f64::from(capacity));
        self.last_refill = now;
    }

    fn retry_after(&self, rate: f64) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if rate <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / rate)
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<RwLock<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spend one token for `owner`. On refusal returns how long until the
    /// next token is available.
    pub async fn check(&self, owner: &str) -> Result<(), Duration> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(owner.to_string())
            .or_insert_with(|| Bucket::full(self.config.burst));
        bucket.refill(self.config.burst, self.config.refill_rate);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(bucket.retry_after(self.config.refill_rate))
        }
    }

    /// Drop buckets idle for at least `max_age`.
    pub async fn cleanup(&self, max_age: Duration) {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        let now = Instant::now();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) < max_age);
        if buckets.len() != before {
            debug!(dropped = before - buckets.len(), "rate limit buckets pruned");
        }
    }

    pub async fn tracked(&self) -> usize {
        self.buckets.read().await.len()
    }

    /// Prune idle buckets every `every` until the runtime shuts down.
    pub fn spawn_cleanup(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.cleanup(every).await;
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(burst: u32, refill_rate: f64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            burst,
            refill_rate,
            enabled: true,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = limiter(3, 1.0);

        for _ in 0..3 {
            assert!(limiter.check("writer").await.is_ok());
        }
        let retry = limiter.check("writer").await.unwrap_err();
        assert!(retry <= Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.check("writer").await.is_ok());
        assert!(limiter.check("writer").await.is_err());
    }

    #[tokio::test]
    async fn test_owners_have_separate_buckets() {
        let limiter = limiter(1, 0.1);

        assert!(limiter.check("alice").await.is_ok());
        assert!(limiter.check("bob").await.is_ok());
        assert!(limiter.check("alice").await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_allows_everything() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst: 1,
            refill_rate: 0.0,
            enabled: false,
        });
        for _ in 0..100 {
            assert!(limiter.check("writer").await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_idle_buckets() {
        let limiter = limiter(5, 1.0);
        limiter.check("idle").await.unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.check("busy").await.unwrap();

        limiter.cleanup(Duration::from_secs(60)).await;
        assert_eq!(limiter.tracked().await, 1);
    }
}
