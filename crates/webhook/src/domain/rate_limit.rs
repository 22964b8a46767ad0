use common::domain::{DomainError, DomainResult};
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Tokens are kept in thousandths so sub-second refills are not lost.
const SCALE: u64 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Tokens added per second. Zero disables limiting.
    pub rate: u64,
    /// Bucket capacity.
    pub burst: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { rate: 10, burst: 20 }
    }
}

/// Identifies one rate-limited caller of the downlink ingress.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub application_id: String,
    pub device_id: String,
    pub token_id: String,
}

#[derive(Debug)]
struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

impl Bucket {
    fn refilled(&self, now: Instant, rate: u64, max_tokens: u64) -> u64 {
        let elapsed_ms = now.duration_since(self.last_refill).as_millis() as u64;
        self.tokens
            .saturating_add(elapsed_ms.saturating_mul(rate))
            .min(max_tokens)
    }
}

/// Token buckets keyed by application, device and API key. Buckets that
/// have refilled completely are evicted, since a fresh bucket is identical.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<RateLimitKey, Mutex<Bucket>>,
    last_sweep: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Number of buckets currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drops full buckets at most once per refill period.
    fn sweep(&self, now: Instant, max_tokens: u64) {
        let fill_time = Duration::from_millis(max_tokens / self.config.rate);
        {
            let mut last_sweep = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            if now.duration_since(*last_sweep) < fill_time {
                return;
            }
            *last_sweep = now;
        }
        let rate = self.config.rate;
        self.buckets.retain(|_, bucket| {
            let bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
            bucket.refilled(now, rate, max_tokens) < max_tokens
        });
    }

    /// Takes one token for `key`, or fails with `ResourceExhausted`.
    pub fn try_acquire(&self, key: &RateLimitKey) -> DomainResult<()> {
        if self.config.rate == 0 {
            return Ok(());
        }
        let max_tokens = self.config.burst.max(1) * SCALE;
        let now = Instant::now();
        self.sweep(now, max_tokens);

        let entry = self.buckets.entry(key.clone()).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: max_tokens,
                last_refill: now,
            })
        });
        let mut bucket = entry.lock().unwrap_or_else(|e| e.into_inner());

        if now.duration_since(bucket.last_refill).as_millis() > 0 {
            bucket.tokens = bucket.refilled(now, self.config.rate, max_tokens);
            bucket.last_refill = now;
        }

        if bucket.tokens < SCALE {
            return Err(DomainError::ResourceExhausted(format!(
                "rate limit exceeded for `{}.{}`",
                key.application_id, key.device_id
            )));
        }
        bucket.tokens -= SCALE;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(token_id: &str) -> RateLimitKey {
        RateLimitKey {
            application_id: "foo-app".to_string(),
            device_id: "foo-device".to_string(),
            token_id: token_id.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = RateLimiter::new(RateLimitConfig { rate: 2, burst: 3 });

        for _ in 0..3 {
            limiter.try_acquire(&key("a")).unwrap();
        }
        assert!(matches!(
            limiter.try_acquire(&key("a")),
            Err(DomainError::ResourceExhausted(_))
        ));

        tokio::time::advance(Duration::from_millis(500)).await;

        limiter.try_acquire(&key("a")).unwrap();
        assert!(limiter.try_acquire(&key("a")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig { rate: 1, burst: 1 });

        limiter.try_acquire(&key("a")).unwrap();

        limiter.try_acquire(&key("b")).unwrap();
        assert!(limiter.try_acquire(&key("a")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refilled_buckets_are_evicted() {
        // Arrange
        let limiter = RateLimiter::new(RateLimitConfig { rate: 2, burst: 2 });
        for token_id in ["a", "b", "c"] {
            limiter.try_acquire(&key(token_id)).unwrap();
        }
        limiter.try_acquire(&key("a")).unwrap();
        assert_eq!(limiter.len(), 3);

        // Act
        tokio::time::advance(Duration::from_secs(1)).await;
        limiter.try_acquire(&key("d")).unwrap();

        // Assert
        assert_eq!(limiter.len(), 1);
        limiter.try_acquire(&key("a")).unwrap();
        limiter.try_acquire(&key("a")).unwrap();
        assert!(limiter.try_acquire(&key("a")).is_err());
    }

    #[test]
    fn test_zero_rate_disables_limit() {
        let limiter = RateLimiter::new(RateLimitConfig { rate: 0, burst: 0 });
        for _ in 0..100 {
            limiter.try_acquire(&key("a")).unwrap();
        }
    }
}
