//! Rate limiters deciding how long a key waits before it is re-added.
//!
//! A limiter is consulted by [`RateLimitingQueue::add_rate_limited`]. Per-item
//! limiters count one failure per call to [`RateLimiter::when`] and reset the
//! count on [`RateLimiter::forget`]. The overall bucket limiter caps the
//! aggregate retry rate regardless of key.
//!
//! [`RateLimitingQueue::add_rate_limited`]: crate::RateLimitingQueue::add_rate_limited

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Decides the delay applied to a re-added key.
pub trait RateLimiter<K>: Send + Sync {
    /// Get the delay for the next add of `key`, recording one more failure.
    fn when(&self, key: &K) -> Duration;

    /// Stop tracking `key`, resetting its failure count.
    fn forget(&self, key: &K);

    /// Number of failures recorded for `key` since it was last forgotten.
    fn num_requeues(&self, key: &K) -> u32;
}

/// Exponential backoff: `base * 2^attempt`, capped at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
}

/// Per-item exponential backoff.
///
/// The first failure waits `base_delay`, each further failure doubles the
/// wait, up to `max_delay`.
pub struct ItemExponentialFailureRateLimiter<K> {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> ItemExponentialFailureRateLimiter<K> {
    /// Create a new exponential limiter.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone + Send> RateLimiter<K> for ItemExponentialFailureRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        let attempt = {
            let mut failures = self.failures.lock();
            let count = failures.entry(key.clone()).or_insert(0);
            let attempt = *count;
            *count = count.saturating_add(1);
            attempt
        };
        calculate_backoff(attempt, self.base_delay, self.max_delay)
    }

    fn forget(&self, key: &K) {
        self.failures.lock().remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }
}

/// Per-item two-speed limiter: `fast_delay` for the first
/// `max_fast_attempts` failures, `slow_delay` afterwards.
pub struct ItemFastSlowRateLimiter<K> {
    fast_delay: Duration,
    slow_delay: Duration,
    max_fast_attempts: u32,
    attempts: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> ItemFastSlowRateLimiter<K> {
    /// Create a new fast/slow limiter.
    pub fn new(fast_delay: Duration, slow_delay: Duration, max_fast_attempts: u32) -> Self {
        Self {
            fast_delay,
            slow_delay,
            max_fast_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone + Send> RateLimiter<K> for ItemFastSlowRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        let attempts = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(key.clone()).or_insert(0);
            *count = count.saturating_add(1);
            *count
        };
        if attempts <= self.max_fast_attempts {
            self.fast_delay
        } else {
            self.slow_delay
        }
    }

    fn forget(&self, key: &K) {
        self.attempts.lock().remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.attempts.lock().get(key).copied().unwrap_or(0)
    }
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket shared by every key.
///
/// Holds up to `burst` tokens refilled at `qps` per second. An add that finds
/// the bucket empty reserves a future token and waits for it.
pub struct BucketRateLimiter {
    qps: f64,
    burst: u32,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    /// Create a new bucket limiter, initially full.
    pub fn new(qps: f64, burst: u32) -> Self {
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        }
    }

    fn reserve(&self) -> Duration {
        if self.qps <= 0.0 || !self.qps.is_finite() {
            return Duration::ZERO;
        }

        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = elapsed.mul_add(self.qps, bucket.tokens).min(f64::from(self.burst));
        bucket.last = now;
        bucket.tokens -= 1.0;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps).unwrap_or(Duration::MAX)
        }
    }
}

impl<K> RateLimiter<K> for BucketRateLimiter {
    fn when(&self, _key: &K) -> Duration {
        self.reserve()
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Combines limiters, always waiting for the slowest.
pub struct MaxOfRateLimiter<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOfRateLimiter<K> {
    /// Create a limiter returning the largest delay of `limiters`.
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOfRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &K) {
        self.limiters.iter().for_each(|limiter| limiter.forget(key));
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Settings for the default controller limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Delay after the first failure of a key, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling on a single key's delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Overall re-add rate across all keys.
    pub qps: f64,
    /// Overall burst size.
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 1_000_000,
            qps: 10.0,
            burst: 100,
        }
    }
}

impl RateLimiterConfig {
    /// Set the per-key base delay.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the per-key delay ceiling.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the overall bucket rate and burst.
    #[must_use]
    pub const fn with_bucket(mut self, qps: f64, burst: u32) -> Self {
        self.qps = qps;
        self.burst = burst;
        self
    }

    /// Per-key base delay.
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Per-key delay ceiling.
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check that the settings describe a usable limiter.
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::invalid_config(format!(
                "base delay {}ms exceeds max delay {}ms",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(self.qps.is_finite() && self.qps > 0.0) {
            return Err(Error::invalid_config(format!(
                "qps must be a positive number, got {}",
                self.qps
            )));
        }
        if self.burst == 0 {
            return Err(Error::invalid_config("burst must be positive"));
        }
        Ok(())
    }

    /// Build the combined per-key exponential and overall bucket limiter.
    pub fn build<K>(&self) -> Result<MaxOfRateLimiter<K>>
    where
        K: Eq + Hash + Clone + Send + 'static,
    {
        self.validate()?;
        Ok(self.assemble())
    }

    /// Combine the limiters without validating the settings.
    fn assemble<K>(&self) -> MaxOfRateLimiter<K>
    where
        K: Eq + Hash + Clone + Send + 'static,
    {
        MaxOfRateLimiter::new(vec![
            Box::new(ItemExponentialFailureRateLimiter::new(
                self.base_delay(),
                self.max_delay(),
            )),
            Box::new(BucketRateLimiter::new(self.qps, self.burst)),
        ])
    }
}

/// The usual controller limiter: per-key exponential backoff from 5ms to
/// 1000s, combined with an overall 10 qps / 100 burst bucket.
pub fn default_controller_rate_limiter<K>() -> MaxOfRateLimiter<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    RateLimiterConfig::default().assemble()
}
