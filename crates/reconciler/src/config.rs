//! Controller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use workqueue::RateLimiterConfig;

use crate::error::{Error, Result};

/// Settings for one [`Controller`](crate::Controller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Name used for the queue and in log lines.
    pub name: String,
    /// Worker count the binary passes to `run`.
    pub workers: usize,
    /// Requeue backoff.
    #[serde(flatten)]
    pub rate_limiter: RateLimiterConfig,
    /// Retries allowed after a key's first failed sync before it is dropped.
    /// Unset retries forever.
    pub max_retries: Option<u32>,
    /// How often to check whether the informer cache has synced.
    pub cache_sync_poll_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "controller".to_string(),
            workers: 2,
            rate_limiter: RateLimiterConfig::default(),
            max_retries: None,
            cache_sync_poll_ms: 100,
        }
    }
}

impl ControllerConfig {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiterConfig) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn with_cache_sync_poll_interval(mut self, interval: Duration) -> Self {
        self.cache_sync_poll_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Interval between cache sync checks.
    pub const fn cache_sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sync_poll_ms)
    }

    /// Check the settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for an empty name, zero workers or a zero poll
    /// interval, and the rate limiter's own error for bad backoff settings.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_config("controller name must not be empty"));
        }
        if self.workers == 0 {
            return Err(Error::invalid_config("worker count must be positive"));
        }
        if self.cache_sync_poll_ms == 0 {
            return Err(Error::invalid_config(
                "cache sync poll interval must be positive",
            ));
        }
        self.rate_limiter.validate()?;
        Ok(())
    }
}
