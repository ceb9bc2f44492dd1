//! Builder for configuring governor instances

use std::sync::Arc;

use tracing::info;

use super::Governor;
use crate::Result;
use crate::cache::{CacheConfig, ResponseCache};
use crate::clock::{Clock, default_clock};
use crate::config::GovernorConfig;
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::retry::{RetryConfig, RetryExecutor};

/// Main entry point for creating governor instances.
pub struct Heimdall;

impl Heimdall {
    /// Create a new builder for configuring the governor.
    pub fn builder() -> HeimdallBuilder {
        HeimdallBuilder::new()
    }
}

/// Builder for configuring governor instances.
///
/// Every setting has a default matching the typical public-API quota of
/// three requests per second with a burst of ten.
#[derive(Debug, Default)]
pub struct HeimdallBuilder {
    rate_limit: RateLimitConfig,
    cache: CacheConfig,
    retry: RetryConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl HeimdallBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the token bucket.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Configure the response cache.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Configure the retry policy.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Share one clock between limiter, cache and retry waits.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Take all three sections from loaded configuration.
    pub fn config(self, config: &GovernorConfig) -> Result<Self> {
        Ok(self
            .rate_limit(config.rate_limit_config()?)
            .cache(config.cache_config()?)
            .retry(config.retry_config()?))
    }

    /// Build the governor.
    pub fn build(self) -> Result<Governor> {
        let clock = self.clock.unwrap_or_else(default_clock);

        let limiter = Arc::new(RateLimiter::with_clock(self.rate_limit.clone(), clock.clone())?);
        let cache = Arc::new(ResponseCache::with_clock(self.cache.clone(), clock.clone())?);
        let executor =
            RetryExecutor::with_clock(self.retry.clone(), limiter.clone(), clock.clone())?;

        info!(
            capacity = self.rate_limit.capacity,
            refill_per_second = self.rate_limit.refill_per_second,
            cache_ttl_ms = self.cache.ttl.as_millis() as u64,
            cache_max_entries = self.cache.max_entries,
            max_attempts = self.retry.max_attempts,
            "governor ready"
        );

        Ok(Governor::new(limiter, cache, executor, clock))
    }
}
