//! Token-bucket rate limiting for outbound calls.
//!
//! [`RateLimiter`] enforces an average request rate (`refill_per_second`)
//! while allowing bursts up to `capacity`. Callers that find the bucket
//! short are suspended for exactly the computed refill time, never polled.
//!
//! # Ordering and atomicity
//!
//! Waiters queue on a fair async mutex, so budget is handed out in arrival
//! order. The bucket itself sits behind a separate short-lived lock, which
//! makes refill-check-deduct a single atomic step and keeps
//! [`RateLimiter::available_tokens`] synchronous.
//!
//! # Cancellation
//!
//! Dropping an `acquire` future at its await point (e.g. inside
//! `tokio::time::timeout`) deducts nothing: tokens are only taken in the
//! same synchronous step that finds them available.

mod bucket;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::{Clock, default_clock};
use crate::telemetry;
use crate::{HeimdallError, Result};

use bucket::TokenBucket;

/// Configuration for the token bucket.
///
/// ```rust
/// # use heimdall::RateLimitConfig;
/// let config = RateLimitConfig::new()
///     .capacity(10)
///     .refill_per_second(3.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Maximum tokens held (burst allowance). Default: 10.
    pub capacity: u32,
    /// Tokens added per second (average rate ceiling). Default: 3.0.
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 3.0,
        }
    }
}

impl RateLimitConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bucket capacity.
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the refill rate in tokens per second.
    pub fn refill_per_second(mut self, rate: f64) -> Self {
        self.refill_per_second = rate;
        self
    }

    /// Check the parameters describe a satisfiable bucket.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(HeimdallError::Configuration(
                "rate_limit.capacity must be at least 1".into(),
            ));
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second <= 0.0 {
            return Err(HeimdallError::Configuration(format!(
                "rate_limit.refill_per_second must be a positive number, got {}",
                self.refill_per_second
            )));
        }
        Ok(())
    }
}

/// Token-bucket rate limiter shared by all callers of one remote endpoint class.
///
/// Construct one per limited resource and share it by `Arc`; independent
/// instances never interfere with each other.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<TokenBucket>,
    queue: tokio::sync::Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter with a full bucket, using the tokio clock.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        Self::with_clock(config, default_clock())
    }

    /// Create a limiter driven by a custom clock.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let bucket = TokenBucket::new(
            f64::from(config.capacity),
            config.refill_per_second,
            clock.now(),
        );
        Ok(Self {
            config,
            bucket: Mutex::new(bucket),
            queue: tokio::sync::Mutex::new(()),
            clock,
        })
    }

    /// Maximum tokens the bucket holds.
    pub fn capacity(&self) -> u32 {
        self.config.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.config.refill_per_second
    }

    /// Reject costs the bucket can never satisfy.
    pub fn check_cost(&self, cost: u32) -> Result<()> {
        if cost > self.config.capacity {
            return Err(HeimdallError::Configuration(format!(
                "requested cost ({cost}) exceeds bucket capacity ({})",
                self.config.capacity
            )));
        }
        Ok(())
    }

    /// Take `cost` tokens, suspending until they are available.
    ///
    /// Fails only when `cost` exceeds the bucket capacity, before touching
    /// any state. Otherwise this never fails; it only waits.
    pub async fn acquire(&self, cost: u32) -> Result<()> {
        self.check_cost(cost)?;
        let _turn = self.queue.lock().await;

        let started = self.clock.now();
        let mut waited = false;
        loop {
            let shortfall = self.bucket.lock().try_take(f64::from(cost), self.clock.now());
            match shortfall {
                Ok(()) => break,
                Err(wait) => {
                    debug!(
                        cost,
                        wait_ms = wait.as_millis() as u64,
                        "rate limiter waiting for tokens"
                    );
                    waited = true;
                    self.clock.sleep(wait).await;
                }
            }
        }

        if waited {
            let elapsed = self.clock.now().saturating_duration_since(started);
            metrics::histogram!(telemetry::RATE_LIMIT_WAIT_SECONDS).record(elapsed.as_secs_f64());
        }
        Ok(())
    }

    /// Like [`acquire`](Self::acquire), but gives up after `limit`.
    ///
    /// Returns `Ok(false)` on timeout; nothing is deducted in that case.
    pub async fn acquire_timeout(&self, cost: u32, limit: Duration) -> Result<bool> {
        self.check_cost(cost)?;
        match tokio::time::timeout(limit, self.acquire(cost)).await {
            Ok(result) => result.map(|()| true),
            Err(_elapsed) => Ok(false),
        }
    }

    /// Take `cost` tokens only if that is possible right now.
    ///
    /// Returns `Ok(false)` when the bucket is short or other callers are
    /// already queued ahead.
    pub fn try_acquire(&self, cost: u32) -> Result<bool> {
        self.check_cost(cost)?;
        let Ok(_turn) = self.queue.try_lock() else {
            return Ok(false);
        };
        let taken = self
            .bucket
            .lock()
            .try_take(f64::from(cost), self.clock.now())
            .is_ok();
        Ok(taken)
    }

    /// Tokens available at this instant (snapshot, for diagnostics).
    pub fn available_tokens(&self) -> f64 {
        self.bucket.lock().projected(self.clock.now())
    }
}
