//! Retry configuration, classification and the retry executor.
//!
//! [`RetryExecutor::run`] wraps one logical remote operation. Every attempt
//! (the first one and each retry) first takes budget from the shared
//! [`RateLimiter`], then invokes the operation and classifies the outcome:
//!
//! ```text
//! PENDING ─► ATTEMPTING ─► SUCCESS
//!               │  ▲
//!               ▼  │ (after delay)
//!             WAITING
//!               │
//!               └─► FATAL   (client fault, or attempts exhausted)
//! ```
//!
//! Classification is a pure function of the [`TransportError`]
//! ([`RetryConfig::classify`]): throttling waits for the service's hint when
//! there is one, other retryable faults back off exponentially with jitter,
//! and client faults fail immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::clock::{Clock, default_clock};
use crate::error::{ErrorKind, TransportError};
use crate::limiter::RateLimiter;
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Configuration for retry behaviour on recoverable errors.
///
/// Uses exponential backoff with optional bounded jitter:
///
/// ```rust
/// # use heimdall::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .base_delay(Duration::from_millis(200))
///     .jitter(true);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 1s.
    pub base_delay: Duration,
    /// Maximum computed backoff (caps exponential growth). Default: 30s.
    /// Service-provided retry-after hints are honoured as-is.
    pub max_delay: Duration,
    /// Whether to add random jitter to backoff delays. Default: true.
    pub jitter: bool,
    /// Upper bound of the jitter added to a backoff delay. Default: 250ms.
    pub max_jitter: Duration,
    /// Give up on a single attempt after this long and treat it as a
    /// transport timeout. Default: none.
    pub attempt_timeout: Option<Duration>,
    /// Tokens taken from the rate limiter per attempt. Default: 1.
    pub attempt_cost: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
            max_jitter: Duration::from_millis(250),
            attempt_timeout: None,
            attempt_cost: 1,
        }
    }
}

/// How a failed attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Retry after exactly this delay (service-provided hint).
    RetryAfter(Duration),
    /// Retry after exponential backoff plus jitter.
    Backoff,
    /// Do not retry.
    Fatal,
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum computed delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Set the jitter upper bound.
    pub fn max_jitter(mut self, bound: Duration) -> Self {
        self.max_jitter = bound;
        self
    }

    /// Bound the duration of each individual attempt.
    pub fn attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    /// Set the limiter cost of each attempt.
    pub fn attempt_cost(mut self, cost: u32) -> Self {
        self.attempt_cost = cost;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(HeimdallError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.attempt_cost == 0 {
            return Err(HeimdallError::Configuration(
                "retry.attempt_cost must be at least 1".into(),
            ));
        }
        if self.attempt_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(HeimdallError::Configuration(
                "retry.attempt_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Decide what to do with a failed attempt.
    pub fn classify(&self, err: &TransportError) -> Disposition {
        match err.kind() {
            ErrorKind::Client => Disposition::Fatal,
            ErrorKind::Throttled => match err.retry_after() {
                Some(hint) => Disposition::RetryAfter(hint),
                None => Disposition::Backoff,
            },
            ErrorKind::Transient => Disposition::Backoff,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Uses exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`.
    /// Does NOT include jitter; see [`backoff_delay()`](Self::backoff_delay)
    /// for the full calculation.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Exponential delay for `attempt` plus a random jitter in `[0, max_jitter]`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter && !self.max_jitter.is_zero() {
            delay + rand::thread_rng().gen_range(Duration::ZERO..=self.max_jitter)
        } else {
            delay
        }
    }

    /// Delay before the retry that follows failed `attempt`, or `None` if
    /// the failure is fatal.
    pub fn delay_after(&self, attempt: u32, err: &TransportError) -> Option<Duration> {
        match self.classify(err) {
            Disposition::RetryAfter(hint) => Some(hint),
            Disposition::Backoff => Some(self.backoff_delay(attempt)),
            Disposition::Fatal => None,
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failed(ErrorKind),
}

/// Record of one attempt within a single invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    pub outcome: AttemptOutcome,
    /// Wait applied after this attempt before the next one.
    pub delay: Option<Duration>,
}

/// A successful result together with how it was obtained.
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub value: T,
    /// Remote attempts made; empty when served from cache.
    pub attempts: Vec<Attempt>,
    /// Whether the value came from the response cache.
    pub cached: bool,
}

impl<T> Completed<T> {
    pub(crate) fn from_cache(value: T) -> Self {
        Self {
            value,
            attempts: Vec::new(),
            cached: true,
        }
    }

    /// Number of remote attempts made.
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Total time spent waiting between attempts.
    pub fn total_delay(&self) -> Duration {
        self.attempts.iter().filter_map(|a| a.delay).sum()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Runs remote operations with rate limiting and classified retries.
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl RetryExecutor {
    /// Create an executor gating attempts through `limiter`.
    ///
    /// Fails if the config is invalid or the per-attempt cost exceeds the
    /// limiter's capacity.
    pub fn new(config: RetryConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        Self::with_clock(config, limiter, default_clock())
    }

    /// Create an executor that waits between attempts on a custom clock.
    pub fn with_clock(
        config: RetryConfig,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        limiter.check_cost(config.attempt_cost)?;
        Ok(Self {
            config,
            limiter,
            clock,
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Execute `f` with retry logic.
    ///
    /// `operation` labels logs and metrics. `f` is invoked once per attempt
    /// and must be safe to repeat.
    pub async fn run<F, Fut, T>(&self, operation: &str, f: F) -> Result<Completed<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let max_attempts = self.config.max_attempts;
        let mut attempts = Vec::with_capacity(max_attempts as usize);

        for attempt in 0..max_attempts {
            let number = attempt + 1;
            self.limiter.acquire(self.config.attempt_cost).await?;

            let err = match self.attempt(&f).await {
                Ok(value) => {
                    attempts.push(Attempt {
                        number,
                        outcome: AttemptOutcome::Success,
                        delay: None,
                    });
                    debug!(operation, attempts = number, "operation succeeded");
                    return Ok(Completed {
                        value,
                        attempts,
                        cached: false,
                    });
                }
                Err(err) => err,
            };

            let kind = err.kind();
            let Some(delay) = self.config.delay_after(attempt, &err) else {
                attempts.push(Attempt {
                    number,
                    outcome: AttemptOutcome::Failed(kind),
                    delay: None,
                });
                debug!(operation, attempts = number, error = %err, "not retrying client error");
                return Err(HeimdallError::Rejected {
                    kind,
                    attempts: number,
                    source: err,
                });
            };

            if number >= max_attempts {
                attempts.push(Attempt {
                    number,
                    outcome: AttemptOutcome::Failed(kind),
                    delay: None,
                });
                warn!(operation, attempts = number, error = %err, "retries exhausted");
                return Err(HeimdallError::RetriesExhausted {
                    kind,
                    attempts: number,
                    source: err,
                });
            }

            metrics::counter!(telemetry::RETRIES_TOTAL,
                "operation" => operation.to_owned(),
                "kind" => kind.as_str(),
            )
            .increment(1);
            warn!(
                operation,
                attempt = number,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after {kind} error"
            );
            attempts.push(Attempt {
                number,
                outcome: AttemptOutcome::Failed(kind),
                delay: Some(delay),
            });
            self.clock.sleep(delay).await;
        }

        // max_attempts >= 1 is validated at construction, so the loop returns
        Err(HeimdallError::Configuration(
            "retry.max_attempts must be at least 1".into(),
        ))
    }

    async fn attempt<F, Fut, T>(&self, f: &F) -> std::result::Result<T, TransportError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        match self.config.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, f()).await.unwrap_or_else(|_| {
                Err(TransportError::timeout(format!(
                    "attempt exceeded {}ms",
                    limit.as_millis()
                )))
            }),
            None => f().await,
        }
    }
}
