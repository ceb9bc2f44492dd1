//! The request-governance pipeline.
//!
//! [`Governor`] composes the three concerns every remote call goes through:
//!
//! - reads consult the [`ResponseCache`] first and only reach the remote
//!   service on a miss;
//! - every remote attempt takes budget from the shared [`RateLimiter`];
//! - failures are classified and retried by the [`RetryExecutor`];
//! - successful writes invalidate the cached reads they make stale.
//!
//! Build one with [`Heimdall::builder()`] and share it (it is `Send + Sync`)
//! across every task that talks to the same remote service.

mod builder;

pub use builder::{Heimdall, HeimdallBuilder};

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::Result;
use crate::cache::{KeyPredicate, ResponseCache};
use crate::clock::Clock;
use crate::config::GovernorConfig;
use crate::error::TransportError;
use crate::limiter::RateLimiter;
use crate::retry::{Completed, RetryExecutor};
use crate::telemetry;
use crate::transport::{Request, Transport};

/// Rate-limited, cached, retrying front door to one remote service.
#[derive(Debug)]
pub struct Governor {
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    executor: RetryExecutor,
    clock: Arc<dyn Clock>,
}

impl Governor {
    pub(crate) fn new(
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        executor: RetryExecutor,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limiter,
            cache,
            executor,
            clock,
        }
    }

    /// Build a governor from loaded configuration.
    pub fn from_config(config: &GovernorConfig) -> Result<Self> {
        Heimdall::builder().config(config)?.build()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Read through the cache.
    ///
    /// A live entry for `key` is returned without any remote call, limiter
    /// token or retry. On a miss, `fetcher` runs under the rate limiter and
    /// retry policy and a successful result is cached under `key`. A result
    /// whose fetch overlapped an invalidation is returned but not cached.
    ///
    /// Failures are never cached.
    pub async fn execute_read<T, F, Fut>(
        &self,
        key: impl Into<String>,
        fetcher: F,
    ) -> Result<Completed<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let key = key.into();
        let start = self.clock.now();

        if let Some(value) = self.cache.get_as::<T>(&key) {
            self.record_request("read", start, true);
            return Ok(Completed::from_cache(value));
        }

        let generation = self.cache.generation();
        let result = self.executor.run("read", fetcher).await;
        if let Ok(completed) = &result {
            self.cache.put_as_if_generation(key.as_str(), &completed.value, generation);
        }
        self.record_request("read", start, result.is_ok());
        result
    }

    /// Perform a mutation, then drop every cached read it makes stale.
    ///
    /// `operation` runs under the rate limiter and retry policy and is never
    /// served from cache. Entries matching any of `invalidates` are removed
    /// only after the write succeeds; a failed write leaves the cache as is.
    pub async fn execute_write<T, F, Fut>(
        &self,
        operation: F,
        invalidates: &[KeyPredicate],
    ) -> Result<Completed<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let start = self.clock.now();
        let result = self.executor.run("write", operation).await;
        if result.is_ok() {
            let removed: usize = invalidates
                .iter()
                .map(|predicate| self.cache.invalidate(predicate.clone()))
                .sum();
            debug!(removed, predicates = invalidates.len(), "write invalidated cache");
        }
        self.record_request("write", start, result.is_ok());
        result
    }

    /// [`execute_read`](Self::execute_read) of one request over `transport`.
    pub async fn fetch(
        &self,
        transport: &dyn Transport,
        key: impl Into<String>,
        request: &Request,
    ) -> Result<Completed<Value>> {
        self.execute_read(key, || transport.invoke(request)).await
    }

    /// [`execute_write`](Self::execute_write) of one request over `transport`.
    pub async fn submit(
        &self,
        transport: &dyn Transport,
        request: &Request,
        invalidates: &[KeyPredicate],
    ) -> Result<Completed<Value>> {
        self.execute_write(|| transport.invoke(request), invalidates).await
    }

    fn record_request(&self, operation: &'static str, start: Instant, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        let elapsed = self.clock.now().saturating_duration_since(start).as_secs_f64();
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "operation" => operation,
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "operation" => operation,
        )
        .record(elapsed);
    }
}
