//! Time sources for refill and expiry calculations.
//!
//! The limiter, the retry executor and the cache never read the wall clock
//! or sleep directly; they ask a [`Clock`]. Production code uses
//! [`TokioClock`], which also follows tokio's paused test time
//! (`#[tokio::test(start_paused = true)]`). [`ManualClock`] only moves when
//! told to, or when something sleeps on it, which makes TTL and backoff
//! tests exact.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Monotonic time source.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Suspend the caller for `duration` of this clock's time.
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock backed by [`tokio::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that advances only via [`ManualClock::advance`].
///
/// Sleeping on a manual clock advances it by the requested duration and
/// yields once, so waits complete instantly in simulated time. Concurrent
/// sleepers each add their own duration.
///
/// Cloning shares the underlying time, so a test can keep one handle and
/// hand another to the component under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Total time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// The default shared clock.
pub(crate) fn default_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock)
}
