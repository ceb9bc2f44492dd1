//! Token bucket state and refill arithmetic.
//!
//! Pure bookkeeping: no locking and no waiting. [`RateLimiter`](super::RateLimiter)
//! serializes access and performs the suspensions this type asks for.

use std::time::Duration;

use tokio::time::Instant;

/// Token bucket holding at most `capacity` tokens, refilled continuously.
///
/// Invariant: `0.0 <= tokens <= capacity` at all times.
#[derive(Debug, Clone)]
pub(crate) struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub(crate) fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Credit tokens for the time elapsed since the last refill.
    pub(crate) fn refill(&mut self, now: Instant) {
        self.tokens = self.projected(now);
        // never move backwards, a stale `now` just refills nothing
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refill, then deduct `cost` if enough tokens are available.
    ///
    /// On shortfall nothing is deducted and the time until the bucket will
    /// hold `cost` tokens is returned.
    pub(crate) fn try_take(&mut self, cost: f64, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            Ok(())
        } else {
            Err(self.wait_for(cost))
        }
    }

    /// Tokens that would be available at `now`, without mutating state.
    pub(crate) fn projected(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.refill_rate).min(self.capacity)
    }

    /// Time needed to accumulate `cost` tokens from the current balance,
    /// rounded up to whole microseconds so that waking never lands short.
    fn wait_for(&self, cost: f64) -> Duration {
        let secs = (cost - self.tokens).max(0.0) / self.refill_rate;
        Duration::from_micros((secs * 1_000_000.0).ceil() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn starts_full() {
        let now = Instant::now();
        let bucket = TokenBucket::new(10.0, 3.0, now);
        assert!(approx(bucket.projected(now), 10.0));
    }

    #[test]
    fn back_to_back_takes_never_exceed_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 3.0, now);
        let granted = (0..25).filter(|_| bucket.try_take(1.0, now).is_ok()).count();
        assert_eq!(granted, 10);
    }

    #[test]
    fn shortfall_reports_exact_wait() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 4.0, now);
        assert!(bucket.try_take(10.0, now).is_ok());

        let wait = bucket.try_take(2.0, now).unwrap_err();
        assert_eq!(wait, Duration::from_millis(500));
        // nothing deducted on shortfall
        assert!(approx(bucket.projected(now), 0.0));
    }

    #[test]
    fn refill_is_linear_and_capped() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 3.0, t0);
        assert!(bucket.try_take(9.0, t0).is_ok());

        let t1 = t0 + Duration::from_secs(2);
        bucket.refill(t1);
        assert!(approx(bucket.projected(t1), 7.0));

        let t2 = t1 + Duration::from_secs(60);
        assert!(approx(bucket.projected(t2), 10.0));
    }

    #[test]
    fn stale_timestamp_refills_nothing() {
        let t0 = Instant::now();
        let later = t0 + Duration::from_secs(1);
        let mut bucket = TokenBucket::new(5.0, 1.0, t0);
        assert!(bucket.try_take(5.0, later).is_ok());
        bucket.refill(t0);
        assert!(approx(bucket.projected(later), 0.0));
    }
}
