//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdall operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdall_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation`: pipeline entry point ("read" | "write") or caller label
//! - `status`: outcome: "ok" or "error"
//! - `kind`: error classification ("throttled" | "transient" | "client")

/// Total operations completed by the governor.
///
/// Labels: `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "heimdall_requests_total";

/// Operation duration in seconds, including limiter waits and retries.
///
/// Labels: `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "heimdall_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `operation`, `kind`.
pub const RETRIES_TOTAL: &str = "heimdall_retries_total";

/// Time spent suspended in the token bucket, in seconds.
pub const RATE_LIMIT_WAIT_SECONDS: &str = "heimdall_rate_limit_wait_seconds";

/// Total cache hits.
pub const CACHE_HITS_TOTAL: &str = "heimdall_cache_hits_total";

/// Total cache misses (absent or expired).
pub const CACHE_MISSES_TOTAL: &str = "heimdall_cache_misses_total";

/// Total entries evicted to make room (LRU).
pub const CACHE_EVICTIONS_TOTAL: &str = "heimdall_cache_evictions_total";

/// Total entries removed by explicit invalidation.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "heimdall_cache_invalidations_total";

/// Cache malfunctions degraded to a miss (e.g. undecodable cached value).
pub const CACHE_ERRORS_TOTAL: &str = "heimdall_cache_errors_total";
