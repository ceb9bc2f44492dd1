//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;
use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;

use heimdall::{
    CacheConfig, Heimdall, KeyPredicate, ManualClock, RateLimitConfig, RetryConfig,
    TransportError, telemetry,
};

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for `name` carrying the label `label = value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
fn with_recorder<F: std::future::Future>(recorder: &DebuggingRecorder, fut: F) -> F::Output {
    metrics::with_local_recorder(recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    })
}

fn governor(clock: &ManualClock) -> heimdall::Governor {
    Heimdall::builder()
        .rate_limit(RateLimitConfig::new().capacity(1).refill_per_second(1.0))
        .cache(CacheConfig::new().ttl(Duration::from_secs(30)))
        .retry(
            RetryConfig::new()
                .base_delay(Duration::from_millis(10))
                .jitter(false),
        )
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn reads_record_requests_and_cache_counters() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let clock = ManualClock::new();
    let governor = governor(&clock);

    with_recorder(&recorder, async {
        for _ in 0..3 {
            governor
                .execute_read("k", || async { Ok::<_, TransportError>(json!(1)) })
                .await
                .unwrap();
        }
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 3);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 2);
    assert!(has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn retries_and_limiter_waits_are_recorded() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let clock = ManualClock::new();
    let governor = governor(&clock);

    let result = with_recorder(&recorder, async {
        governor
            .execute_write(
                || async { Err::<(), _>(TransportError::status(503, "unavailable")) },
                &[],
            )
            .await
    });
    assert!(result.is_err());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 2);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::RETRIES_TOTAL, "kind", "transient"),
        2
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "status", "error"),
        1
    );
    // capacity 1, so the second and third attempts waited for tokens
    assert!(has_histogram(&snapshot, telemetry::RATE_LIMIT_WAIT_SECONDS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn invalidations_and_decode_failures_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let clock = ManualClock::new();
    let governor = governor(&clock);

    with_recorder(&recorder, async {
        governor.cache().put("page:1", json!("text"));
        governor.cache().put("page:2", json!(2));
        // "text" does not decode as a number
        let _ = governor.cache().get_as::<u64>("page:1");
        governor.cache().invalidate(KeyPredicate::prefix("page:"));
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_ERRORS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_INVALIDATIONS_TOTAL), 1);
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let clock = ManualClock::new();
    let governor = governor(&clock);
    governor
        .execute_read("k", || async { Ok::<_, TransportError>(1u8) })
        .await
        .unwrap();
}
