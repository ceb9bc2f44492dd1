//! End-to-end tests of the read/write pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use heimdall::{
    CacheConfig, CacheKey, Governor, GovernorConfig, Heimdall, HeimdallError, KeyPredicate,
    ManualClock, RateLimitConfig, RetryConfig, TransportError,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Task {
    id: u32,
    done: bool,
}

fn governor() -> (Governor, ManualClock) {
    let clock = ManualClock::new();
    let governor = Heimdall::builder()
        .rate_limit(RateLimitConfig::new().capacity(10).refill_per_second(3.0))
        .cache(CacheConfig::new().ttl(Duration::from_secs(30)).max_entries(100))
        .retry(
            RetryConfig::new()
                .base_delay(Duration::from_millis(100))
                .jitter(false),
        )
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    (governor, clock)
}

/// Counts remote calls and returns a fixed list of tasks.
struct Remote {
    calls: AtomicU32,
}

impl Remote {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn list(&self) -> Result<Vec<Task>, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(vec![Task {
            id: n,
            done: false,
        }])
    }

    async fn update(&self) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(json!({"ok": true}))
    }

    async fn reject(&self) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(TransportError::status(400, "validation failed").with_code("validation_error"))
    }
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn second_read_is_served_from_cache() {
    let (governor, _clock) = governor();
    let remote = Remote::new();

    let first = governor.execute_read("tasks:db-1", || remote.list()).await.unwrap();
    let second = governor.execute_read("tasks:db-1", || remote.list()).await.unwrap();

    assert_eq!(remote.calls(), 1);
    assert!(!first.cached);
    assert_eq!(first.attempt_count(), 1);
    assert!(second.cached);
    assert_eq!(second.attempt_count(), 0);
    assert_eq!(first.value, second.value);
}

#[tokio::test]
async fn cache_hit_takes_no_limiter_token() {
    let (governor, _clock) = governor();
    let remote = Remote::new();

    governor.execute_read("k", || remote.list()).await.unwrap();
    let before = governor.limiter().available_tokens();
    for _ in 0..20 {
        governor.execute_read("k", || remote.list()).await.unwrap();
    }
    assert_eq!(governor.limiter().available_tokens(), before);
    assert_eq!(remote.calls(), 1);
}

#[tokio::test]
async fn expired_entry_is_refetched() {
    let (governor, clock) = governor();
    let remote = Remote::new();

    governor.execute_read("k", || remote.list()).await.unwrap();
    clock.advance(Duration::from_secs(31));
    let again = governor.execute_read("k", || remote.list()).await.unwrap();

    assert_eq!(remote.calls(), 2);
    assert!(!again.cached);
    assert_eq!(again.value[0].id, 1);
}

#[tokio::test]
async fn failed_read_is_not_cached() {
    let (governor, clock) = governor();
    let remote = Remote::new();
    let calls = AtomicU32::new(0);

    let err = governor
        .execute_read("k", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err::<Vec<Task>, _>(TransportError::status(404, "missing")) }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HeimdallError::Rejected { .. }));
    assert_eq!(err.attempts(), 1);
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert_eq!(clock.elapsed(), Duration::ZERO);
    assert!(!governor.cache().contains("k"));

    governor.execute_read("k", || remote.list()).await.unwrap();
    assert_eq!(remote.calls(), 1);
}

#[tokio::test]
async fn read_exhausts_attempts_on_server_errors() {
    let (governor, _clock) = governor();
    let calls = AtomicU32::new(0);

    let err = governor
        .execute_read("k", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err::<Vec<Task>, _>(TransportError::status(500, "boom")) }
        })
        .await
        .unwrap_err();

    assert!(err.is_retries_exhausted());
    assert_eq!(err.attempts(), 3);
    assert_eq!(err.kind(), Some(heimdall::ErrorKind::Transient));
    assert_eq!(calls.load(Ordering::Relaxed), 3);
    assert!(!governor.cache().contains("k"));
    assert!(governor.cache().is_empty());
}

#[tokio::test]
async fn write_exhausts_attempts_and_keeps_cache() {
    let (governor, _clock) = governor();
    let remote = Remote::new();
    governor.execute_read("page:1", || remote.list()).await.unwrap();
    let calls = AtomicU32::new(0);

    let err = governor
        .execute_write(
            || {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err::<Value, _>(TransportError::status(503, "unavailable")) }
            },
            &[KeyPredicate::prefix("page:")],
        )
        .await
        .unwrap_err();

    assert!(err.is_retries_exhausted());
    assert_eq!(err.attempts(), 3);
    assert_eq!(calls.load(Ordering::Relaxed), 3);
    assert!(governor.cache().contains("page:1"));
}

#[tokio::test(start_paused = true)]
async fn read_abandoned_during_backoff_writes_nothing() {
    let governor = Heimdall::builder()
        .rate_limit(RateLimitConfig::new().capacity(2).refill_per_second(0.1))
        .retry(
            RetryConfig::new()
                .base_delay(Duration::from_secs(1))
                .jitter(false),
        )
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(500),
        governor.execute_read("k", || {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if n == 0 {
                    Err(TransportError::status(503, "unavailable"))
                } else {
                    Ok(json!({"attempt": n}))
                }
            }
        }),
    )
    .await;

    assert!(abandoned.is_err(), "read should still be backing off");
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    assert!(!governor.cache().contains("k"));
    // only the first attempt's token was taken: 1 left plus 0.05 refilled
    let available = governor.limiter().available_tokens();
    assert!((1.0..1.1).contains(&available), "available {available}");

    // a later read fetches again and fills the cache normally
    let done = governor
        .execute_read("k", || async { Ok::<_, TransportError>(json!("fresh")) })
        .await
        .unwrap();
    assert!(!done.cached);
    assert!(governor.cache().contains("k"));
}

#[tokio::test]
async fn undecodable_cache_entry_falls_back_to_remote() {
    let (governor, _clock) = governor();
    let remote = Remote::new();
    governor.cache().put("k", json!("not a task list"));

    let done = governor.execute_read("k", || remote.list()).await.unwrap();

    assert!(!done.cached);
    assert_eq!(remote.calls(), 1);
    // the fresh value replaced the broken one
    let cached: Option<Vec<Task>> = governor.cache().get_as("k");
    assert_eq!(cached, Some(done.value));
}

#[tokio::test]
async fn throttled_read_retries_then_caches() {
    let (governor, clock) = governor();
    let calls = AtomicU32::new(0);

    let done = governor
        .execute_read("k", || {
            let n = calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if n == 0 {
                    Err(TransportError::throttled(Some(Duration::from_secs(2))))
                } else {
                    Ok(json!({"page": n}))
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(done.attempt_count(), 2);
    assert!(clock.elapsed() >= Duration::from_secs(2));
    assert!(governor.cache().contains("k"));
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn write_invalidates_matching_reads() {
    let (governor, _clock) = governor();
    let remote = Remote::new();
    let db1 = CacheKey::new("tasks").with("db-1");
    let db2 = CacheKey::new("tasks").with("db-2");

    governor.execute_read(db1.clone().with(false), || remote.list()).await.unwrap();
    governor.execute_read(db1.clone().with(true), || remote.list()).await.unwrap();
    governor.execute_read(db2.clone().with(false), || remote.list()).await.unwrap();

    governor
        .execute_write(|| remote.update(), &[db1.family()])
        .await
        .unwrap();

    let cache = governor.cache();
    assert!(!cache.contains("tasks:db-1:false"));
    assert!(!cache.contains("tasks:db-1:true"));
    assert!(cache.contains("tasks:db-2:false"));

    let refetched = governor
        .execute_read(db1.with(false), || remote.list())
        .await
        .unwrap();
    assert!(!refetched.cached);
}

#[tokio::test]
async fn writes_are_never_cached() {
    let (governor, _clock) = governor();
    let remote = Remote::new();

    governor.execute_write(|| remote.update(), &[]).await.unwrap();
    governor.execute_write(|| remote.update(), &[]).await.unwrap();
    assert_eq!(remote.calls(), 2);
    assert!(governor.cache().is_empty());
}

#[tokio::test]
async fn failed_write_leaves_cache_alone() {
    let (governor, _clock) = governor();
    let remote = Remote::new();
    governor.execute_read("page:1", || remote.list()).await.unwrap();

    let err = governor
        .execute_write(|| remote.reject(), &[KeyPredicate::prefix("page:")])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(heimdall::ErrorKind::Client));
    assert_eq!(err.attempts(), 1);
    assert!(governor.cache().contains("page:1"));
}

#[tokio::test]
async fn write_during_read_prevents_stale_fill() {
    let (governor, _clock) = governor();
    let governor = Arc::new(governor);
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = tokio::sync::Mutex::new(Some(release_rx));

    let reader = {
        let governor = governor.clone();
        async move {
            governor
                .execute_read("page:1", || async {
                    if let Some(rx) = release_rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    Ok::<_, TransportError>(json!("before write"))
                })
                .await
        }
    };
    let writer = async {
        // let the reader start its fetch first
        tokio::task::yield_now().await;
        governor
            .execute_write(
                || async { Ok::<_, TransportError>(json!(null)) },
                &[KeyPredicate::exact("page:1")],
            )
            .await
            .unwrap();
        let _ = release_tx.send(());
    };

    let (read, ()) = tokio::join!(reader, writer);
    assert_eq!(read.unwrap().value, json!("before write"));
    assert!(!governor.cache().contains("page:1"));
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn governor_from_config() {
    let config = GovernorConfig::from_toml_str(
        r#"
        [rateLimit]
        capacity = 2
        refillPerSecond = 1.0

        [cache]
        maxEntries = 1
        "#,
    )
    .unwrap();
    let governor = Governor::from_config(&config).unwrap();

    assert_eq!(governor.limiter().capacity(), 2);
    assert_eq!(governor.cache().max_entries(), 1);
    assert_eq!(governor.executor().config().max_attempts, 3);
}

#[test]
fn invalid_builder_settings_fail_fast() {
    let result = Heimdall::builder()
        .rate_limit(RateLimitConfig::new().capacity(0))
        .build();
    assert!(matches!(result, Err(HeimdallError::Configuration(_))));

    let result = Heimdall::builder()
        .rate_limit(RateLimitConfig::new().capacity(1))
        .retry(RetryConfig::new().attempt_cost(2))
        .build();
    assert!(result.is_err());
}
