//! TTL + LRU cache for remote read results.
//!
//! [`ResponseCache`] holds the results of read operations so repeated
//! reads within the TTL never reach the remote service. Values are stored
//! as `serde_json::Value`, so any serializable result can be cached and
//! decoded back by the reader.
//!
//! # Semantics
//!
//! - An entry is live iff `now - inserted_at < ttl`. Expired entries are
//!   removed lazily on access (and eagerly by [`ResponseCache::purge_expired`])
//!   and are never returned.
//! - At most `max_entries` live entries are kept. Inserting a new key into a
//!   full cache first drops expired entries, then evicts the least recently
//!   used one. Reads and writes both promote an entry to most recently used.
//! - Every operation takes the single table lock, so no caller can observe
//!   a half-applied update.
//!
//! # Degradation
//!
//! A cached value that no longer decodes into the reader's type is a cache
//! malfunction, not a caller error: the entry is dropped, the incident is
//! logged and counted, and the read is reported as a miss.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::KeyPredicate;
use crate::clock::{Clock, default_clock};
use crate::telemetry;
use crate::{HeimdallError, Result};

/// Configuration for the response cache.
///
/// ```rust
/// # use heimdall::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(500)
///     .ttl(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of live entries. Default: 100.
    pub max_entries: usize,
    /// Time-to-live for cached entries. Default: 30 seconds.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(30),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for cached entries.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(HeimdallError::Configuration(
                "cache.max_entries must be at least 1".into(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(HeimdallError::Configuration(
                "cache.ttl must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Counters describing cache behaviour since creation (or the last clear).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Live entries dropped to make room.
    pub evictions: u64,
    /// Entries dropped because their TTL ran out.
    pub expirations: u64,
    /// Entries dropped by explicit invalidation.
    pub invalidations: u64,
}

/// Internal cache malfunction. Never surfaced to callers.
#[derive(Debug, thiserror::Error)]
enum CacheError {
    #[error("cached value for '{key}' does not decode: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
    #[error("value for '{key}' cannot be cached: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

#[derive(Debug)]
struct Table {
    entries: LruCache<String, CacheEntry>,
    stats: CacheStats,
    /// Bumped by every invalidation and clear.
    generation: u64,
}

impl Table {
    /// Live value for `key`, promoted to most recently used.
    ///
    /// Absent and expired keys are recorded as misses and expired entries
    /// are removed. A found value is not yet recorded as a hit.
    fn live(&mut self, key: &str, now: Instant) -> Option<&Value> {
        let live = self.entries.peek(key).map(|entry| entry.is_live(now));
        match live {
            Some(true) => self.entries.get(key).map(|entry| &entry.value),
            Some(false) => {
                self.entries.pop(key);
                self.stats.expirations += 1;
                self.record_miss(key);
                None
            }
            None => {
                self.record_miss(key);
                None
            }
        }
    }

    fn record_hit(&mut self, key: &str) {
        self.stats.hits += 1;
        metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        debug!(key, "cache hit");
    }

    fn record_miss(&mut self, key: &str) {
        self.stats.misses += 1;
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
        debug!(key, "cache miss");
    }

    /// Insert `entry`, making room first if `key` is new and the table is full.
    fn insert(&mut self, key: String, entry: CacheEntry, max_entries: usize) {
        if !self.entries.contains(key.as_str()) && self.entries.len() >= max_entries {
            self.purge_expired(entry.inserted_at);
            if self.entries.len() >= max_entries
                && let Some((evicted, _)) = self.entries.pop_lru()
            {
                self.stats.evictions += 1;
                metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(1);
                debug!(key = %evicted, "cache evicted least recently used entry");
            }
        }
        self.entries.put(key, entry);
    }

    /// Remove every expired entry, returning how many were dropped.
    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key.as_str());
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }
}

/// In-memory TTL + LRU cache for read results. See module docs.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    table: Mutex<Table>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, default_clock())
    }

    /// Create a cache whose expiry is driven by a custom clock.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let capacity = NonZeroUsize::new(config.max_entries).ok_or_else(|| {
            HeimdallError::Configuration("cache.max_entries must be at least 1".into())
        })?;
        Ok(Self {
            table: Mutex::new(Table {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
                generation: 0,
            }),
            config,
            clock,
        })
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Configured capacity.
    pub fn max_entries(&self) -> usize {
        self.config.max_entries
    }

    /// Look up a live entry, promoting it to most recently used.
    ///
    /// Returns `None` when the key is absent or expired (expired entries are
    /// removed).
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut table = self.table.lock();
        let value = table.live(key, now)?.clone();
        table.record_hit(key);
        Some(value)
    }

    /// Insert or overwrite `key` with the configured TTL.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.put_with_ttl(key, value, self.config.ttl);
    }

    /// Insert or overwrite `key` with its own TTL.
    ///
    /// The entry becomes most recently used. If `key` is new and the cache
    /// is full, expired entries are dropped first and then, if still full,
    /// the least recently used entry is evicted.
    pub fn put_with_ttl(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
            ttl,
        };
        self.table
            .lock()
            .insert(key.into(), entry, self.config.max_entries);
    }

    /// Current invalidation generation.
    ///
    /// A reader that records the generation before fetching can store its
    /// result with [`put_if_generation`](Self::put_if_generation) so that a
    /// write which invalidated in the meantime is not undone.
    pub fn generation(&self) -> u64 {
        self.table.lock().generation
    }

    /// Store `value` only if no invalidation happened since `generation`
    /// was observed. Returns whether the value was stored.
    pub fn put_if_generation(&self, key: impl Into<String>, value: Value, generation: u64) -> bool {
        let key = key.into();
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
            ttl: self.config.ttl,
        };
        let mut table = self.table.lock();
        if table.generation != generation {
            debug!(key, "skipping cache fill, invalidated during fetch");
            return false;
        }
        table.insert(key, entry, self.config.max_entries);
        true
    }

    /// Remove every entry selected by `predicate`. Returns the number removed.
    pub fn invalidate(&self, predicate: impl Into<KeyPredicate>) -> usize {
        let predicate = predicate.into();
        let mut table = self.table.lock();
        table.generation += 1;
        let doomed: Vec<String> = table
            .entries
            .iter()
            .filter(|(key, _)| predicate.matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            table.entries.pop(key.as_str());
        }
        table.stats.invalidations += doomed.len() as u64;
        if !doomed.is_empty() {
            metrics::counter!(telemetry::CACHE_INVALIDATIONS_TOTAL).increment(doomed.len() as u64);
            debug!(?predicate, removed = doomed.len(), "cache invalidated");
        }
        doomed.len()
    }

    /// Remove all entries and reset statistics.
    pub fn clear(&self) {
        let mut table = self.table.lock();
        table.entries.clear();
        table.stats = CacheStats::default();
        table.generation += 1;
    }

    /// Eagerly remove expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.table.lock().purge_expired(now)
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.table
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.table
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .count()
    }

    /// Whether the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStats {
        self.table.lock().stats
    }

    /// Look up `key` and decode it into `T`.
    ///
    /// A value that fails to decode is dropped and counted as a miss. The
    /// lookup, decode and removal happen under one lock, so a concurrent
    /// `put` of a fresh value is never the one removed.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        let mut table = self.table.lock();
        let decoded = T::deserialize(table.live(key, now)?);
        match decoded {
            Ok(value) => {
                table.record_hit(key);
                Some(value)
            }
            Err(source) => {
                table.entries.pop(key);
                table.record_miss(key);
                drop(table);
                self.degrade(CacheError::Decode {
                    key: key.to_string(),
                    source,
                });
                None
            }
        }
    }

    /// Encode `value` and store it under `key`.
    ///
    /// Values that cannot be encoded are simply not cached.
    pub fn put_as<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        let key = key.into();
        if let Some(encoded) = self.encode(&key, value) {
            self.put(key, encoded);
        }
    }

    /// [`put_as`](Self::put_as) guarded by [`put_if_generation`](Self::put_if_generation).
    pub fn put_as_if_generation<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        generation: u64,
    ) -> bool {
        let key = key.into();
        match self.encode(&key, value) {
            Some(encoded) => self.put_if_generation(key, encoded, generation),
            None => false,
        }
    }

    fn encode<T: Serialize>(&self, key: &str, value: &T) -> Option<Value> {
        match serde_json::to_value(value) {
            Ok(encoded) => Some(encoded),
            Err(source) => {
                self.degrade(CacheError::Encode {
                    key: key.to_string(),
                    source,
                });
                None
            }
        }
    }

    fn degrade(&self, err: CacheError) {
        metrics::counter!(telemetry::CACHE_ERRORS_TOTAL).increment(1);
        warn!(error = %err, "cache malfunction, treating as miss");
    }
}
