//! Time-boxed, size-bounded memoization of read results.
//!
//! Entries are keyed by logical query key (`"contacts:all"`,
//! `"contacts:journey_id:eq:\"...\""`). Expiry is lazy: there is no
//! background sweep, but no stale-past-TTL value is ever returned. Above
//! capacity the least-recently-used entry is evicted. Staleness
//! (`stale_time`) is a separate, softer knob than TTL: a live-but-stale
//! entry is still served, flagged so the caller can revalidate in the
//! background instead of blocking.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use shepherd_core::{BackendErrorCode, DataError, DataLayerConfig, DataResult};

use crate::dedupe::RequestDeduplicator;

/// Hit/miss accounting for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct CacheEntry {
    value: Arc<serde_json::Value>,
    inserted_at: Instant,
    ttl: Duration,
    /// Logical access clock value; lowest is evicted first.
    last_used: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }

    fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.inserted_at)
    }
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Monotonic access counter backing the LRU ordering.
    clock: u64,
    stats: CacheStats,
}

/// A cache read result carrying freshness metadata.
///
/// Callers that can tolerate staleness check [`CachedRead::is_stale`] and
/// trigger a background refresh; callers that cannot should invalidate and
/// refetch instead. No value past its TTL ever reaches this wrapper.
#[derive(Debug, Clone)]
pub struct CachedRead<T> {
    value: T,
    age: Duration,
    was_hit: bool,
    is_stale: bool,
}

impl<T> CachedRead<T> {
    fn from_cache(value: T, age: Duration, is_stale: bool) -> Self {
        Self {
            value,
            age,
            was_hit: true,
            is_stale,
        }
    }

    fn from_fetch(value: T) -> Self {
        Self {
            value,
            age: Duration::ZERO,
            was_hit: false,
            is_stale: false,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// How long ago the value was inserted (zero for a fresh fetch).
    pub fn age(&self) -> Duration {
        self.age
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_hit
    }

    /// Live but older than the configured `stale_time`.
    pub fn is_stale(&self) -> bool {
        self.is_stale
    }
}

/// Time-boxed, size-bounded query cache with single-flight population.
pub struct QueryCache {
    inner: Mutex<CacheInner>,
    single_flight: Arc<RequestDeduplicator>,
    default_ttl: Duration,
    stale_time: Duration,
    max_entries: usize,
    touch_on_read: bool,
}

impl QueryCache {
    pub fn new(config: &DataLayerConfig, single_flight: Arc<RequestDeduplicator>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                clock: 0,
                stats: CacheStats::default(),
            }),
            single_flight,
            default_ttl: config.cache_default_ttl(),
            stale_time: config.stale_time(),
            max_entries: config.cache_max_entries,
            touch_on_read: config.touch_on_read,
        }
    }

    /// Look up a live entry and deserialize it.
    ///
    /// Returns `None` on miss or TTL expiry; an expired entry is removed on
    /// the spot (lazy expiry). When `touch_on_read` is configured, a hit
    /// slides the entry's insertion time forward.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CachedRead<T>> {
        let raw = self.get_raw(key)?;
        match serde_json::from_value::<T>(raw.value().as_ref().clone()) {
            Ok(decoded) => Some(CachedRead {
                value: decoded,
                age: raw.age,
                was_hit: raw.was_hit,
                is_stale: raw.is_stale,
            }),
            Err(err) => {
                // A shape mismatch means the entry was written by older
                // code; drop it and treat as a miss.
                tracing::warn!(key, %err, "dropping undecodable cache entry");
                self.invalidate(key);
                None
            }
        }
    }

    /// Look up a live entry without deserializing.
    pub fn get_raw(&self, key: &str) -> Option<CachedRead<Arc<serde_json::Value>>> {
        let now = Instant::now();
        let mut inner = lock_inner(&self.inner);
        inner.clock += 1;
        let clock = inner.clock;

        enum Lookup<T> {
            Miss,
            Expired,
            Hit(T),
        }

        let stale_time = self.stale_time;
        let touch = self.touch_on_read;
        let lookup = match inner.entries.get_mut(key) {
            None => Lookup::Miss,
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) => {
                entry.last_used = clock;
                let age = entry.age(now);
                if touch {
                    entry.inserted_at = now;
                }
                Lookup::Hit(CachedRead::from_cache(
                    Arc::clone(&entry.value),
                    age,
                    age >= stale_time,
                ))
            }
        };

        match lookup {
            Lookup::Miss => {
                inner.stats.misses += 1;
                None
            }
            Lookup::Expired => {
                inner.entries.remove(key);
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                None
            }
            Lookup::Hit(read) => {
                inner.stats.hits += 1;
                Some(read)
            }
        }
    }

    /// Insert or overwrite an entry, serializing the value.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> DataResult<()> {
        let raw = serde_json::to_value(value).map_err(|err| DataError::Unknown {
            code: BackendErrorCode::Internal,
            reason: format!("cache serialization failed: {err}"),
        })?;
        self.set_raw(key, Arc::new(raw), ttl);
        Ok(())
    }

    /// Insert or overwrite an entry with an already-serialized value.
    pub fn set_raw(&self, key: &str, value: Arc<serde_json::Value>, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut inner = lock_inner(&self.inner);
        inner.clock += 1;
        let clock = inner.clock;

        // Make room before inserting so entry N+1 evicts exactly one victim.
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_entries {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                tracing::debug!(key = %victim, "evicting least-recently-used cache entry");
                inner.entries.remove(&victim);
                inner.stats.evictions += 1;
            }
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                ttl: ttl.unwrap_or(self.default_ttl),
                last_used: clock,
            },
        );
    }

    /// Read-through population: return the live entry if present, otherwise
    /// run `producer` under single-flight semantics for `key`, store the
    /// result, and return it.
    ///
    /// Concurrent callers for the same key share one producer invocation
    /// (and one insert); the guarantee comes from [`RequestDeduplicator`].
    pub async fn get_or_fetch<F>(
        self: &Arc<Self>,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> DataResult<CachedRead<Arc<serde_json::Value>>>
    where
        F: Future<Output = DataResult<serde_json::Value>> + Send + 'static,
    {
        if let Some(read) = self.get_raw(key) {
            return Ok(read);
        }

        let cache = Arc::clone(self);
        let owned_key = key.to_string();
        let value = self
            .single_flight
            .dedupe(key, async move {
                let value = Arc::new(producer.await?);
                cache.set_raw(&owned_key, Arc::clone(&value), ttl);
                Ok(value)
            })
            .await?;
        Ok(CachedRead::from_fetch(value))
    }

    /// Remove one key. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        lock_inner(&self.inner).entries.remove(key).is_some()
    }

    /// Remove every key with the given string prefix; used after mutations
    /// to drop all cached reads that might now be stale. Returns the number
    /// of entries removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut inner = lock_inner(&self.inner);
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - inner.entries.len();
        if removed > 0 {
            tracing::debug!(prefix, removed, "invalidated cache entries by prefix");
        }
        removed
    }

    pub fn len(&self) -> usize {
        lock_inner(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        lock_inner(&self.inner).stats
    }
}

fn lock_inner(inner: &Mutex<CacheInner>) -> MutexGuard<'_, CacheInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// TESTS
// =============================================================================
