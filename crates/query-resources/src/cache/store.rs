//! Cache storage backends
//!
//! The cache middleware only talks to [`CacheStore`]. The store owns
//! expiry, tag bookkeeping and concurrency: two callers asking for the same
//! missing key must not both run the query.

use crate::error::QueryResult;
use crate::result::MaterializedResult;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// What a compute callback hands back to the store on a miss
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: MaterializedResult,
    pub tags: Vec<String>,
    pub ttl: Option<Duration>,
}

impl CacheEntry {
    pub fn new(value: MaterializedResult, tags: Vec<String>, ttl: Option<Duration>) -> Self {
        Self { value, tags, ttl }
    }
}

/// Callback run by the store when a key is missing or expired
pub type ComputeFn<'a> = Box<dyn FnOnce() -> QueryResult<CacheEntry> + 'a>;

/// Tag-aware key/value store for materialized results
pub trait CacheStore: Send + Sync {
    /// Return the cached value for `key`, running `compute` on a miss
    ///
    /// Errors from `compute` are returned as is and nothing is stored.
    fn get_or_compute(&self, key: &str, compute: ComputeFn<'_>) -> QueryResult<MaterializedResult>;

    /// Drop every entry carrying at least one of the tags
    fn invalidate_tags(&self, tags: &[String]) -> usize;

    /// Drop a single entry
    fn delete(&self, key: &str) -> bool;

    /// Drop everything
    fn clear(&self);
}

#[derive(Debug)]
struct StoredEntry {
    value: MaterializedResult,
    tags: Vec<String>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

type Slot = Arc<Mutex<Option<StoredEntry>>>;

/// Process-local store
///
/// Each key has its own slot lock, so a miss on one key never blocks reads
/// of another. The compute callback runs while the slot is held; it must not
/// ask the same store for the same key.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    slots: DashMap<String, Slot>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots()
            .iter()
            .filter(|(_, slot)| slot.lock().as_ref().is_some_and(|entry| entry.is_fresh(now)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists for the key
    pub fn contains(&self, key: &str) -> bool {
        let Some(slot) = self.slots.get(key).map(|slot| Arc::clone(slot.value())) else {
            return false;
        };
        let guard = slot.lock();
        guard
            .as_ref()
            .is_some_and(|entry| entry.is_fresh(Instant::now()))
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for (key, slot) in self.slots() {
            {
                let mut guard = slot.lock();
                if guard.as_ref().is_some_and(|entry| !entry.is_fresh(now)) {
                    *guard = None;
                    removed += 1;
                }
            }
            self.prune(&key, &slot);
        }
        if removed > 0 {
            debug!(removed, "Purged expired cache entries");
        }
        removed
    }

    fn slot(&self, key: &str) -> Slot {
        // Clone the Arc out so no map shard lock is held while the slot is locked
        Arc::clone(
            self.slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }

    fn slots(&self) -> Vec<(String, Slot)> {
        self.slots
            .iter()
            .map(|slot| (slot.key().clone(), Arc::clone(slot.value())))
            .collect()
    }

    /// Remove the map entry for an empty slot nobody else holds
    ///
    /// New handles are only taken under the shard lock `remove_if` holds, so
    /// a strong count of two (map plus `slot`) means no other caller waits on it.
    fn prune(&self, key: &str, slot: &Slot) {
        self.slots.remove_if(key, |_, current| {
            Arc::ptr_eq(current, slot)
                && Arc::strong_count(current) == 2
                && current.try_lock().is_some_and(|guard| guard.is_none())
        });
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl CacheStore for InMemoryCache {
    fn get_or_compute(&self, key: &str, compute: ComputeFn<'_>) -> QueryResult<MaterializedResult> {
        let slot = self.slot(key);
        let outcome = {
            let mut guard = slot.lock();

            if let Some(entry) = guard.as_ref() {
                if entry.is_fresh(Instant::now()) {
                    trace!(key, "Cache hit");
                    return Ok(entry.value.clone());
                }
                debug!(key, "Cache entry expired");
                *guard = None;
            }

            debug!(key, "Cache miss, computing value");
            compute().map(|entry| {
                let value = entry.value.clone();
                *guard = match entry.ttl {
                    Some(ttl) if ttl.is_zero() => None,
                    ttl => Some(StoredEntry {
                        value: entry.value,
                        tags: entry.tags,
                        expires_at: ttl.map(|ttl| Instant::now() + ttl),
                    }),
                };
                value
            })
        };

        self.prune(key, &slot);
        outcome
    }

    fn invalidate_tags(&self, tags: &[String]) -> usize {
        let mut removed = 0;
        for (key, slot) in self.slots() {
            let matches = {
                let mut guard = slot.lock();
                let matches = guard
                    .as_ref()
                    .is_some_and(|entry| entry.tags.iter().any(|tag| tags.contains(tag)));
                if matches {
                    *guard = None;
                }
                matches
            };
            if matches {
                self.prune(&key, &slot);
                removed += 1;
            }
        }
        debug!(?tags, removed, "Invalidated cache tags");
        removed
    }

    fn delete(&self, key: &str) -> bool {
        let Some(slot) = self.slots.get(key).map(|slot| Arc::clone(slot.value())) else {
            return false;
        };
        let removed = slot.lock().take().is_some();
        self.prune(key, &slot);
        removed
    }

    fn clear(&self) {
        for (_, slot) in self.slots() {
            *slot.lock() = None;
        }
        self.slots.clear();
    }
}

/// Store that never keeps anything; every lookup runs the query
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl CacheStore for NullCache {
    fn get_or_compute(&self, _key: &str, compute: ComputeFn<'_>) -> QueryResult<MaterializedResult> {
        compute().map(|entry| entry.value)
    }

    fn invalidate_tags(&self, _tags: &[String]) -> usize {
        0
    }

    fn delete(&self, _key: &str) -> bool {
        false
    }

    fn clear(&self) {}
}
