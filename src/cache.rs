//! Search result cache.
//!
//! A small LRU keyed by a hash of the search parameters, with a TTL so
//! replica lag cannot pin stale results forever. Shards signal writes
//! through the fire-and-forget [`CacheInvalidator`] side channel; the
//! core itself never reads the cache.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::metrics;
use crate::storage::Hit;

/// Fire-and-forget invalidation signal, called after every committed
/// `index` or `sync`. Absence only risks stale reads, never wrong writes.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self);
}

struct CachedResult {
    hits: Vec<Hit>,
    cached_at: Instant,
}

pub struct ResultCache {
    entries: Mutex<LruCache<String, CachedResult>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(max_entries: usize, ttl_secs: u64) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("non-zero capacity");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<Hit>> {
        let mut entries = self.entries.lock();
        if let Some(cached) = entries.get(key) {
            if cached.cached_at.elapsed() < self.ttl {
                metrics::global().cache_hits.inc();
                return Some(cached.hits.clone());
            }
            entries.pop(key);
        }
        metrics::global().cache_misses.inc();
        None
    }

    pub fn put(&self, key: String, hits: Vec<Hit>) {
        self.entries.lock().put(
            key,
            CachedResult {
                hits,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(1_000, 60)
    }
}

impl CacheInvalidator for ResultCache {
    fn invalidate(&self) {
        self.clear();
    }
}

/// Cache key for a search against `shard`.
pub fn search_cache_key(shard: &str, query: &str, include_cold: bool, max: usize) -> String {
    let mut hasher = DefaultHasher::new();
    shard.hash(&mut hasher);
    query.hash(&mut hasher);
    include_cold.hash(&mut hasher);
    max.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}
