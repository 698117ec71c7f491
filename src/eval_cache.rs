//! Per-instance evaluation result cache
//!
//! Results are keyed by evaluation key and validated by an XXH64 hash of the
//! values the evaluation read. A changed input produces a different hash, so
//! stale entries are simply never hit and age out of the LRU.

use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroUsize;
use xxhash_rust::xxh64::Xxh64;

/// Default number of cached evaluation results
pub const DEFAULT_CAPACITY: usize = 4096;

/// Hit/miss counters and current size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvalCacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to evaluate
    pub misses: u64,
    /// Entries currently held
    pub entries: usize,
}

struct CachedResult {
    input_hash: u64,
    value: Value,
}

/// LRU of evaluation results
pub struct EvalCache {
    entries: LruCache<String, CachedResult>,
    enabled: bool,
    hits: u64,
    misses: u64,
}

impl std::fmt::Debug for EvalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalCache")
            .field("enabled", &self.enabled)
            .field("stats", &self.stats())
            .finish()
    }
}

impl EvalCache {
    /// Create a cache holding at most `capacity` results (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            enabled: true,
            hits: 0,
            misses: 0,
        }
    }

    /// Hash the values at `deps` inside `scope`
    pub fn input_hash(deps: &[String], scope: &Value) -> u64 {
        let mut hasher = Xxh64::new(0);
        for dep in deps {
            hasher.update(dep.as_bytes());
            match scope.pointer(dep) {
                Some(v) => {
                    hasher.update(&[1]);
                    // Value serialization cannot fail
                    if let Ok(bytes) = serde_json::to_vec(v) {
                        hasher.update(&bytes);
                    }
                }
                None => hasher.update(&[0]),
            }
        }
        hasher.digest()
    }

    /// Look up a result computed from the same inputs
    pub fn get(&mut self, key: &str, input_hash: u64) -> Option<Value> {
        if !self.enabled {
            return None;
        }
        match self.entries.get(key) {
            Some(hit) if hit.input_hash == input_hash => {
                self.hits += 1;
                Some(hit.value.clone())
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a result
    pub fn put(&mut self, key: &str, input_hash: u64, value: Value) {
        if self.enabled {
            self.entries
                .put(key.to_string(), CachedResult { input_hash, value });
        }
    }

    /// Drop every entry and reset counters
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Turn caching on
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Turn caching off and drop held entries
    pub fn disable(&mut self) {
        self.enabled = false;
        self.entries.clear();
    }

    /// True if lookups and stores are active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Counters snapshot
    pub fn stats(&self) -> EvalCacheStats {
        EvalCacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

impl Default for EvalCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
