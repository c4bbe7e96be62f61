//! Cache backend trait and statistics.

/// Key-value cache backend for pluggable cache implementations.
///
/// Implementations must be safe for concurrent use. Values are expected to
/// be cheap handles (`Arc`s), so `get` returns an owned clone.
pub trait KeyValueCache<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;

    fn contains_key(&self, key: &K) -> bool;

    /// Insert or replace the value for `key`.
    fn put(&self, key: K, value: V);

    /// Remove `key`. Returns whether it was present.
    fn remove(&self, key: &K) -> bool;

    /// Remove every entry whose key matches `predicate`. Returns how many
    /// entries were removed.
    fn remove_where(&self, predicate: &dyn Fn(&K) -> bool) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries written.
    pub inserts: u64,
    /// Number of empty entries filled in place.
    pub ghost_upgrades: u64,
    /// Number of reads that skipped the cache entirely.
    pub bypasses: u64,
    /// Number of entries removed by invalidation.
    pub invalidations: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
