//! In-process cache backend on `DashMap`.

use std::hash::Hash;

use dashmap::DashMap;

use super::traits::KeyValueCache;

/// Concurrent in-memory cache with an optional entry bound.
///
/// When the bound is reached, inserting a new key evicts an arbitrary
/// existing entry.
pub struct InMemoryCache<K, V> {
    entries: DashMap<K, V>,
    max_entries: Option<usize>,
}

impl<K: Eq + Hash, V> Default for InMemoryCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> InMemoryCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: None,
        }
    }

    /// Bound the number of entries. Zero is treated as one.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max.max(1));
        self
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }
}

impl<K, V> KeyValueCache<K, V> for InMemoryCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn put(&self, key: K, value: V) {
        if let Some(max) = self.max_entries {
            if self.entries.len() >= max && !self.entries.contains_key(&key) {
                let victim = self.entries.iter().next().map(|e| e.key().clone());
                if let Some(victim) = victim {
                    self.entries.remove(&victim);
                }
            }
        }
        self.entries.insert(key, value);
    }

    fn remove(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    fn remove_where(&self, predicate: &dyn Fn(&K) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !predicate(k));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let cache: InMemoryCache<String, u32> = InMemoryCache::new();
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert!(cache.contains_key(&"a".to_string()));
        assert!(cache.remove(&"a".to_string()));
        assert!(!cache.remove(&"a".to_string()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bounded_cache_evicts() {
        let cache: InMemoryCache<u32, u32> = InMemoryCache::new().with_max_entries(2);
        cache.put(1, 1);
        cache.put(2, 2);
        cache.put(3, 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains_key(&3));

        // Replacing an existing key never evicts.
        cache.put(3, 30);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&3), Some(30));
    }

    #[test]
    fn test_remove_where() {
        let cache: InMemoryCache<u32, ()> = InMemoryCache::new();
        for i in 0..10 {
            cache.put(i, ());
        }
        assert_eq!(cache.remove_where(&|k| k % 2 == 0), 5);
        assert_eq!(cache.len(), 5);
        cache.clear();
        assert!(cache.is_empty());
    }
}
