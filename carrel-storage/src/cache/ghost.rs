//! Ghost entries and the cache that holds them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use super::key::CacheKey;
use super::memory_backend::InMemoryCache;
use super::traits::{CacheStats, KeyValueCache};

/// A cache value whose payload may be absent.
///
/// An empty ghost means "exists, content not cached". The wrapper is shared
/// through an `Arc`, so replacing the payload is visible to every holder
/// without touching the cache itself. Payload replacement is a single
/// pointer swap under a short write lock.
#[derive(Debug)]
pub struct GhostResource<T> {
    payload: RwLock<Option<Arc<T>>>,
}

impl<T> Default for GhostResource<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> GhostResource<T> {
    pub fn empty() -> Self {
        Self {
            payload: RwLock::new(None),
        }
    }

    pub fn with_payload(value: T) -> Self {
        Self {
            payload: RwLock::new(Some(Arc::new(value))),
        }
    }

    /// Current payload, if any.
    pub fn get(&self) -> Option<Arc<T>> {
        self.payload
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the payload.
    pub fn set(&self, value: T) {
        let value = Arc::new(value);
        *self.payload.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Drop the payload, keeping the wrapper alive.
    pub fn clear(&self) {
        *self.payload.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_empty(&self) -> bool {
        self.payload
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    ghost_upgrades: AtomicU64,
    bypasses: AtomicU64,
    invalidations: AtomicU64,
}

/// Key to ghost-wrapped value cache over a pluggable backend.
///
/// Every invalidation advances a generation number. A fill from a read
/// that started before an invalidation is dropped, so a value read just
/// before a commit cannot be cached after that commit's invalidation.
pub struct GhostCache<T, C = InMemoryCache<CacheKey, Arc<GhostResource<T>>>> {
    backend: C,
    counters: Counters,
    generation: AtomicU64,
    /// Shared by fills, exclusive for invalidation
    fill: RwLock<()>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync> Default for GhostCache<T> {
    fn default() -> Self {
        Self::new(InMemoryCache::new())
    }
}

impl<T, C> GhostCache<T, C>
where
    T: Send + Sync,
    C: KeyValueCache<CacheKey, Arc<GhostResource<T>>>,
{
    pub fn new(backend: C) -> Self {
        Self {
            backend,
            counters: Counters::default(),
            generation: AtomicU64::new(0),
            fill: RwLock::new(()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Look up the wrapper for `key`, counting a hit or a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<GhostResource<T>>> {
        let found = self.backend.get(key);
        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Presence check, counting a hit or a miss.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let found = self.backend.contains_key(key);
        let counter = if found {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Cache a value.
    pub fn insert(&self, key: CacheKey, value: T) -> Arc<GhostResource<T>> {
        self.put(key, Arc::new(GhostResource::with_payload(value)))
    }

    /// Cache an existence-only entry.
    pub fn insert_ghost(&self, key: CacheKey) -> Arc<GhostResource<T>> {
        self.put(key, Arc::new(GhostResource::empty()))
    }

    /// Current invalidation generation. Take it before reading the value
    /// that is later passed to [`GhostCache::fill`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Cache a value read at `generation`, unless an invalidation ran since.
    pub fn fill(&self, key: CacheKey, value: T, generation: u64) -> Option<Arc<GhostResource<T>>> {
        self.fill_with(key, Arc::new(GhostResource::with_payload(value)), generation)
    }

    /// Cache an existence-only entry observed at `generation`, unless an
    /// invalidation ran since.
    pub fn fill_ghost(&self, key: CacheKey, generation: u64) -> Option<Arc<GhostResource<T>>> {
        self.fill_with(key, Arc::new(GhostResource::empty()), generation)
    }

    fn fill_with(
        &self,
        key: CacheKey,
        ghost: Arc<GhostResource<T>>,
        generation: u64,
    ) -> Option<Arc<GhostResource<T>>> {
        let _fill = self.fill.read().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::Acquire) != generation {
            return None;
        }
        Some(self.put(key, ghost))
    }

    fn put(&self, key: CacheKey, ghost: Arc<GhostResource<T>>) -> Arc<GhostResource<T>> {
        self.backend.put(key, Arc::clone(&ghost));
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        ghost
    }

    /// Fill an existing wrapper in place.
    pub fn upgrade(&self, ghost: &GhostResource<T>, value: T) {
        ghost.set(value);
        self.counters.ghost_upgrades.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a read that skipped the cache.
    pub fn record_bypass(&self) {
        self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
    }

    fn advance_generation(&self) -> RwLockWriteGuard<'_, ()> {
        let guard = self.fill.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::AcqRel);
        guard
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let _fill = self.advance_generation();
        let removed = self.backend.remove(key);
        if removed {
            self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every entry whose key matches `predicate`.
    pub fn invalidate_where(&self, predicate: &dyn Fn(&CacheKey) -> bool) -> usize {
        let _fill = self.advance_generation();
        let removed = self.backend.remove_where(predicate);
        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    pub fn clear(&self) {
        let _fill = self.advance_generation();
        self.backend.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            ghost_upgrades: self.counters.ghost_upgrades.load(Ordering::Relaxed),
            bypasses: self.counters.bypasses.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            entry_count: self.backend.len() as u64,
        }
    }
}
