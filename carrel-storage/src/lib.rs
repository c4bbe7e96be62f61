//! CARREL Storage - Storage Engine Boundary and Caching
//!
//! Defines the [`StorageEngine`] trait the request pipeline persists
//! through, an in-memory engine with per-thread transactions, and the
//! ghost cache used by the caching facade.

pub mod cache;
pub mod memory;

pub use cache::{
    page_path, BackendDescriptor, BackendKind, CacheKey, CacheKeyResolver, CacheStats,
    GhostCache, GhostResource, InMemoryCache, KeyValueCache,
};
pub use memory::InMemoryStorage;

use carrel_core::{
    Activity, Association, Comment, LogFilter, Rating, RegistryResult, Resource,
    TaggedResourcePath, Tagging,
};

// ============================================================================
// STORAGE ENGINE TRAIT
// ============================================================================

/// Persistence for resources, versions, associations and community data.
///
/// Reads return `Ok(None)` for a missing path; raising `NotFound` is the
/// caller's decision. Writes to a missing path fail with `NotFound`.
/// Paths may carry `;version:N` on reads to address an archived snapshot.
///
/// Transactions are thread-scoped and do not nest: every registry
/// operation opens exactly one and ends it with exactly one of commit or
/// rollback.
pub trait StorageEngine: Send + Sync {
    // === Resource Operations ===

    /// Get a resource with its full content.
    fn get(&self, path: &str) -> RegistryResult<Option<Resource>>;

    /// Get a collection with only the children in `[start, start + page_size)`.
    fn get_collection(
        &self,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> RegistryResult<Option<Resource>>;

    fn exists(&self, path: &str) -> RegistryResult<bool>;

    /// Get a resource without its content.
    fn get_meta_data(&self, path: &str) -> RegistryResult<Option<Resource>>;

    /// Add or update a resource, creating missing ancestors. Returns the
    /// stored path.
    fn put(&self, path: &str, resource: &Resource) -> RegistryResult<String>;

    /// Store a resource imported from `source_url`.
    fn import(&self, path: &str, source_url: &str, resource: &Resource) -> RegistryResult<String>;

    /// Delete a resource and its subtree.
    fn delete(&self, path: &str) -> RegistryResult<()>;

    /// Rename within the parent collection; an absolute `new_name` moves.
    fn rename(&self, current_path: &str, new_name: &str) -> RegistryResult<String>;

    fn move_resource(&self, current_path: &str, new_path: &str) -> RegistryResult<String>;

    fn copy(&self, source_path: &str, target_path: &str) -> RegistryResult<String>;

    // === Version Operations ===

    /// Snapshot the current state of a resource. Returns the snapshot number.
    fn create_snapshot(&self, path: &str) -> RegistryResult<u64>;

    /// Versioned paths of every snapshot, oldest first.
    fn list_versions(&self, path: &str) -> RegistryResult<Vec<String>>;

    fn restore_version(&self, versioned_path: &str) -> RegistryResult<()>;

    /// Remove one snapshot. Returns whether it existed.
    fn remove_version_history(&self, path: &str, snapshot_id: u64) -> RegistryResult<bool>;

    // === Association Operations ===

    fn add_association(&self, association: &Association) -> RegistryResult<()>;

    fn remove_association(&self, association: &Association) -> RegistryResult<()>;

    /// Associations where `path` is the source or the destination.
    fn associations(&self, path: &str) -> RegistryResult<Vec<Association>>;

    // === Tag Operations ===

    fn add_tagging(&self, tagging: &Tagging) -> RegistryResult<()>;

    fn taggings(&self, path: &str) -> RegistryResult<Vec<Tagging>>;

    /// Remove taggings of `tag` on `path`, only `user`'s when given.
    /// Returns how many were removed.
    fn remove_taggings(&self, path: &str, tag: &str, user: Option<&str>) -> RegistryResult<usize>;

    fn paths_with_tag(&self, tag: &str) -> RegistryResult<Vec<TaggedResourcePath>>;

    // === Comment Operations ===

    fn add_comment(&self, path: &str, user: &str, text: &str) -> RegistryResult<Comment>;

    fn get_comment(&self, id: u64) -> RegistryResult<Option<Comment>>;

    fn update_comment(&self, id: u64, text: &str) -> RegistryResult<()>;

    fn remove_comment(&self, id: u64) -> RegistryResult<()>;

    fn comments(&self, path: &str) -> RegistryResult<Vec<Comment>>;

    // === Rating Operations ===

    fn rating(&self, path: &str, user: &str) -> RegistryResult<Option<u8>>;

    /// Add or replace a user's rating.
    fn set_rating(&self, path: &str, user: &str, rating: u8) -> RegistryResult<()>;

    fn remove_rating(&self, path: &str, user: &str) -> RegistryResult<()>;

    fn ratings(&self, path: &str) -> RegistryResult<Vec<Rating>>;

    // === Activity Log ===

    fn add_log(&self, activity: &Activity) -> RegistryResult<()>;

    fn logs(&self, filter: &LogFilter) -> RegistryResult<Vec<Activity>>;

    // === Dump / Restore ===

    /// Serialize the subtree at `path`.
    fn dump(&self, path: &str) -> RegistryResult<Vec<u8>>;

    /// Recreate a dumped subtree under `path`.
    fn restore(&self, path: &str, dump: &[u8]) -> RegistryResult<()>;

    // === Transactions ===

    fn begin_transaction(&self) -> RegistryResult<()>;

    fn commit_transaction(&self) -> RegistryResult<()>;

    fn rollback_transaction(&self) -> RegistryResult<()>;

    // === Caching ===

    /// Paths the caching layer must never cache.
    fn is_no_cache_path(&self, path: &str) -> bool;
}
