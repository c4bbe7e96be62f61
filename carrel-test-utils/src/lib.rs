//! CARREL Test Utilities
//!
//! Centralized test infrastructure for the CARREL workspace:
//! - A recording storage engine that counts every call
//! - A scripted authorizer
//! - Proptest generators for paths, tags and resources
//! - Test fixtures and custom assertions

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

pub use carrel_core::{
    Action, Activity, Association, Authorizer, Comment, DatabaseConfig, LogFilter, MountEntry,
    MountTable, MountTarget, Rating, RegistryConfig, RegistryError, RegistryResult, Resource,
    TaggedResourcePath, Tagging, TenantId, ValidationError,
};
pub use carrel_storage::{InMemoryStorage, StorageEngine};

// ============================================================================
// RECORDING STORAGE
// ============================================================================

/// Storage calls that change persistent state.
pub const MUTATING_CALLS: &[&str] = &[
    "put",
    "import",
    "delete",
    "rename",
    "move_resource",
    "copy",
    "create_snapshot",
    "restore_version",
    "remove_version_history",
    "add_association",
    "remove_association",
    "add_tagging",
    "remove_taggings",
    "add_comment",
    "update_comment",
    "remove_comment",
    "set_rating",
    "remove_rating",
    "add_log",
    "restore",
];

/// In-memory storage that counts calls per method.
#[derive(Default)]
pub struct RecordingStorage {
    inner: InMemoryStorage,
    calls: Mutex<BTreeMap<&'static str, usize>>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inner(inner: InMemoryStorage) -> Self {
        Self {
            inner,
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    fn record(&self, method: &'static str) {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(method)
            .or_default() += 1;
    }

    /// Number of calls to `method` so far.
    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// Total calls to any of [`MUTATING_CALLS`].
    pub fn mutations(&self) -> usize {
        MUTATING_CALLS.iter().map(|m| self.calls(m)).sum()
    }

    pub fn begins(&self) -> usize {
        self.calls("begin_transaction")
    }

    pub fn commits(&self) -> usize {
        self.calls("commit_transaction")
    }

    pub fn rollbacks(&self) -> usize {
        self.calls("rollback_transaction")
    }

    pub fn reset(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl StorageEngine for RecordingStorage {
    fn get(&self, path: &str) -> RegistryResult<Option<Resource>> {
        self.record("get");
        self.inner.get(path)
    }

    fn get_collection(
        &self,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> RegistryResult<Option<Resource>> {
        self.record("get_collection");
        self.inner.get_collection(path, start, page_size)
    }

    fn exists(&self, path: &str) -> RegistryResult<bool> {
        self.record("exists");
        self.inner.exists(path)
    }

    fn get_meta_data(&self, path: &str) -> RegistryResult<Option<Resource>> {
        self.record("get_meta_data");
        self.inner.get_meta_data(path)
    }

    fn put(&self, path: &str, resource: &Resource) -> RegistryResult<String> {
        self.record("put");
        self.inner.put(path, resource)
    }

    fn import(&self, path: &str, source_url: &str, resource: &Resource) -> RegistryResult<String> {
        self.record("import");
        self.inner.import(path, source_url, resource)
    }

    fn delete(&self, path: &str) -> RegistryResult<()> {
        self.record("delete");
        self.inner.delete(path)
    }

    fn rename(&self, current_path: &str, new_name: &str) -> RegistryResult<String> {
        self.record("rename");
        self.inner.rename(current_path, new_name)
    }

    fn move_resource(&self, current_path: &str, new_path: &str) -> RegistryResult<String> {
        self.record("move_resource");
        self.inner.move_resource(current_path, new_path)
    }

    fn copy(&self, source_path: &str, target_path: &str) -> RegistryResult<String> {
        self.record("copy");
        self.inner.copy(source_path, target_path)
    }

    fn create_snapshot(&self, path: &str) -> RegistryResult<u64> {
        self.record("create_snapshot");
        self.inner.create_snapshot(path)
    }

    fn list_versions(&self, path: &str) -> RegistryResult<Vec<String>> {
        self.record("list_versions");
        self.inner.list_versions(path)
    }

    fn restore_version(&self, versioned_path: &str) -> RegistryResult<()> {
        self.record("restore_version");
        self.inner.restore_version(versioned_path)
    }

    fn remove_version_history(&self, path: &str, snapshot_id: u64) -> RegistryResult<bool> {
        self.record("remove_version_history");
        self.inner.remove_version_history(path, snapshot_id)
    }

    fn add_association(&self, association: &Association) -> RegistryResult<()> {
        self.record("add_association");
        self.inner.add_association(association)
    }

    fn remove_association(&self, association: &Association) -> RegistryResult<()> {
        self.record("remove_association");
        self.inner.remove_association(association)
    }

    fn associations(&self, path: &str) -> RegistryResult<Vec<Association>> {
        self.record("associations");
        self.inner.associations(path)
    }

    fn add_tagging(&self, tagging: &Tagging) -> RegistryResult<()> {
        self.record("add_tagging");
        self.inner.add_tagging(tagging)
    }

    fn taggings(&self, path: &str) -> RegistryResult<Vec<Tagging>> {
        self.record("taggings");
        self.inner.taggings(path)
    }

    fn remove_taggings(&self, path: &str, tag: &str, user: Option<&str>) -> RegistryResult<usize> {
        self.record("remove_taggings");
        self.inner.remove_taggings(path, tag, user)
    }

    fn paths_with_tag(&self, tag: &str) -> RegistryResult<Vec<TaggedResourcePath>> {
        self.record("paths_with_tag");
        self.inner.paths_with_tag(tag)
    }

    fn add_comment(&self, path: &str, user: &str, text: &str) -> RegistryResult<Comment> {
        self.record("add_comment");
        self.inner.add_comment(path, user, text)
    }

    fn get_comment(&self, id: u64) -> RegistryResult<Option<Comment>> {
        self.record("get_comment");
        self.inner.get_comment(id)
    }

    fn update_comment(&self, id: u64, text: &str) -> RegistryResult<()> {
        self.record("update_comment");
        self.inner.update_comment(id, text)
    }

    fn remove_comment(&self, id: u64) -> RegistryResult<()> {
        self.record("remove_comment");
        self.inner.remove_comment(id)
    }

    fn comments(&self, path: &str) -> RegistryResult<Vec<Comment>> {
        self.record("comments");
        self.inner.comments(path)
    }

    fn rating(&self, path: &str, user: &str) -> RegistryResult<Option<u8>> {
        self.record("rating");
        self.inner.rating(path, user)
    }

    fn set_rating(&self, path: &str, user: &str, rating: u8) -> RegistryResult<()> {
        self.record("set_rating");
        self.inner.set_rating(path, user, rating)
    }

    fn remove_rating(&self, path: &str, user: &str) -> RegistryResult<()> {
        self.record("remove_rating");
        self.inner.remove_rating(path, user)
    }

    fn ratings(&self, path: &str) -> RegistryResult<Vec<Rating>> {
        self.record("ratings");
        self.inner.ratings(path)
    }

    fn add_log(&self, activity: &Activity) -> RegistryResult<()> {
        self.record("add_log");
        self.inner.add_log(activity)
    }

    fn logs(&self, filter: &LogFilter) -> RegistryResult<Vec<Activity>> {
        self.record("logs");
        self.inner.logs(filter)
    }

    fn dump(&self, path: &str) -> RegistryResult<Vec<u8>> {
        self.record("dump");
        self.inner.dump(path)
    }

    fn restore(&self, path: &str, dump: &[u8]) -> RegistryResult<()> {
        self.record("restore");
        self.inner.restore(path, dump)
    }

    fn begin_transaction(&self) -> RegistryResult<()> {
        self.record("begin_transaction");
        self.inner.begin_transaction()
    }

    fn commit_transaction(&self) -> RegistryResult<()> {
        self.record("commit_transaction");
        self.inner.commit_transaction()
    }

    fn rollback_transaction(&self) -> RegistryResult<()> {
        self.record("rollback_transaction");
        self.inner.rollback_transaction()
    }

    fn is_no_cache_path(&self, path: &str) -> bool {
        self.inner.is_no_cache_path(path)
    }
}

// ============================================================================
// SCRIPTED AUTHORIZER
// ============================================================================

/// Authorizer whose answer can be flipped at runtime. Counts every call.
#[derive(Debug)]
pub struct CountingAuthorizer {
    allow: AtomicBool,
    calls: AtomicUsize,
    denied_prefixes: Mutex<Vec<String>>,
}

impl Default for CountingAuthorizer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CountingAuthorizer {
    pub fn new(allow: bool) -> Self {
        Self {
            allow: AtomicBool::new(allow),
            calls: AtomicUsize::new(0),
            denied_prefixes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_allow(&self, allow: bool) {
        self.allow.store(allow, Ordering::SeqCst);
    }

    /// Deny every path at or below `prefix`, whatever `set_allow` says.
    pub fn deny_prefix(&self, prefix: impl Into<String>) {
        self.denied_prefixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prefix.into());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Authorizer for CountingAuthorizer {
    fn authorize(&self, _user: &str, path: &str, _action: Action) -> RegistryResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let denied = self
            .denied_prefixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| carrel_core::config::is_under(path, p));
        Ok(!denied && self.allow.load(Ordering::SeqCst))
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating CARREL values.

    use super::*;
    use proptest::prelude::*;

    /// A single path segment.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}"
    }

    /// A normalized absolute path of one to four segments.
    pub fn arb_resource_path() -> impl Strategy<Value = String> {
        prop::collection::vec(arb_segment(), 1..=4).prop_map(|segments| format!("/{}", segments.join("/")))
    }

    /// A tag name free of illegal characters.
    pub fn arb_tag() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9 _-]{0,11}[a-z0-9]".prop_map(|s| s.trim().to_string())
    }

    /// A character that is never allowed in a tag.
    pub fn arb_illegal_tag_char() -> impl Strategy<Value = char> {
        prop::sample::select(vec![
            '~', '!', '@', '#', ';', '%', '^', '*', '+', '=', '{', '}', '|', '\\', '<', '>', '"',
            '\'',
        ])
    }

    pub fn arb_tenant() -> impl Strategy<Value = TenantId> {
        (0i32..16).prop_map(TenantId)
    }

    /// A plain resource at `path` with arbitrary content.
    pub fn arb_resource_at(path: String) -> impl Strategy<Value = Resource> {
        prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(move |bytes| Resource::new(path.clone()).with_content(bytes))
    }

    /// A resource at an arbitrary path.
    pub fn arb_resource() -> impl Strategy<Value = Resource> {
        arb_resource_path().prop_flat_map(arb_resource_at)
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// `user@jdbc:db1`, the default store in most scenarios.
    pub fn default_database() -> DatabaseConfig {
        DatabaseConfig::new("db1", "jdbc:db1").with_username("user")
    }

    pub fn text_resource(path: &str, body: &str) -> Resource {
        Resource::new(path)
            .with_content(body.as_bytes().to_vec())
            .with_media_type("text/plain")
    }

    /// A placeholder flagged as a symbolic link.
    pub fn link_resource(path: &str) -> Resource {
        Resource::new(path).with_property(carrel_core::properties::LINK, "true")
    }

    /// A placeholder flagged as a remote mount point.
    pub fn mount_resource(path: &str) -> Resource {
        link_resource(path).with_property(carrel_core::properties::MOUNT, "true")
    }

    pub fn partition_mount(source: &str, target: &str, partition: &str) -> MountEntry {
        MountEntry {
            source_prefix: source.to_string(),
            target_prefix: target.to_string(),
            target: MountTarget::CachePartition(partition.to_string()),
        }
    }

    pub fn database_mount(source: &str, target: &str, database: DatabaseConfig) -> MountEntry {
        MountEntry {
            source_prefix: source.to_string(),
            target_prefix: target.to_string(),
            target: MountTarget::Database(database),
        }
    }

    /// A configuration with the default database and the cache enabled.
    pub fn minimal_config() -> RegistryConfig {
        RegistryConfig {
            databases: vec![default_database()],
            default_database: Some("db1".to_string()),
            ..RegistryConfig::default()
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for CARREL error variants.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &RegistryResult<T>) {
        match result {
            Err(RegistryError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_denied<T: std::fmt::Debug>(result: &RegistryResult<T>) {
        match result {
            Err(RegistryError::AuthorizationDenied { .. }) => {}
            other => panic!("Expected AuthorizationDenied, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_input<T: std::fmt::Debug>(result: &RegistryResult<T>) {
        match result {
            Err(RegistryError::InvalidInput(_)) => {}
            other => panic!("Expected InvalidInput, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_archived_version<T: std::fmt::Debug>(result: &RegistryResult<T>) {
        match result {
            Err(RegistryError::InvalidInput(ValidationError::ArchivedVersion { .. })) => {}
            other => panic!("Expected ArchivedVersion, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_server_content<T: std::fmt::Debug>(result: &RegistryResult<T>) {
        match result {
            Err(RegistryError::ServerContent { .. }) => {}
            other => panic!("Expected ServerContent, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
