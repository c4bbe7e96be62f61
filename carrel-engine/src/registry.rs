//! The registry capability interface.
//!
//! [`EmbeddedRegistry`](crate::EmbeddedRegistry) implements it over a
//! storage engine; [`ChrootRegistry`](crate::ChrootRegistry) and
//! [`CacheBackedRegistry`](crate::CacheBackedRegistry) decorate another
//! registry. Callers hold an `Arc<dyn Registry>`.

use std::sync::Arc;

use carrel_core::{
    Activity, Association, Comment, LogFilter, RegistryResult, Resource, Tag, TaggedResourcePath,
};
use carrel_storage::BackendDescriptor;

use crate::aspect::Aspect;
use crate::handler::HandlerManager;

pub trait Registry: Send + Sync {
    /// What the cache needs to know to address this registry's entries.
    fn descriptor(&self) -> &BackendDescriptor;

    fn is_no_cache_path(&self, path: &str) -> bool;

    fn handler_manager(&self) -> &Arc<HandlerManager>;

    // === Resource Operations ===

    /// Fails with `NotFound` when nothing is stored at `path`.
    fn get(&self, path: &str) -> RegistryResult<Resource>;

    /// One page of a collection's children.
    fn get_collection(&self, path: &str, start: usize, page_size: usize)
        -> RegistryResult<Resource>;

    fn resource_exists(&self, path: &str) -> RegistryResult<bool>;

    /// The resource without its content.
    fn get_meta_data(&self, path: &str) -> RegistryResult<Resource>;

    /// Add or update. Returns the stored path.
    fn put(&self, path: &str, resource: &Resource) -> RegistryResult<String>;

    fn import_resource(
        &self,
        path: &str,
        source_url: &str,
        resource: &Resource,
    ) -> RegistryResult<String>;

    fn delete(&self, path: &str) -> RegistryResult<()>;

    fn rename(&self, current_path: &str, new_name: &str) -> RegistryResult<String>;

    fn move_resource(&self, current_path: &str, new_path: &str) -> RegistryResult<String>;

    fn copy(&self, source_path: &str, target_path: &str) -> RegistryResult<String>;

    // === Version Operations ===

    fn create_version(&self, path: &str) -> RegistryResult<()>;

    fn get_versions(&self, path: &str) -> RegistryResult<Vec<String>>;

    fn restore_version(&self, version_path: &str) -> RegistryResult<()>;

    /// Returns true once the snapshot is gone.
    fn remove_version_history(&self, path: &str, snapshot_id: u64) -> RegistryResult<bool>;

    // === Association Operations ===

    fn add_association(
        &self,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> RegistryResult<()>;

    fn remove_association(
        &self,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> RegistryResult<()>;

    fn get_all_associations(&self, path: &str) -> RegistryResult<Vec<Association>>;

    fn get_associations(&self, path: &str, association_type: &str)
        -> RegistryResult<Vec<Association>>;

    // === Tag Operations ===

    /// Apply one or more comma separated tags.
    fn apply_tag(&self, path: &str, tag: &str) -> RegistryResult<()>;

    fn get_tags(&self, path: &str) -> RegistryResult<Vec<Tag>>;

    fn get_resource_paths_with_tag(&self, tag: &str) -> RegistryResult<Vec<TaggedResourcePath>>;

    fn remove_tag(&self, path: &str, tag: &str) -> RegistryResult<()>;

    // === Comment Operations ===

    /// Returns the comment path, `path;comments:<id>`.
    fn add_comment(&self, path: &str, text: &str) -> RegistryResult<String>;

    fn edit_comment(&self, comment_path: &str, text: &str) -> RegistryResult<()>;

    fn remove_comment(&self, comment_path: &str) -> RegistryResult<()>;

    fn get_comments(&self, path: &str) -> RegistryResult<Vec<Comment>>;

    // === Rating Operations ===

    /// Rate 1..=5 as the session user; 0 removes the user's rating.
    fn rate_resource(&self, path: &str, rating: u8) -> RegistryResult<()>;

    fn get_average_rating(&self, path: &str) -> RegistryResult<f32>;

    /// The user's rating, 0 when unrated.
    fn get_rating(&self, path: &str, user: &str) -> RegistryResult<u8>;

    // === Activity Log ===

    fn get_logs(&self, filter: &LogFilter) -> RegistryResult<Vec<Activity>>;

    // === Aspect Operations ===

    fn add_aspect(&self, aspect: Arc<dyn Aspect>) -> RegistryResult<bool>;

    fn remove_aspect(&self, name: &str) -> RegistryResult<bool>;

    fn get_available_aspects(&self) -> RegistryResult<Vec<String>>;

    fn associate_aspect(&self, path: &str, aspect: &str) -> RegistryResult<()>;

    fn invoke_aspect(&self, path: &str, aspect: &str, action: &str) -> RegistryResult<()>;

    fn get_aspect_actions(&self, path: &str, aspect: &str) -> RegistryResult<Vec<String>>;

    // === Link Operations ===

    fn create_link(&self, path: &str, target: &str) -> RegistryResult<()>;

    fn create_remote_link(
        &self,
        path: &str,
        instance_id: &str,
        target_sub_path: &str,
    ) -> RegistryResult<()>;

    fn remove_link(&self, path: &str) -> RegistryResult<()>;

    // === Dump / Restore ===

    fn dump(&self, path: &str) -> RegistryResult<Vec<u8>>;

    fn restore(&self, path: &str, dump: &[u8]) -> RegistryResult<()>;

    // === Eventing ===

    /// Subscription endpoint for `path`, or the default when `None`.
    fn get_eventing_service_url(&self, path: Option<&str>) -> RegistryResult<Option<String>>;

    /// Set the endpoint for a path pattern, or the default when `path` is
    /// `None`. A `None` url removes the pattern.
    fn set_eventing_service_url(&self, path: Option<&str>, url: Option<String>)
        -> RegistryResult<()>;
}
