//! Read-through caching in front of another registry.
//!
//! Only `get`, `get_collection` and `resource_exists` consult the cache;
//! every other operation passes straight through. Entries are removed by a
//! COMMITTED-phase handler registered on the wrapped registry. It runs once
//! the storage commit is visible, so a reader that misses while the
//! mutation is in flight cannot leave the old state behind in the cache.

use std::sync::Arc;

use carrel_core::path::{ancestors, is_descendant, join, parent};
use carrel_core::{
    Action, Activity, Association, Authorizer, Comment, CurrentSession, LogFilter, RegistryError,
    RegistryResult, Resource, ResourcePath, Tag, TaggedResourcePath, ROOT_PATH,
};
use carrel_storage::{BackendDescriptor, CacheKey, CacheKeyResolver, CacheStats, GhostCache, StorageEngine};

use crate::aspect::Aspect;
use crate::context::RequestContext;
use crate::handler::{Handler, HandlerId, HandlerManager, MatchAll, Phase};
use crate::operation::Operation;
use crate::registry::Registry;

/// Fragment words naming community sub-resources, which are never cached.
const COMMUNITY_FRAGMENTS: [&str; 3] = ["tags", "comments", "ratings"];

fn names_community_feature(path: &str) -> bool {
    let fragment = ResourcePath::parse(path).fragment().to_string();
    COMMUNITY_FRAGMENTS.iter().any(|word| fragment.contains(word))
}

/// Links are served from their target and not cached, unless they are
/// mount points.
fn cacheable(resource: &Resource) -> bool {
    !resource.is_link() || resource.is_mount()
}

// ============================================================================
// INVALIDATION
// ============================================================================

/// Drops cache entries touched by a committed mutation.
///
/// The affected paths and their descendants are removed, together with the
/// exact entries (any page or version) of every ancestor collection.
pub struct CacheInvalidationHandler {
    cache: Arc<GhostCache<Resource>>,
    resolver: CacheKeyResolver,
    descriptor: BackendDescriptor,
}

impl CacheInvalidationHandler {
    pub fn new(
        cache: Arc<GhostCache<Resource>>,
        resolver: CacheKeyResolver,
        descriptor: BackendDescriptor,
    ) -> Self {
        Self {
            cache,
            resolver,
            descriptor,
        }
    }

    fn affected_paths(ctx: &RequestContext) -> Vec<String> {
        let mut paths = vec![ctx.resource_path()];
        for raw in [&ctx.original_path, &ctx.source_path, &ctx.parent_path]
            .into_iter()
            .flatten()
        {
            paths.push(ResourcePath::parse(raw).path().to_string());
        }
        if let Some(target) = &ctx.target_path {
            let target = if target.starts_with('/') {
                ResourcePath::parse(target).path().to_string()
            } else {
                // A rename target is a bare name beside the source.
                let source = ctx.source_path.as_deref().unwrap_or(&ctx.path);
                let dir = parent(ResourcePath::parse(source).path())
                    .unwrap_or_else(|| ROOT_PATH.to_string());
                join(&dir, target)
            };
            paths.push(target);
        }
        paths.sort();
        paths.dedup();
        paths
    }
}

impl Handler for CacheInvalidationHandler {
    fn name(&self) -> &str {
        "cache-invalidation"
    }

    fn handle(&self, ctx: &mut RequestContext, _storage: &dyn StorageEngine) -> RegistryResult<()> {
        let paths = Self::affected_paths(ctx);
        let mut targets: Vec<(CacheKey, bool)> = Vec::new();
        for path in &paths {
            targets.push((self.resolver.resolve_cache_path(&self.descriptor, path), true));
            for ancestor in ancestors(path) {
                targets.push((self.resolver.resolve_cache_path(&self.descriptor, &ancestor), false));
            }
        }

        let removed = self.cache.invalidate_where(&|key: &CacheKey| {
            let key_path = ResourcePath::parse(key.path());
            let base = key_path.path();
            targets.iter().any(|(target, deep)| {
                key.connection_id() == target.connection_id()
                    && (base == target.path() || (*deep && is_descendant(base, target.path())))
            })
        });
        if removed > 0 {
            tracing::debug!(operation = %ctx.operation(), removed, "Cache entries invalidated");
        }
        Ok(())
    }
}

// ============================================================================
// CACHE-BACKED REGISTRY
// ============================================================================

pub struct CacheBackedRegistry {
    inner: Arc<dyn Registry>,
    cache: Arc<GhostCache<Resource>>,
    resolver: CacheKeyResolver,
    authorizer: Arc<dyn Authorizer>,
    invalidation: HandlerId,
}

impl CacheBackedRegistry {
    /// Wrap `inner`, registering cache invalidation on its handler manager.
    pub fn new(
        inner: Arc<dyn Registry>,
        cache: Arc<GhostCache<Resource>>,
        resolver: CacheKeyResolver,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        let mutating: Vec<Operation> = Operation::ALL
            .iter()
            .copied()
            .filter(Operation::is_mutating)
            .collect();
        let handler = CacheInvalidationHandler::new(
            Arc::clone(&cache),
            resolver.clone(),
            inner.descriptor().clone(),
        );
        let invalidation = inner.handler_manager().add_handler(
            Phase::Committed,
            &mutating,
            Arc::new(MatchAll),
            Arc::new(handler),
        );
        Self {
            inner,
            cache,
            resolver,
            authorizer,
            invalidation,
        }
    }

    pub fn cache(&self) -> &Arc<GhostCache<Resource>> {
        &self.cache
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn resolver(&self) -> &CacheKeyResolver {
        &self.resolver
    }

    /// Key under which `path` is cached.
    pub fn cache_key(&self, path: &str) -> CacheKey {
        self.resolver.resolve(self.inner.descriptor(), path)
    }

    fn authorize_hit(&self, path: &str) -> RegistryResult<()> {
        let user = CurrentSession::user_or_anonymous();
        let resource_path = ResourcePath::parse(path).path().to_string();
        if self.authorizer.authorize(&user, &resource_path, Action::Get)? {
            Ok(())
        } else {
            tracing::debug!(user = %user, path = %resource_path, "Cache hit denied");
            Err(RegistryError::denied(user, Action::Get, resource_path))
        }
    }
}

impl Drop for CacheBackedRegistry {
    fn drop(&mut self) {
        self.inner.handler_manager().remove_handler(self.invalidation);
    }
}

impl Registry for CacheBackedRegistry {
    fn descriptor(&self) -> &BackendDescriptor {
        self.inner.descriptor()
    }

    fn is_no_cache_path(&self, path: &str) -> bool {
        self.inner.is_no_cache_path(path)
    }

    fn handler_manager(&self) -> &Arc<HandlerManager> {
        self.inner.handler_manager()
    }

    // === Cached Operations ===

    fn get(&self, path: &str) -> RegistryResult<Resource> {
        if self.inner.is_no_cache_path(path) || names_community_feature(path) {
            self.cache.record_bypass();
            tracing::debug!(path, "Cache bypassed");
            return self.inner.get(path);
        }

        let key = self.cache_key(path);
        let generation = self.cache.generation();
        let Some(ghost) = self.cache.get(&key) else {
            tracing::debug!(key = %key, "Cache miss");
            let resource = self.inner.get(path)?;
            if cacheable(&resource) && self.cache.fill(key, resource.clone(), generation).is_none() {
                tracing::debug!(path, "Fill skipped after concurrent invalidation");
            }
            return Ok(resource);
        };

        self.authorize_hit(path)?;
        if let Some(resource) = ghost.get() {
            tracing::debug!(key = %key, "Cache hit");
            return Ok(resource.as_ref().clone());
        }

        tracing::debug!(key = %key, "Cache hit on existence entry");
        let resource = self.inner.get(path)?;
        if cacheable(&resource) {
            self.cache.upgrade(&ghost, resource.clone());
        }
        Ok(resource)
    }

    fn get_collection(
        &self,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> RegistryResult<Resource> {
        if self.inner.is_no_cache_path(path) || names_community_feature(path) {
            self.cache.record_bypass();
            return self.inner.get_collection(path, start, page_size);
        }

        let key = self
            .resolver
            .resolve_page(self.inner.descriptor(), path, start, page_size);
        let generation = self.cache.generation();
        let Some(ghost) = self.cache.get(&key) else {
            let collection = self.inner.get_collection(path, start, page_size)?;
            if !collection.is_link() {
                self.cache.fill(key, collection.clone(), generation);
            }
            return Ok(collection);
        };

        self.authorize_hit(path)?;
        if let Some(collection) = ghost.get() {
            return Ok(collection.as_ref().clone());
        }
        let collection = self.inner.get_collection(path, start, page_size)?;
        if !collection.is_link() {
            self.cache.upgrade(&ghost, collection.clone());
        }
        Ok(collection)
    }

    fn resource_exists(&self, path: &str) -> RegistryResult<bool> {
        if self.inner.is_no_cache_path(path) {
            self.cache.record_bypass();
            return self.inner.resource_exists(path);
        }

        let key = self.cache_key(path);
        let generation = self.cache.generation();
        if self.cache.contains(&key) {
            return Ok(true);
        }
        let exists = self.inner.resource_exists(path)?;
        if exists {
            self.cache.fill_ghost(key, generation);
        }
        Ok(exists)
    }

    // === Pass-through ===

    fn get_meta_data(&self, path: &str) -> RegistryResult<Resource> {
        self.inner.get_meta_data(path)
    }

    fn put(&self, path: &str, resource: &Resource) -> RegistryResult<String> {
        self.inner.put(path, resource)
    }

    fn import_resource(
        &self,
        path: &str,
        source_url: &str,
        resource: &Resource,
    ) -> RegistryResult<String> {
        self.inner.import_resource(path, source_url, resource)
    }

    fn delete(&self, path: &str) -> RegistryResult<()> {
        self.inner.delete(path)
    }

    fn rename(&self, current_path: &str, new_name: &str) -> RegistryResult<String> {
        self.inner.rename(current_path, new_name)
    }

    fn move_resource(&self, current_path: &str, new_path: &str) -> RegistryResult<String> {
        self.inner.move_resource(current_path, new_path)
    }

    fn copy(&self, source_path: &str, target_path: &str) -> RegistryResult<String> {
        self.inner.copy(source_path, target_path)
    }

    fn create_version(&self, path: &str) -> RegistryResult<()> {
        self.inner.create_version(path)
    }

    fn get_versions(&self, path: &str) -> RegistryResult<Vec<String>> {
        self.inner.get_versions(path)
    }

    fn restore_version(&self, version_path: &str) -> RegistryResult<()> {
        self.inner.restore_version(version_path)
    }

    fn remove_version_history(&self, path: &str, snapshot_id: u64) -> RegistryResult<bool> {
        self.inner.remove_version_history(path, snapshot_id)
    }

    fn add_association(
        &self,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> RegistryResult<()> {
        self.inner
            .add_association(source_path, target_path, association_type)
    }

    fn remove_association(
        &self,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> RegistryResult<()> {
        self.inner
            .remove_association(source_path, target_path, association_type)
    }

    fn get_all_associations(&self, path: &str) -> RegistryResult<Vec<Association>> {
        self.inner.get_all_associations(path)
    }

    fn get_associations(
        &self,
        path: &str,
        association_type: &str,
    ) -> RegistryResult<Vec<Association>> {
        self.inner.get_associations(path, association_type)
    }

    fn apply_tag(&self, path: &str, tag: &str) -> RegistryResult<()> {
        self.inner.apply_tag(path, tag)
    }

    fn get_tags(&self, path: &str) -> RegistryResult<Vec<Tag>> {
        self.inner.get_tags(path)
    }

    fn get_resource_paths_with_tag(&self, tag: &str) -> RegistryResult<Vec<TaggedResourcePath>> {
        self.inner.get_resource_paths_with_tag(tag)
    }

    fn remove_tag(&self, path: &str, tag: &str) -> RegistryResult<()> {
        self.inner.remove_tag(path, tag)
    }

    fn add_comment(&self, path: &str, text: &str) -> RegistryResult<String> {
        self.inner.add_comment(path, text)
    }

    fn edit_comment(&self, comment_path: &str, text: &str) -> RegistryResult<()> {
        self.inner.edit_comment(comment_path, text)
    }

    fn remove_comment(&self, comment_path: &str) -> RegistryResult<()> {
        self.inner.remove_comment(comment_path)
    }

    fn get_comments(&self, path: &str) -> RegistryResult<Vec<Comment>> {
        self.inner.get_comments(path)
    }

    fn rate_resource(&self, path: &str, rating: u8) -> RegistryResult<()> {
        self.inner.rate_resource(path, rating)
    }

    fn get_average_rating(&self, path: &str) -> RegistryResult<f32> {
        self.inner.get_average_rating(path)
    }

    fn get_rating(&self, path: &str, user: &str) -> RegistryResult<u8> {
        self.inner.get_rating(path, user)
    }

    fn get_logs(&self, filter: &LogFilter) -> RegistryResult<Vec<Activity>> {
        self.inner.get_logs(filter)
    }

    fn add_aspect(&self, aspect: Arc<dyn Aspect>) -> RegistryResult<bool> {
        self.inner.add_aspect(aspect)
    }

    fn remove_aspect(&self, name: &str) -> RegistryResult<bool> {
        self.inner.remove_aspect(name)
    }

    fn get_available_aspects(&self) -> RegistryResult<Vec<String>> {
        self.inner.get_available_aspects()
    }

    fn associate_aspect(&self, path: &str, aspect: &str) -> RegistryResult<()> {
        self.inner.associate_aspect(path, aspect)
    }

    fn invoke_aspect(&self, path: &str, aspect: &str, action: &str) -> RegistryResult<()> {
        self.inner.invoke_aspect(path, aspect, action)
    }

    fn get_aspect_actions(&self, path: &str, aspect: &str) -> RegistryResult<Vec<String>> {
        self.inner.get_aspect_actions(path, aspect)
    }

    fn create_link(&self, path: &str, target: &str) -> RegistryResult<()> {
        self.inner.create_link(path, target)
    }

    fn create_remote_link(
        &self,
        path: &str,
        instance_id: &str,
        target_sub_path: &str,
    ) -> RegistryResult<()> {
        self.inner
            .create_remote_link(path, instance_id, target_sub_path)
    }

    fn remove_link(&self, path: &str) -> RegistryResult<()> {
        self.inner.remove_link(path)
    }

    fn dump(&self, path: &str) -> RegistryResult<Vec<u8>> {
        self.inner.dump(path)
    }

    fn restore(&self, path: &str, dump: &[u8]) -> RegistryResult<()> {
        self.inner.restore(path, dump)
    }

    fn get_eventing_service_url(&self, path: Option<&str>) -> RegistryResult<Option<String>> {
        self.inner.get_eventing_service_url(path)
    }

    fn set_eventing_service_url(
        &self,
        path: Option<&str>,
        url: Option<String>,
    ) -> RegistryResult<()> {
        self.inner.set_eventing_service_url(path, url)
    }
}
