//! The registry over a local storage engine.
//!
//! Every operation builds a [`RequestContext`] and runs through a
//! [`TransactionalOperation`]; the closure passed to `run` is the default
//! storage call that EXECUTE handlers may replace. Default calls read their
//! paths from the context so that handlers can re-address a request.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;

use carrel_core::path::{self, normalize, COMMENTS_PARAMETER};
use carrel_core::{
    properties, Activity, ActivityKind, Association, Comment, ConfigError, Content,
    ContextTenant, CurrentSession, LogFilter, RegistryError, RegistryResult,
    RemoteInstanceConfig, Resource, ResourcePath, StaticRealm, Tag, TaggedResourcePath, Tagging,
    TenantId, UserRealm, ValidationError, LINK_MEDIA_TYPE, ROOT_PATH, SYSTEM_MOUNT_PATH,
};
use carrel_storage::{BackendDescriptor, StorageEngine};

use crate::aspect::{Aspect, AspectRegistry};
use crate::context::RequestContext;
use crate::eventing::EventingUrls;
use crate::handler::{HandlerId, HandlerManager, Phase, SymLinkHandler, UrlMatcher};
use crate::operation::Operation;
use crate::registry::Registry;
use crate::statistics::StatisticsSink;
use crate::transaction::TransactionalOperation;

static ILLEGAL_TAG_CHARACTERS: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r#"[~!@#;%^*+={}|\\<>"']"#));

/// Split a comma separated tag list, trimming and dropping empties and
/// duplicates. Illegal characters anywhere reject the whole input.
pub fn parse_tags(input: &str) -> RegistryResult<Vec<String>> {
    let illegal = match &*ILLEGAL_TAG_CHARACTERS {
        Ok(re) => re.is_match(input),
        Err(e) => {
            return Err(ValidationError::InvalidValue {
                field: "tag".to_string(),
                reason: e.to_string(),
            }
            .into())
        }
    };
    if illegal {
        return Err(ValidationError::IllegalTagCharacters {
            tag: input.to_string(),
        }
        .into());
    }
    let mut tags: Vec<String> = Vec::new();
    for tag in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    Ok(tags)
}

/// Name of the mount entry recorded for a link at `path`.
pub fn mount_entry_path(path: &str) -> String {
    path::join(SYSTEM_MOUNT_PATH, &path.replace('/', "-"))
}

fn current_tenant() -> TenantId {
    CurrentSession::tenant_id().unwrap_or_else(ContextTenant::current)
}

fn comment_path_id(comment_path: &str) -> RegistryResult<(String, u64)> {
    let rp = ResourcePath::parse(comment_path);
    let id = rp.comment_id().ok_or_else(|| ValidationError::InvalidPath {
        path: comment_path.to_string(),
        reason: "not a comment path".to_string(),
    })?;
    Ok((rp.path().to_string(), id))
}

fn comment_resource(comment: &Comment) -> Resource {
    let mut resource = Resource::new(comment.comment_path())
        .with_content(comment.text.clone())
        .with_media_type("text/plain")
        .with_author(comment.user.clone());
    resource.created_at = comment.created_at;
    resource.last_modified = comment.last_modified;
    resource
}

/// Read a resource, a comment, or the comment collection of a resource.
fn load(storage: &dyn StorageEngine, raw: &str) -> RegistryResult<Resource> {
    let rp = ResourcePath::parse(raw);
    if rp.has_parameter(COMMENTS_PARAMETER) {
        if let Some(id) = rp.comment_id() {
            return storage
                .get_comment(id)?
                .filter(|c| c.resource_path == rp.path())
                .map(|c| comment_resource(&c))
                .ok_or_else(|| RegistryError::not_found(raw));
        }
        if !storage.exists(rp.path())? {
            return Err(RegistryError::not_found(raw));
        }
        let children: Vec<String> = storage
            .comments(rp.path())?
            .iter()
            .map(Comment::comment_path)
            .collect();
        let mut collection = Resource::collection(raw);
        collection.child_count = children.len();
        collection.content = Content::Children(children);
        return Ok(collection);
    }
    storage
        .get(raw)?
        .ok_or_else(|| RegistryError::not_found(raw))
}

fn require(storage: &dyn StorageEngine, path: &str) -> RegistryResult<()> {
    if storage.exists(path)? {
        Ok(())
    } else {
        Err(RegistryError::not_found(path))
    }
}

// ============================================================================
// EMBEDDED REGISTRY
// ============================================================================

pub struct EmbeddedRegistry {
    storage: Arc<dyn StorageEngine>,
    handlers: Arc<HandlerManager>,
    descriptor: BackendDescriptor,
    realm: Arc<dyn UserRealm>,
    aspects: AspectRegistry,
    eventing: EventingUrls,
    links: Mutex<HashMap<String, HandlerId>>,
    statistics: Option<Arc<StatisticsSink>>,
    remote_instances: Vec<RemoteInstanceConfig>,
}

impl EmbeddedRegistry {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self {
            storage,
            handlers: Arc::new(HandlerManager::new()),
            descriptor: BackendDescriptor::embedded(None),
            realm: Arc::new(StaticRealm::default()),
            aspects: AspectRegistry::new(),
            eventing: EventingUrls::new(),
            links: Mutex::new(HashMap::new()),
            statistics: None,
            remote_instances: Vec::new(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: BackendDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_handlers(mut self, handlers: Arc<HandlerManager>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_realm(mut self, realm: Arc<dyn UserRealm>) -> Self {
        self.realm = realm;
        self
    }

    pub fn with_eventing(mut self, eventing: EventingUrls) -> Self {
        self.eventing = eventing;
        self
    }

    pub fn with_statistics(mut self, statistics: Arc<StatisticsSink>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn with_remote_instances(mut self, instances: Vec<RemoteInstanceConfig>) -> Self {
        self.remote_instances = instances;
        self
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    fn txn(&self) -> TransactionalOperation<'_> {
        TransactionalOperation::new(self.storage.as_ref(), &self.handlers)
            .with_statistics(self.statistics.as_deref())
    }

    // === Links ===

    /// Paths that currently have a link handler registered.
    pub fn link_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    fn register_link(&self, mount_point: &str, handler: SymLinkHandler) -> RegistryResult<()> {
        let filter = UrlMatcher::prefix(mount_point)?;
        let id = self
            .handlers
            .add_handler(Phase::Execute, &[], Arc::new(filter), Arc::new(handler));
        let previous = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mount_point.to_string(), id);
        if let Some(previous) = previous {
            self.handlers.remove_handler(previous);
        }
        Ok(())
    }

    fn unregister_link(&self, mount_point: &str) {
        let id = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(mount_point);
        if let Some(id) = id {
            self.handlers.remove_handler(id);
        }
    }

    /// Register link handlers for every recorded mount entry. Returns how
    /// many were registered.
    pub fn restore_links(&self) -> RegistryResult<usize> {
        let entries = self.txn().run_plain(|storage| {
            let Some(mounts) = storage.get(SYSTEM_MOUNT_PATH)? else {
                return Ok(Vec::new());
            };
            let mut entries = Vec::new();
            for child in mounts.children().unwrap_or_default() {
                if let Some(entry) = storage.get(child)? {
                    entries.push(entry);
                }
            }
            Ok(entries)
        })?;

        let mut restored = 0;
        for entry in entries {
            let (Some(mount_point), Some(target)) = (
                entry.property(properties::MOUNT_ENTRY_PATH),
                entry.property(properties::MOUNT_ENTRY_TARGET),
            ) else {
                tracing::warn!(entry = %entry.path, "Mount entry without path or target");
                continue;
            };
            let handler = match entry.property(properties::MOUNT_ENTRY_INSTANCE) {
                Some(instance) => SymLinkHandler::remote(mount_point, instance, target),
                None => SymLinkHandler::new(mount_point, target),
            };
            self.register_link(mount_point, handler)?;
            restored += 1;
        }
        tracing::info!(restored, "Link handlers restored");
        Ok(restored)
    }

    fn write_link(
        &self,
        ctx: &mut RequestContext,
        storage: &dyn StorageEngine,
        instance_id: Option<&str>,
    ) -> RegistryResult<()> {
        let mount_point = ctx.resource_path();
        let target = ctx.target_path.clone().unwrap_or_default();

        let existing = storage.get(&mount_point)?;
        let mut placeholder = match &existing {
            Some(resource) => {
                let mut resource = resource.clone();
                resource.set_property(properties::EXISTING_RESOURCE, "true");
                resource
            }
            None => Resource::collection(mount_point.clone()).with_author(ctx.user.clone()),
        };
        placeholder.media_type = Some(LINK_MEDIA_TYPE.to_string());
        placeholder.set_property(properties::LINK, "true");
        placeholder.set_property(properties::NON_RECURSIVE, "true");
        placeholder.set_property(properties::MOUNT_POINT, mount_point.clone());
        placeholder.set_property(properties::TARGET_SUB_PATH, target.clone());
        placeholder.set_property(properties::ACTUAL_PATH, target.clone());
        placeholder.set_property(properties::REAL_PATH, target.clone());
        placeholder.set_property(
            properties::LINK_RESTORATION,
            format!("{};{};{}", mount_point, target, ctx.user),
        );
        if let Some(instance) = instance_id {
            placeholder.set_property(properties::MOUNT, "true");
            placeholder.set_property(properties::REMOTE_INSTANCE, instance);
        }
        storage.put(&mount_point, &placeholder)?;

        let entry_path = mount_entry_path(&mount_point);
        let mut entry = Resource::new(entry_path.clone())
            .with_author(ctx.user.clone())
            .with_property(properties::MOUNT_ENTRY_PATH, mount_point.clone())
            .with_property(properties::MOUNT_ENTRY_TARGET, target.clone());
        if let Some(instance) = instance_id {
            entry.set_property(properties::MOUNT_ENTRY_INSTANCE, instance);
        }
        storage.put(&entry_path, &entry)?;

        let kind = match instance_id {
            Some(_) => ActivityKind::CreateRemoteLink,
            None => ActivityKind::CreateSymbolicLink,
        };
        let detail = match instance_id {
            Some(instance) => format!("{};{}", instance, target),
            None => target,
        };
        ctx.record_activity(kind, Some(detail));
        Ok(())
    }

    fn relocate(
        &self,
        operation: Operation,
        source: &str,
        target: &str,
        kind: ActivityKind,
    ) -> RegistryResult<String> {
        let mut ctx =
            RequestContext::new(operation, source).with_source_and_target(source, target);
        let outcome = self.txn().run(&mut ctx, |ctx, storage| {
            let source = ctx.source_path.clone().unwrap_or_else(|| ctx.path.clone());
            let target = ctx.target_path.clone().unwrap_or_default();
            let moved = match ctx.operation() {
                Operation::Rename => storage.rename(&source, &target)?,
                Operation::Move => storage.move_resource(&source, &target)?,
                _ => storage.copy(&source, &target)?,
            };
            ctx.record_activity_at(source, kind, Some(moved.clone()));
            Ok(moved)
        })?;
        Ok(outcome.into_value().unwrap_or_else(|| normalize(target)))
    }
}

impl Registry for EmbeddedRegistry {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn is_no_cache_path(&self, path: &str) -> bool {
        self.storage.is_no_cache_path(path)
    }

    fn handler_manager(&self) -> &Arc<HandlerManager> {
        &self.handlers
    }

    // === Resource Operations ===

    fn get(&self, path: &str) -> RegistryResult<Resource> {
        let mut ctx = RequestContext::new(Operation::Get, path);
        self.txn()
            .run(&mut ctx, |ctx, storage| load(storage, &ctx.path))?
            .into_value()
            .ok_or_else(|| RegistryError::not_found(path))
    }

    fn get_collection(
        &self,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> RegistryResult<Resource> {
        let mut ctx = RequestContext::new(Operation::GetCollection, path).with_paging(start, page_size);
        self.txn()
            .run(&mut ctx, |ctx, storage| {
                storage
                    .get_collection(&ctx.path, ctx.start, ctx.page_size)?
                    .ok_or_else(|| RegistryError::not_found(ctx.path.clone()))
            })?
            .into_value()
            .ok_or_else(|| RegistryError::not_found(path))
    }

    fn resource_exists(&self, path: &str) -> RegistryResult<bool> {
        let mut ctx = RequestContext::new(Operation::ResourceExists, path);
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| storage.exists(&ctx.path))?
            .into_value_or_default())
    }

    fn get_meta_data(&self, path: &str) -> RegistryResult<Resource> {
        self.txn().run_plain(|storage| {
            storage
                .get_meta_data(path)?
                .ok_or_else(|| RegistryError::not_found(path))
        })
    }

    fn put(&self, path: &str, resource: &Resource) -> RegistryResult<String> {
        let normalized = normalize(ResourcePath::parse(path).path());
        let mut ctx = RequestContext::new(Operation::Put, normalized.clone())
            .with_resource(resource.clone());
        if let Some(parent) = path::parent(&normalized) {
            let mut child = RequestContext::new(Operation::PutChild, parent.clone())
                .with_resource(resource.clone());
            child.target_path = Some(normalized.clone());
            ctx.parent_path = Some(parent);
            ctx = ctx.with_child(child);
        }

        let outcome = self.txn().run(&mut ctx, |ctx, storage| {
            let old = storage.get(&ctx.path)?;
            let mut resource = ctx
                .resource
                .clone()
                .unwrap_or_else(|| Resource::new(ctx.path.clone()));
            if old.is_none() && resource.author == carrel_core::ANONYMOUS_USER {
                resource.author = ctx.user.clone();
            }
            resource.last_updater = ctx.user.clone();
            let kind = if old.is_some() {
                ActivityKind::Update
            } else {
                ActivityKind::Add
            };
            ctx.old_resource = old;
            let stored = storage.put(&ctx.path, &resource)?;
            ctx.record_activity_at(stored.clone(), kind, None);
            Ok(stored)
        })?;
        Ok(outcome.into_value().unwrap_or(normalized))
    }

    fn import_resource(
        &self,
        path: &str,
        source_url: &str,
        resource: &Resource,
    ) -> RegistryResult<String> {
        let normalized = normalize(ResourcePath::parse(path).path());
        let mut ctx = RequestContext::new(Operation::Import, normalized.clone())
            .with_resource(resource.clone());
        ctx.source_url = Some(source_url.to_string());
        if let Some(parent) = path::parent(&normalized) {
            let mut child = RequestContext::new(Operation::ImportChild, parent.clone());
            child.source_url = Some(source_url.to_string());
            child.target_path = Some(normalized.clone());
            ctx.parent_path = Some(parent);
            ctx = ctx.with_child(child);
        }

        let outcome = self.txn().run(&mut ctx, |ctx, storage| {
            let source_url = ctx.source_url.clone().unwrap_or_default();
            let mut resource = ctx
                .resource
                .clone()
                .unwrap_or_else(|| Resource::new(ctx.path.clone()));
            resource.last_updater = ctx.user.clone();
            resource.set_property(properties::IMPORT_SOURCE, source_url.clone());
            let stored = storage.import(&ctx.path, &source_url, &resource)?;
            ctx.record_activity_at(stored.clone(), ActivityKind::Import, Some(source_url));
            Ok(stored)
        })?;
        Ok(outcome.into_value().unwrap_or(normalized))
    }

    fn delete(&self, path: &str) -> RegistryResult<()> {
        let mut ctx = RequestContext::new(Operation::Delete, normalize(path));
        self.txn().run(&mut ctx, |ctx, storage| {
            if storage.exists(&ctx.path)? {
                storage.delete(&ctx.path)?;
                ctx.record_activity(ActivityKind::Delete, None);
            }
            Ok(())
        })?;
        Ok(())
    }

    fn rename(&self, current_path: &str, new_name: &str) -> RegistryResult<String> {
        self.relocate(Operation::Rename, current_path, new_name, ActivityKind::Rename)
    }

    fn move_resource(&self, current_path: &str, new_path: &str) -> RegistryResult<String> {
        self.relocate(Operation::Move, current_path, new_path, ActivityKind::Move)
    }

    fn copy(&self, source_path: &str, target_path: &str) -> RegistryResult<String> {
        self.relocate(Operation::Copy, source_path, target_path, ActivityKind::Copy)
    }

    // === Version Operations ===

    fn create_version(&self, path: &str) -> RegistryResult<()> {
        let mut ctx = RequestContext::new(Operation::CreateVersion, path);
        self.txn().run(&mut ctx, |ctx, storage| {
            let number = storage.create_snapshot(&ctx.resource_path())?;
            ctx.snapshot_id = Some(number);
            Ok(())
        })?;
        Ok(())
    }

    fn get_versions(&self, path: &str) -> RegistryResult<Vec<String>> {
        let mut ctx = RequestContext::new(Operation::GetVersions, path);
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| storage.list_versions(&ctx.resource_path()))?
            .into_value_or_default())
    }

    fn restore_version(&self, version_path: &str) -> RegistryResult<()> {
        let mut ctx = RequestContext::new(Operation::RestoreVersion, version_path);
        ctx.version_path = Some(version_path.to_string());
        self.txn().run(&mut ctx, |ctx, storage| {
            storage.restore_version(&ctx.path)?;
            let detail = ctx.path.clone();
            ctx.record_activity(ActivityKind::RestoreVersion, Some(detail));
            Ok(())
        })?;
        Ok(())
    }

    fn remove_version_history(&self, path: &str, snapshot_id: u64) -> RegistryResult<bool> {
        let mut ctx = RequestContext::new(Operation::RemoveVersionHistory, path);
        ctx.snapshot_id = Some(snapshot_id);
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| {
                storage.remove_version_history(&ctx.resource_path(), snapshot_id)
            })?
            .into_value_or_default())
    }

    // === Association Operations ===

    fn add_association(
        &self,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> RegistryResult<()> {
        let mut ctx = RequestContext::new(Operation::AddAssociation, source_path)
            .with_source_and_target(source_path, target_path);
        ctx.association = Some(Association::new(source_path, target_path, association_type));
        self.txn().run(&mut ctx, |ctx, storage| {
            let Some(association) = ctx.association.clone() else {
                return Ok(());
            };
            require(storage, &association.source)?;
            storage.add_association(&association)?;
            ctx.record_activity(
                ActivityKind::Associate,
                Some(format!("{};{}", association.association_type, association.destination)),
            );
            Ok(())
        })?;
        Ok(())
    }

    fn remove_association(
        &self,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> RegistryResult<()> {
        let mut ctx = RequestContext::new(Operation::RemoveAssociation, source_path)
            .with_source_and_target(source_path, target_path);
        ctx.association = Some(Association::new(source_path, target_path, association_type));
        self.txn().run(&mut ctx, |ctx, storage| {
            let Some(association) = ctx.association.clone() else {
                return Ok(());
            };
            storage.remove_association(&association)?;
            ctx.record_activity(
                ActivityKind::RemoveAssociation,
                Some(format!("{};{}", association.association_type, association.destination)),
            );
            Ok(())
        })?;
        Ok(())
    }

    fn get_all_associations(&self, path: &str) -> RegistryResult<Vec<Association>> {
        let mut ctx = RequestContext::new(Operation::GetAllAssociations, path);
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| storage.associations(&ctx.resource_path()))?
            .into_value_or_default())
    }

    fn get_associations(
        &self,
        path: &str,
        association_type: &str,
    ) -> RegistryResult<Vec<Association>> {
        let mut ctx = RequestContext::new(Operation::GetAssociations, path);
        ctx.association_type = Some(association_type.to_string());
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| {
                let association_type = ctx.association_type.clone().unwrap_or_default();
                Ok(storage
                    .associations(&ctx.resource_path())?
                    .into_iter()
                    .filter(|a| a.association_type == association_type)
                    .collect::<Vec<_>>())
            })?
            .into_value_or_default())
    }

    // === Tag Operations ===

    fn apply_tag(&self, path: &str, tag: &str) -> RegistryResult<()> {
        let tags = parse_tags(tag)?;
        let mut ctx = RequestContext::new(Operation::ApplyTag, path);
        ctx.tag = Some(tag.to_string());
        self.txn().run(&mut ctx, |ctx, storage| {
            let path = ctx.resource_path();
            require(storage, &path)?;
            let existing = storage.taggings(&path)?;
            for name in &tags {
                if existing.iter().any(|t| &t.name == name && t.user == ctx.user) {
                    continue;
                }
                storage.add_tagging(&Tagging {
                    path: path.clone(),
                    name: name.clone(),
                    user: ctx.user.clone(),
                    tagged_at: Utc::now(),
                })?;
                ctx.record_activity(ActivityKind::Tag, Some(name.clone()));
            }
            Ok(())
        })?;
        Ok(())
    }

    fn get_tags(&self, path: &str) -> RegistryResult<Vec<Tag>> {
        let mut ctx = RequestContext::new(Operation::GetTags, path);
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| {
                let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                for tagging in storage.taggings(&ctx.resource_path())? {
                    *counts.entry(tagging.name).or_default() += 1;
                }
                Ok(counts
                    .into_iter()
                    .map(|(name, count)| Tag { name, count })
                    .collect::<Vec<_>>())
            })?
            .into_value_or_default())
    }

    fn get_resource_paths_with_tag(&self, tag: &str) -> RegistryResult<Vec<TaggedResourcePath>> {
        let mut ctx = RequestContext::new(Operation::GetResourcePathsWithTag, ROOT_PATH);
        ctx.tag = Some(tag.to_string());
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| {
                storage.paths_with_tag(ctx.tag.as_deref().unwrap_or_default())
            })?
            .into_value_or_default())
    }

    fn remove_tag(&self, path: &str, tag: &str) -> RegistryResult<()> {
        let mut ctx = RequestContext::new(Operation::RemoveTag, path);
        ctx.tag = Some(tag.to_string());
        self.txn().run(&mut ctx, |ctx, storage| {
            let path = ctx.resource_path();
            let resource = storage
                .get_meta_data(&path)?
                .ok_or_else(|| RegistryError::not_found(path.clone()))?;
            let everyone = resource.author == ctx.user || self.realm.is_admin(&ctx.user)?;
            let user = ctx.user.clone();
            let tag = ctx.tag.clone().unwrap_or_default();
            let removed = storage.remove_taggings(
                &path,
                &tag,
                if everyone { None } else { Some(user.as_str()) },
            )?;
            if removed > 0 {
                ctx.record_activity(ActivityKind::RemoveTag, Some(tag));
            }
            Ok(())
        })?;
        Ok(())
    }

    // === Comment Operations ===

    fn add_comment(&self, path: &str, text: &str) -> RegistryResult<String> {
        let mut ctx = RequestContext::new(Operation::AddComment, path);
        ctx.comment = Some(text.to_string());
        let outcome = self.txn().run(&mut ctx, |ctx, storage| {
            let path = ctx.resource_path();
            require(storage, &path)?;
            let text = ctx.comment.clone().unwrap_or_default();
            let comment = storage.add_comment(&path, &ctx.user, &text)?;
            ctx.comment_id = Some(comment.id);
            ctx.record_activity(ActivityKind::Comment, Some(comment.comment_path()));
            Ok(comment.comment_path())
        })?;
        outcome
            .into_value()
            .ok_or_else(|| RegistryError::server_content("comment was not stored"))
    }

    fn edit_comment(&self, comment_path: &str, text: &str) -> RegistryResult<()> {
        let (resource_path, id) = comment_path_id(comment_path)?;
        let mut ctx = RequestContext::new(Operation::EditComment, comment_path);
        ctx.comment_id = Some(id);
        ctx.comment = Some(text.to_string());
        self.txn().run(&mut ctx, |ctx, storage| {
            storage.update_comment(id, ctx.comment.as_deref().unwrap_or_default())?;
            ctx.record_activity_at(
                resource_path,
                ActivityKind::EditComment,
                Some(ctx.path.clone()),
            );
            Ok(())
        })?;
        Ok(())
    }

    fn remove_comment(&self, comment_path: &str) -> RegistryResult<()> {
        let (resource_path, id) = comment_path_id(comment_path)?;
        let mut ctx = RequestContext::new(Operation::RemoveComment, comment_path);
        ctx.comment_id = Some(id);
        self.txn().run(&mut ctx, |ctx, storage| {
            storage.remove_comment(id)?;
            ctx.record_activity_at(
                resource_path,
                ActivityKind::RemoveComment,
                Some(ctx.path.clone()),
            );
            Ok(())
        })?;
        Ok(())
    }

    fn get_comments(&self, path: &str) -> RegistryResult<Vec<Comment>> {
        let mut ctx = RequestContext::new(Operation::GetComments, path);
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| storage.comments(&ctx.resource_path()))?
            .into_value_or_default())
    }

    // === Rating Operations ===

    fn rate_resource(&self, path: &str, rating: u8) -> RegistryResult<()> {
        if rating > 5 {
            return Err(ValidationError::RatingOutOfRange { rating }.into());
        }
        let mut ctx = RequestContext::new(Operation::RateResource, path);
        ctx.rating = Some(rating);
        self.txn().run(&mut ctx, |ctx, storage| {
            let path = ctx.resource_path();
            require(storage, &path)?;
            match ctx.rating.unwrap_or(0) {
                0 => storage.remove_rating(&path, &ctx.user)?,
                rating => storage.set_rating(&path, &ctx.user, rating)?,
            }
            let detail = ctx.rating.map(|r| r.to_string());
            ctx.record_activity(ActivityKind::Rate, detail);
            Ok(())
        })?;
        Ok(())
    }

    fn get_average_rating(&self, path: &str) -> RegistryResult<f32> {
        let mut ctx = RequestContext::new(Operation::GetAverageRating, path);
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| {
                let ratings = storage.ratings(&ctx.resource_path())?;
                if ratings.is_empty() {
                    return Ok(0.0_f32);
                }
                let total: u32 = ratings.iter().map(|r| u32::from(r.rating)).sum();
                Ok(total as f32 / ratings.len() as f32)
            })?
            .into_value_or_default())
    }

    fn get_rating(&self, path: &str, user: &str) -> RegistryResult<u8> {
        let mut ctx = RequestContext::new(Operation::GetRating, path);
        Ok(self
            .txn()
            .run(&mut ctx, |ctx, storage| {
                Ok(storage.rating(&ctx.resource_path(), user)?.unwrap_or(0))
            })?
            .into_value_or_default())
    }

    // === Activity Log ===

    fn get_logs(&self, filter: &LogFilter) -> RegistryResult<Vec<Activity>> {
        self.txn().run_plain(|storage| storage.logs(filter))
    }

    // === Aspect Operations ===

    fn add_aspect(&self, aspect: Arc<dyn Aspect>) -> RegistryResult<bool> {
        Ok(self.aspects.add(current_tenant(), aspect))
    }

    fn remove_aspect(&self, name: &str) -> RegistryResult<bool> {
        Ok(self.aspects.remove(current_tenant(), name))
    }

    fn get_available_aspects(&self) -> RegistryResult<Vec<String>> {
        Ok(self.aspects.names(current_tenant()))
    }

    fn associate_aspect(&self, path: &str, aspect: &str) -> RegistryResult<()> {
        let handler = self
            .aspects
            .get(current_tenant(), aspect)
            .ok_or_else(|| RegistryError::not_found(format!("aspect {}", aspect)))?;
        let mut ctx = RequestContext::new(Operation::AssociateAspect, path);
        ctx.aspect_name = Some(aspect.to_string());
        self.txn().run(&mut ctx, |ctx, storage| {
            let path = ctx.resource_path();
            let mut resource = storage
                .get(&path)?
                .ok_or_else(|| RegistryError::not_found(path.clone()))?;
            if resource.aspects.iter().any(|a| a == handler.name()) {
                return Ok(());
            }
            handler.associate(&mut resource, storage)?;
            resource.aspects.push(handler.name().to_string());
            storage.put(&path, &resource)?;
            ctx.record_activity(ActivityKind::AssociateAspect, Some(handler.name().to_string()));
            Ok(())
        })?;
        Ok(())
    }

    fn invoke_aspect(&self, path: &str, aspect: &str, action: &str) -> RegistryResult<()> {
        let handler = self
            .aspects
            .get(current_tenant(), aspect)
            .ok_or_else(|| RegistryError::not_found(format!("aspect {}", aspect)))?;
        let mut ctx = RequestContext::new(Operation::InvokeAspect, path);
        ctx.aspect_name = Some(aspect.to_string());
        ctx.action = Some(action.to_string());
        self.txn().run(&mut ctx, |ctx, storage| {
            let path = ctx.resource_path();
            let resource = storage
                .get(&path)?
                .ok_or_else(|| RegistryError::not_found(path.clone()))?;
            if !resource.aspects.iter().any(|a| a == handler.name()) {
                return Err(ValidationError::AspectNotAssociated {
                    path,
                    aspect: handler.name().to_string(),
                }
                .into());
            }
            ctx.resource = Some(resource);
            handler.invoke(ctx, action, storage)?;
            if let Some(updated) = ctx.resource.take() {
                storage.put(&path, &updated)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn get_aspect_actions(&self, path: &str, aspect: &str) -> RegistryResult<Vec<String>> {
        let Some(handler) = self.aspects.get(current_tenant(), aspect) else {
            return Ok(Vec::new());
        };
        self.txn().run_plain(|storage| {
            let resource = storage
                .get_meta_data(path)?
                .ok_or_else(|| RegistryError::not_found(path))?;
            if resource.aspects.iter().any(|a| a == handler.name()) {
                Ok(handler.available_actions(&resource))
            } else {
                Ok(Vec::new())
            }
        })
    }

    // === Link Operations ===

    fn create_link(&self, path: &str, target: &str) -> RegistryResult<()> {
        let mount_point = normalize(path);
        let target = normalize(target);
        if mount_point == target {
            return Err(ValidationError::SelfLink { path: mount_point }.into());
        }
        let mut ctx = RequestContext::new(Operation::CreateLink, mount_point.clone());
        ctx.target_path = Some(target.clone());
        let outcome = self
            .txn()
            .run(&mut ctx, |ctx, storage| self.write_link(ctx, storage, None))?;
        if !outcome.is_simulated() {
            self.register_link(&mount_point, SymLinkHandler::new(mount_point.clone(), target))?;
        }
        Ok(())
    }

    fn create_remote_link(
        &self,
        path: &str,
        instance_id: &str,
        target_sub_path: &str,
    ) -> RegistryResult<()> {
        if !self.remote_instances.iter().any(|i| i.id == instance_id) {
            return Err(ConfigError::UnknownInstance {
                instance_id: instance_id.to_string(),
            }
            .into());
        }
        let mount_point = normalize(path);
        let target = normalize(target_sub_path);
        if mount_point == target {
            return Err(ValidationError::SelfLink { path: mount_point }.into());
        }
        let mut ctx = RequestContext::new(Operation::CreateLink, mount_point.clone());
        ctx.target_path = Some(target.clone());
        ctx.properties.insert(
            properties::REMOTE_INSTANCE.to_string(),
            serde_json::Value::String(instance_id.to_string()),
        );
        let outcome = self
            .txn()
            .run(&mut ctx, |ctx, storage| self.write_link(ctx, storage, Some(instance_id)))?;
        if !outcome.is_simulated() {
            self.register_link(
                &mount_point,
                SymLinkHandler::remote(mount_point.clone(), instance_id, target),
            )?;
        }
        Ok(())
    }

    fn remove_link(&self, path: &str) -> RegistryResult<()> {
        let mount_point = normalize(path);
        let mut ctx = RequestContext::new(Operation::RemoveLink, mount_point.clone());
        let outcome = self.txn().run(&mut ctx, |ctx, storage| {
            let mount_point = ctx.resource_path();
            if let Some(mounts) = storage.get(SYSTEM_MOUNT_PATH)? {
                let entry_path = mount_entry_path(&mount_point);
                let entry = mounts
                    .children()
                    .unwrap_or_default()
                    .iter()
                    .find(|c| **c == entry_path)
                    .cloned()
                    .ok_or_else(|| {
                        RegistryError::server_content(format!(
                            "no mount point to remove at {}",
                            mount_point
                        ))
                    })?;
                storage.delete(&entry)?;
            }
            if let Some(mut placeholder) = storage.get(&mount_point)? {
                if placeholder.property(properties::EXISTING_RESOURCE) == Some("true") {
                    for key in [
                        properties::LINK,
                        properties::MOUNT,
                        properties::NON_RECURSIVE,
                        properties::EXISTING_RESOURCE,
                        properties::LINK_RESTORATION,
                        properties::MOUNT_POINT,
                        properties::TARGET_SUB_PATH,
                        properties::ACTUAL_PATH,
                        properties::REAL_PATH,
                        properties::REMOTE_INSTANCE,
                    ] {
                        placeholder.remove_property(key);
                    }
                    placeholder.media_type = None;
                    storage.put(&mount_point, &placeholder)?;
                } else {
                    storage.delete(&mount_point)?;
                }
            }
            ctx.record_activity(ActivityKind::RemoveLink, None);
            Ok(())
        })?;
        if !outcome.is_simulated() {
            self.unregister_link(&mount_point);
        }
        Ok(())
    }

    // === Dump / Restore ===

    fn dump(&self, path: &str) -> RegistryResult<Vec<u8>> {
        let mut ctx = RequestContext::new(Operation::Dump, path);
        self.txn()
            .run(&mut ctx, |ctx, storage| storage.dump(&ctx.resource_path()))?
            .into_value()
            .ok_or_else(|| RegistryError::server_content(format!("nothing dumped at {}", path)))
    }

    fn restore(&self, path: &str, dump: &[u8]) -> RegistryResult<()> {
        let mut ctx = RequestContext::new(Operation::Restore, path);
        ctx.dump = Some(dump.to_vec());
        let outcome = self.txn().run(&mut ctx, |ctx, storage| {
            storage.restore(&ctx.resource_path(), dump)?;
            ctx.record_activity(ActivityKind::Restore, None);
            Ok(())
        })?;
        if !outcome.is_simulated() {
            self.restore_links()?;
        }
        Ok(())
    }

    // === Eventing ===

    fn get_eventing_service_url(&self, path: Option<&str>) -> RegistryResult<Option<String>> {
        Ok(self.eventing.get(path))
    }

    fn set_eventing_service_url(
        &self,
        path: Option<&str>,
        url: Option<String>,
    ) -> RegistryResult<()> {
        self.eventing.set(path, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspect::LifecycleAspect;
    use carrel_storage::InMemoryStorage;

    fn registry() -> EmbeddedRegistry {
        EmbeddedRegistry::new(Arc::new(InMemoryStorage::new()))
    }

    fn text(path: &str, body: &str) -> Resource {
        Resource::new(path).with_content(body)
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags(" a, b ,a,, c").unwrap(), vec!["a", "b", "c"]);
        for bad in ["a;b", "x@y", "q\"", "p'", "1+1", "a|b", "a\\b"] {
            assert!(
                matches!(
                    parse_tags(bad),
                    Err(RegistryError::InvalidInput(ValidationError::IllegalTagCharacters { .. }))
                ),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_put_get_delete() {
        let registry = registry();
        let _session = CurrentSession::enter("alice", TenantId(0));
        assert_eq!(registry.put("/a/b", &text("/a/b", "hello")).unwrap(), "/a/b");
        let r = registry.get("/a/b").unwrap();
        assert_eq!(r.bytes(), Some(&b"hello"[..]));
        assert_eq!(r.author, "alice");
        assert!(registry.resource_exists("/a").unwrap());

        registry.delete("/a/b").unwrap();
        assert!(registry.get("/a/b").unwrap_err().is_not_found());
        // Deleting a missing path is not an error
        registry.delete("/a/b").unwrap();
    }

    #[test]
    fn test_put_runs_child_handlers_first() {
        let registry = registry();
        let order = Arc::new(Mutex::new(Vec::new()));
        for op in [Operation::Put, Operation::PutChild] {
            let order = Arc::clone(&order);
            registry.handler_manager().add_handler(
                Phase::Execute,
                &[op],
                Arc::new(crate::handler::MatchAll),
                Arc::new(move |ctx: &mut RequestContext, _s: &dyn StorageEngine| -> RegistryResult<()> {
                    order.lock().unwrap().push((ctx.operation(), ctx.path.clone()));
                    Ok(())
                }),
            );
        }
        registry.put("/p/c", &Resource::new("/p/c")).unwrap();
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                (Operation::PutChild, "/p".to_string()),
                (Operation::Put, "/p/c".to_string())
            ]
        );
    }

    #[test]
    fn test_put_records_activity() {
        let registry = registry();
        registry.put("/x", &text("/x", "1")).unwrap();
        registry.put("/x", &text("/x", "2")).unwrap();
        let logs = registry.get_logs(&LogFilter::for_path("/x")).unwrap();
        let kinds: Vec<_> = logs.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ActivityKind::Add, ActivityKind::Update]);
    }

    #[test]
    fn test_relocation() {
        let registry = registry();
        registry.put("/a/x", &text("/a/x", "x")).unwrap();
        assert_eq!(registry.rename("/a/x", "y").unwrap(), "/a/y");
        assert_eq!(registry.move_resource("/a/y", "/b/y").unwrap(), "/b/y");
        assert_eq!(registry.copy("/b/y", "/c/y").unwrap(), "/c/y");
        assert!(registry.resource_exists("/b/y").unwrap());
        assert!(registry.resource_exists("/c/y").unwrap());
        assert!(!registry.resource_exists("/a/x").unwrap());
    }

    #[test]
    fn test_versions() {
        let registry = registry();
        registry.put("/v", &text("/v", "one")).unwrap();
        registry.create_version("/v").unwrap();
        registry.put("/v", &text("/v", "two")).unwrap();

        let versions = registry.get_versions("/v").unwrap();
        assert_eq!(versions, vec!["/v;version:1"]);
        assert_eq!(registry.get("/v;version:1").unwrap().bytes(), Some(&b"one"[..]));

        registry.restore_version("/v;version:1").unwrap();
        assert_eq!(registry.get("/v").unwrap().bytes(), Some(&b"one"[..]));

        assert!(registry.remove_version_history("/v", 1).unwrap());
        assert!(!registry.remove_version_history("/v", 1).unwrap());
        assert!(registry.get_versions("/v").unwrap().is_empty());
    }

    #[test]
    fn test_tags_and_removal_rules() {
        let registry = registry();
        {
            let _owner = CurrentSession::enter("owner", TenantId(0));
            registry.put("/t", &Resource::new("/t")).unwrap();
            registry.apply_tag("/t", "red, blue").unwrap();
        }
        {
            let _guest = CurrentSession::enter("guest", TenantId(0));
            registry.apply_tag("/t", "red,red").unwrap();
            let tags = registry.get_tags("/t").unwrap();
            assert_eq!(
                tags,
                vec![
                    Tag { name: "blue".to_string(), count: 1 },
                    Tag { name: "red".to_string(), count: 2 },
                ]
            );
            // A non-author removes only their own tagging
            registry.remove_tag("/t", "red").unwrap();
            assert_eq!(registry.get_resource_paths_with_tag("red").unwrap().len(), 1);
        }
        {
            let _owner = CurrentSession::enter("owner", TenantId(0));
            registry.apply_tag("/t", "green").unwrap();
            let _guest = CurrentSession::enter("guest", TenantId(0));
            registry.apply_tag("/t", "green").unwrap();
        }
        let _owner = CurrentSession::enter("owner", TenantId(0));
        registry.remove_tag("/t", "green").unwrap();
        assert!(registry.get_resource_paths_with_tag("green").unwrap().is_empty());
    }

    #[test]
    fn test_admin_removes_all_taggings() {
        let registry = registry().with_realm(Arc::new(StaticRealm::new(["admin"])));
        {
            let _a = CurrentSession::enter("a", TenantId(0));
            registry.put("/t", &Resource::new("/t")).unwrap();
            registry.apply_tag("/t", "x").unwrap();
        }
        {
            let _b = CurrentSession::enter("b", TenantId(0));
            registry.apply_tag("/t", "x").unwrap();
        }
        let _admin = CurrentSession::enter("admin", TenantId(0));
        registry.remove_tag("/t", "x").unwrap();
        assert!(registry.get_tags("/t").unwrap().is_empty());
    }

    #[test]
    fn test_comments() {
        let registry = registry();
        registry.put("/c", &Resource::new("/c")).unwrap();
        let path = registry.add_comment("/c", "first").unwrap();
        assert_eq!(path, "/c;comments:1");
        registry.edit_comment(&path, "edited").unwrap();

        let comment = registry.get(&path).unwrap();
        assert_eq!(comment.bytes(), Some(&b"edited"[..]));
        let listing = registry.get("/c;comments").unwrap();
        assert_eq!(listing.children(), Some(&[path.clone()][..]));

        registry.remove_comment(&path).unwrap();
        assert!(registry.get_comments("/c").unwrap().is_empty());
        assert!(registry.add_comment("/missing", "x").unwrap_err().is_not_found());
        assert!(registry.edit_comment("/c", "x").is_err());
    }

    #[test]
    fn test_ratings() {
        let registry = registry();
        registry.put("/r", &Resource::new("/r")).unwrap();
        {
            let _a = CurrentSession::enter("a", TenantId(0));
            registry.rate_resource("/r", 4).unwrap();
            registry.rate_resource("/r", 2).unwrap();
        }
        {
            let _b = CurrentSession::enter("b", TenantId(0));
            registry.rate_resource("/r", 4).unwrap();
        }
        assert_eq!(registry.get_rating("/r", "a").unwrap(), 2);
        assert!((registry.get_average_rating("/r").unwrap() - 3.0).abs() < f32::EPSILON);

        let _b = CurrentSession::enter("b", TenantId(0));
        registry.rate_resource("/r", 0).unwrap();
        assert_eq!(registry.get_rating("/r", "b").unwrap(), 0);
        assert!(matches!(
            registry.rate_resource("/r", 6),
            Err(RegistryError::InvalidInput(ValidationError::RatingOutOfRange { rating: 6 }))
        ));
    }

    #[test]
    fn test_associations() {
        let registry = registry();
        registry.put("/s", &Resource::new("/s")).unwrap();
        registry.put("/d", &Resource::new("/d")).unwrap();
        registry.add_association("/s", "/d", "depends").unwrap();
        registry.add_association("/s", "/d", "uses").unwrap();
        assert_eq!(registry.get_all_associations("/d").unwrap().len(), 2);
        assert_eq!(registry.get_associations("/s", "uses").unwrap().len(), 1);
        registry.remove_association("/s", "/d", "uses").unwrap();
        assert!(registry.get_associations("/s", "uses").unwrap().is_empty());
    }

    #[test]
    fn test_aspects() {
        let registry = registry();
        let aspect = LifecycleAspect::new("lc", ["draft", "live"]).unwrap();
        let property = aspect.state_property();
        assert!(registry.add_aspect(Arc::new(aspect)).unwrap());
        assert_eq!(registry.get_available_aspects().unwrap(), vec!["lc"]);

        registry.put("/doc", &Resource::new("/doc")).unwrap();
        assert!(matches!(
            registry.invoke_aspect("/doc", "lc", "promote"),
            Err(RegistryError::InvalidInput(ValidationError::AspectNotAssociated { .. }))
        ));
        registry.associate_aspect("/doc", "lc").unwrap();
        assert_eq!(registry.get_aspect_actions("/doc", "lc").unwrap(), vec!["promote"]);
        registry.invoke_aspect("/doc", "lc", "promote").unwrap();
        assert_eq!(registry.get("/doc").unwrap().property(&property), Some("live"));
        assert!(registry.associate_aspect("/doc", "unknown").unwrap_err().is_not_found());
        assert!(registry.remove_aspect("lc").unwrap());
    }

    #[test]
    fn test_links() {
        let registry = registry();
        registry.put("/real/doc", &text("/real/doc", "content")).unwrap();
        registry.create_link("/alias", "/real").unwrap();

        let linked = registry.get("/alias/doc").unwrap();
        assert_eq!(linked.bytes(), Some(&b"content"[..]));
        assert!(linked.is_link());
        assert!(registry.resource_exists(&mount_entry_path("/alias")).unwrap());
        assert_eq!(registry.link_paths(), vec!["/alias"]);

        registry.put("/alias/new", &text("/alias/new", "n")).unwrap();
        assert!(registry.resource_exists("/real/new").unwrap());

        registry.remove_link("/alias").unwrap();
        assert!(!registry.resource_exists("/alias").unwrap());
        assert!(registry.link_paths().is_empty());
        assert!(matches!(
            registry.remove_link("/never-linked"),
            Err(RegistryError::ServerContent { .. })
        ));
    }

    #[test]
    fn test_link_over_existing_resource_keeps_it() {
        let registry = registry();
        registry.put("/target/t", &text("/target/t", "t")).unwrap();
        registry.put("/here", &text("/here", "mine")).unwrap();
        registry.create_link("/here", "/target").unwrap();
        registry.remove_link("/here").unwrap();
        let kept = registry.get("/here").unwrap();
        assert_eq!(kept.bytes(), Some(&b"mine"[..]));
        assert!(!kept.is_link());
    }

    #[test]
    fn test_self_link_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.create_link("/a", "/a/"),
            Err(RegistryError::InvalidInput(ValidationError::SelfLink { .. }))
        ));
    }

    #[test]
    fn test_remote_link_requires_known_instance() {
        let registry = registry().with_remote_instances(vec![RemoteInstanceConfig {
            id: "remote-1".to_string(),
            db_config: None,
            cache_id: Some("p".to_string()),
            read_only: false,
        }]);
        registry.put("/sub/x", &Resource::new("/sub/x")).unwrap();
        assert!(matches!(
            registry.create_remote_link("/m", "nope", "/sub"),
            Err(RegistryError::Config(ConfigError::UnknownInstance { .. }))
        ));
        registry.create_remote_link("/m", "remote-1", "/sub").unwrap();
        let r = registry.get("/m/x").unwrap();
        assert!(r.is_link() && r.is_mount());
    }

    #[test]
    fn test_restore_links_from_mount_entries() {
        let storage: Arc<dyn StorageEngine> = Arc::new(InMemoryStorage::new());
        let first = EmbeddedRegistry::new(Arc::clone(&storage));
        first.put("/real/doc", &text("/real/doc", "c")).unwrap();
        first.create_link("/alias", "/real").unwrap();

        let second = EmbeddedRegistry::new(storage);
        assert_eq!(second.restore_links().unwrap(), 1);
        assert!(second.get("/alias/doc").unwrap().is_link());
    }

    #[test]
    fn test_dump_and_restore() {
        let registry = registry();
        registry.put("/src/a", &text("/src/a", "a")).unwrap();
        registry.put("/src/b/c", &text("/src/b/c", "c")).unwrap();
        let dump = registry.dump("/src").unwrap();
        registry.restore("/dst", &dump).unwrap();
        assert_eq!(registry.get("/dst/b/c").unwrap().bytes(), Some(&b"c"[..]));
    }

    #[test]
    fn test_eventing_urls() {
        let registry = registry();
        registry
            .set_eventing_service_url(None, Some("http://default".to_string()))
            .unwrap();
        registry
            .set_eventing_service_url(Some("/hot/.*"), Some("http://hot".to_string()))
            .unwrap();
        assert_eq!(
            registry.get_eventing_service_url(Some("/hot/x")).unwrap().as_deref(),
            Some("http://hot")
        );
        assert_eq!(
            registry.get_eventing_service_url(Some("/cold")).unwrap().as_deref(),
            Some("http://default")
        );
    }

    #[test]
    fn test_archived_version_guard() {
        let registry = registry();
        registry.put("/g", &Resource::new("/g")).unwrap();
        registry.create_version("/g").unwrap();
        for result in [
            registry.apply_tag("/g;version:1", "t"),
            registry.add_comment("/g;version:1", "c").map(|_| ()),
            registry.rate_resource("/g;version:1", 3),
        ] {
            assert!(matches!(
                result,
                Err(RegistryError::InvalidInput(ValidationError::ArchivedVersion { .. }))
            ));
        }
        assert!(registry.get_tags("/g").unwrap().is_empty());
    }
}
