//! A registry rooted at a sub-collection of another registry.
//!
//! Inbound paths are resolved under the base prefix, outbound paths are made
//! relative again. Paths outside the base (link targets recorded in
//! properties, for instance) are left as stored.

use std::sync::Arc;

use carrel_core::path::{absolute_path, relative_path};
use carrel_core::{
    Activity, Association, Comment, Content, LogFilter, RegistryResult, Resource, Tag,
    TaggedResourcePath,
};
use carrel_storage::BackendDescriptor;

use crate::aspect::Aspect;
use crate::handler::HandlerManager;
use crate::registry::Registry;

pub struct ChrootRegistry {
    inner: Arc<dyn Registry>,
    base: String,
    descriptor: BackendDescriptor,
}

impl ChrootRegistry {
    pub fn new(inner: Arc<dyn Registry>, base: impl Into<String>) -> Self {
        let base = carrel_core::path::normalize(&base.into());
        let descriptor =
            BackendDescriptor::chroot(base.clone(), inner.descriptor().default_database.clone());
        tracing::info!(base = %base, "Chroot registry created");
        Self {
            inner,
            base,
            descriptor,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn inner(&self) -> &Arc<dyn Registry> {
        &self.inner
    }

    fn absolute(&self, path: &str) -> String {
        absolute_path(Some(&self.base), path)
    }

    fn relative(&self, path: &str) -> String {
        relative_path(Some(&self.base), path)
    }

    fn relative_resource(&self, mut resource: Resource) -> Resource {
        resource.path = self.relative(&resource.path);
        if let Content::Children(children) = &mut resource.content {
            for child in children.iter_mut() {
                *child = self.relative(child);
            }
        }
        resource
    }

    fn relative_association(&self, mut association: Association) -> Association {
        association.source = self.relative(&association.source);
        association.destination = self.relative(&association.destination);
        association
    }
}

impl Registry for ChrootRegistry {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn is_no_cache_path(&self, path: &str) -> bool {
        self.inner.is_no_cache_path(&self.absolute(path))
    }

    fn handler_manager(&self) -> &Arc<HandlerManager> {
        self.inner.handler_manager()
    }

    // === Resource Operations ===

    fn get(&self, path: &str) -> RegistryResult<Resource> {
        self.inner
            .get(&self.absolute(path))
            .map(|r| self.relative_resource(r))
    }

    fn get_collection(
        &self,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> RegistryResult<Resource> {
        self.inner
            .get_collection(&self.absolute(path), start, page_size)
            .map(|r| self.relative_resource(r))
    }

    fn resource_exists(&self, path: &str) -> RegistryResult<bool> {
        self.inner.resource_exists(&self.absolute(path))
    }

    fn get_meta_data(&self, path: &str) -> RegistryResult<Resource> {
        self.inner
            .get_meta_data(&self.absolute(path))
            .map(|r| self.relative_resource(r))
    }

    fn put(&self, path: &str, resource: &Resource) -> RegistryResult<String> {
        let mut resource = resource.clone();
        resource.path = self.absolute(&resource.path);
        self.inner
            .put(&self.absolute(path), &resource)
            .map(|p| self.relative(&p))
    }

    fn import_resource(
        &self,
        path: &str,
        source_url: &str,
        resource: &Resource,
    ) -> RegistryResult<String> {
        let mut resource = resource.clone();
        resource.path = self.absolute(&resource.path);
        self.inner
            .import_resource(&self.absolute(path), source_url, &resource)
            .map(|p| self.relative(&p))
    }

    fn delete(&self, path: &str) -> RegistryResult<()> {
        self.inner.delete(&self.absolute(path))
    }

    fn rename(&self, current_path: &str, new_name: &str) -> RegistryResult<String> {
        let new_name = if new_name.starts_with('/') {
            self.absolute(new_name)
        } else {
            new_name.to_string()
        };
        self.inner
            .rename(&self.absolute(current_path), &new_name)
            .map(|p| self.relative(&p))
    }

    fn move_resource(&self, current_path: &str, new_path: &str) -> RegistryResult<String> {
        self.inner
            .move_resource(&self.absolute(current_path), &self.absolute(new_path))
            .map(|p| self.relative(&p))
    }

    fn copy(&self, source_path: &str, target_path: &str) -> RegistryResult<String> {
        self.inner
            .copy(&self.absolute(source_path), &self.absolute(target_path))
            .map(|p| self.relative(&p))
    }

    // === Version Operations ===

    fn create_version(&self, path: &str) -> RegistryResult<()> {
        self.inner.create_version(&self.absolute(path))
    }

    fn get_versions(&self, path: &str) -> RegistryResult<Vec<String>> {
        Ok(self
            .inner
            .get_versions(&self.absolute(path))?
            .iter()
            .map(|v| self.relative(v))
            .collect())
    }

    fn restore_version(&self, version_path: &str) -> RegistryResult<()> {
        self.inner.restore_version(&self.absolute(version_path))
    }

    fn remove_version_history(&self, path: &str, snapshot_id: u64) -> RegistryResult<bool> {
        self.inner
            .remove_version_history(&self.absolute(path), snapshot_id)
    }

    // === Association Operations ===

    fn add_association(
        &self,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> RegistryResult<()> {
        self.inner.add_association(
            &self.absolute(source_path),
            &self.absolute(target_path),
            association_type,
        )
    }

    fn remove_association(
        &self,
        source_path: &str,
        target_path: &str,
        association_type: &str,
    ) -> RegistryResult<()> {
        self.inner.remove_association(
            &self.absolute(source_path),
            &self.absolute(target_path),
            association_type,
        )
    }

    fn get_all_associations(&self, path: &str) -> RegistryResult<Vec<Association>> {
        Ok(self
            .inner
            .get_all_associations(&self.absolute(path))?
            .into_iter()
            .map(|a| self.relative_association(a))
            .collect())
    }

    fn get_associations(
        &self,
        path: &str,
        association_type: &str,
    ) -> RegistryResult<Vec<Association>> {
        Ok(self
            .inner
            .get_associations(&self.absolute(path), association_type)?
            .into_iter()
            .map(|a| self.relative_association(a))
            .collect())
    }

    // === Tag Operations ===

    fn apply_tag(&self, path: &str, tag: &str) -> RegistryResult<()> {
        self.inner.apply_tag(&self.absolute(path), tag)
    }

    fn get_tags(&self, path: &str) -> RegistryResult<Vec<Tag>> {
        self.inner.get_tags(&self.absolute(path))
    }

    fn get_resource_paths_with_tag(&self, tag: &str) -> RegistryResult<Vec<TaggedResourcePath>> {
        let base = self.base.as_str();
        Ok(self
            .inner
            .get_resource_paths_with_tag(tag)?
            .into_iter()
            .filter(|t| t.path == base || carrel_core::path::is_descendant(&t.path, base))
            .map(|mut t| {
                t.path = self.relative(&t.path);
                t
            })
            .collect())
    }

    fn remove_tag(&self, path: &str, tag: &str) -> RegistryResult<()> {
        self.inner.remove_tag(&self.absolute(path), tag)
    }

    // === Comment Operations ===

    fn add_comment(&self, path: &str, text: &str) -> RegistryResult<String> {
        self.inner
            .add_comment(&self.absolute(path), text)
            .map(|p| self.relative(&p))
    }

    fn edit_comment(&self, comment_path: &str, text: &str) -> RegistryResult<()> {
        self.inner.edit_comment(&self.absolute(comment_path), text)
    }

    fn remove_comment(&self, comment_path: &str) -> RegistryResult<()> {
        self.inner.remove_comment(&self.absolute(comment_path))
    }

    fn get_comments(&self, path: &str) -> RegistryResult<Vec<Comment>> {
        Ok(self
            .inner
            .get_comments(&self.absolute(path))?
            .into_iter()
            .map(|mut c| {
                c.resource_path = self.relative(&c.resource_path);
                c
            })
            .collect())
    }

    // === Rating Operations ===

    fn rate_resource(&self, path: &str, rating: u8) -> RegistryResult<()> {
        self.inner.rate_resource(&self.absolute(path), rating)
    }

    fn get_average_rating(&self, path: &str) -> RegistryResult<f32> {
        self.inner.get_average_rating(&self.absolute(path))
    }

    fn get_rating(&self, path: &str, user: &str) -> RegistryResult<u8> {
        self.inner.get_rating(&self.absolute(path), user)
    }

    // === Activity Log ===

    fn get_logs(&self, filter: &LogFilter) -> RegistryResult<Vec<Activity>> {
        let mut filter = filter.clone();
        filter.path = filter.path.map(|p| self.absolute(&p));
        Ok(self
            .inner
            .get_logs(&filter)?
            .into_iter()
            .map(|mut a| {
                a.path = self.relative(&a.path);
                a
            })
            .collect())
    }

    // === Aspect Operations ===

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
        self.inner.associate_aspect(&self.absolute(path), aspect)
    }

    fn invoke_aspect(&self, path: &str, aspect: &str, action: &str) -> RegistryResult<()> {
        self.inner
            .invoke_aspect(&self.absolute(path), aspect, action)
    }

    fn get_aspect_actions(&self, path: &str, aspect: &str) -> RegistryResult<Vec<String>> {
        self.inner.get_aspect_actions(&self.absolute(path), aspect)
    }

    // === Link Operations ===

    fn create_link(&self, path: &str, target: &str) -> RegistryResult<()> {
        self.inner
            .create_link(&self.absolute(path), &self.absolute(target))
    }

    fn create_remote_link(
        &self,
        path: &str,
        instance_id: &str,
        target_sub_path: &str,
    ) -> RegistryResult<()> {
        self.inner
            .create_remote_link(&self.absolute(path), instance_id, target_sub_path)
    }

    fn remove_link(&self, path: &str) -> RegistryResult<()> {
        self.inner.remove_link(&self.absolute(path))
    }

    // === Dump / Restore ===

    fn dump(&self, path: &str) -> RegistryResult<Vec<u8>> {
        self.inner.dump(&self.absolute(path))
    }

    fn restore(&self, path: &str, dump: &[u8]) -> RegistryResult<()> {
        self.inner.restore(&self.absolute(path), dump)
    }

    // === Eventing ===

    fn get_eventing_service_url(&self, path: Option<&str>) -> RegistryResult<Option<String>> {
        let path = path.map(|p| self.absolute(p));
        self.inner.get_eventing_service_url(path.as_deref())
    }

    fn set_eventing_service_url(
        &self,
        path: Option<&str>,
        url: Option<String>,
    ) -> RegistryResult<()> {
        self.inner.set_eventing_service_url(path, url)
    }
}
