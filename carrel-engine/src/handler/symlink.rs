//! Symbolic link and remote mount resolution.

use carrel_core::path::{is_descendant, rebase};
use carrel_core::{properties, Content, RegistryResult, Resource, ResourcePath};
use carrel_storage::StorageEngine;

use super::Handler;
use crate::context::RequestContext;
use crate::operation::Operation;

/// Serves requests under a link path from the link's target.
///
/// Reads at or below the mount point are answered from the target and the
/// request is marked complete. Other operations strictly below the mount
/// point are re-addressed to the target and continue down the pipeline.
/// Operations on the mount point itself act on the placeholder.
#[derive(Debug, Clone)]
pub struct SymLinkHandler {
    mount_point: String,
    target_point: String,
    remote_instance: Option<String>,
}

impl SymLinkHandler {
    pub fn new(mount_point: impl Into<String>, target_point: impl Into<String>) -> Self {
        Self {
            mount_point: mount_point.into(),
            target_point: target_point.into(),
            remote_instance: None,
        }
    }

    /// A link into a remote instance; resolved locally against the sub path.
    pub fn remote(
        mount_point: impl Into<String>,
        instance_id: impl Into<String>,
        target_sub_path: impl Into<String>,
    ) -> Self {
        Self {
            mount_point: mount_point.into(),
            target_point: target_sub_path.into(),
            remote_instance: Some(instance_id.into()),
        }
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn target_point(&self) -> &str {
        &self.target_point
    }

    fn to_target(&self, path: &str) -> Option<String> {
        rebase(path, &self.mount_point, &self.target_point)
    }

    fn beneath(&self, raw: &str) -> Option<String> {
        let rp = ResourcePath::parse(raw);
        if !is_descendant(rp.path(), &self.mount_point) {
            return None;
        }
        self.to_target(rp.path())
            .map(|target| format!("{}{}", target, rp.fragment()))
    }

    /// Re-address a resource read from the target to where it was requested.
    fn present(&self, mut resource: Resource, requested: &str, actual: &str) -> Resource {
        resource.path = requested.to_string();
        if let Content::Children(children) = &mut resource.content {
            for child in children.iter_mut() {
                if let Some(mapped) = rebase(child, &self.target_point, &self.mount_point) {
                    *child = mapped;
                }
            }
        }
        resource.set_property(properties::LINK, "true");
        resource.set_property(properties::MOUNT_POINT, self.mount_point.clone());
        resource.set_property(properties::TARGET_SUB_PATH, self.target_point.clone());
        resource.set_property(properties::ACTUAL_PATH, actual);
        if let Some(instance) = &self.remote_instance {
            resource.set_property(properties::MOUNT, "true");
            resource.set_property(properties::REMOTE_INSTANCE, instance.clone());
        }
        resource
    }

    fn serve_read(&self, ctx: &mut RequestContext, storage: &dyn StorageEngine) -> RegistryResult<()> {
        let requested = ResourcePath::parse(&ctx.path);
        let Some(actual) = self.to_target(requested.path()) else {
            return Ok(());
        };
        let actual_raw = format!("{}{}", actual, requested.fragment());

        let found = match ctx.operation() {
            Operation::ResourceExists => {
                if storage.exists(&actual_raw)? {
                    ctx.set_output(true);
                    true
                } else {
                    false
                }
            }
            Operation::GetCollection => {
                match storage.get_collection(&actual_raw, ctx.start, ctx.page_size)? {
                    Some(r) => {
                        ctx.set_output(self.present(r, requested.raw(), &actual));
                        true
                    }
                    None => false,
                }
            }
            _ => match storage.get(&actual_raw)? {
                Some(r) => {
                    ctx.set_output(self.present(r, requested.raw(), &actual));
                    true
                }
                None => false,
            },
        };

        // A dangling link falls through to the placeholder.
        if found {
            ctx.set_processing_complete(true);
        }
        Ok(())
    }

    fn readdress(&self, ctx: &mut RequestContext) {
        if let Some(target) = self.beneath(&ctx.path) {
            if ctx.original_path.is_none() {
                ctx.original_path = Some(ctx.path.clone());
            }
            ctx.path = target;
        }
        if let Some(source) = ctx.source_path.as_deref().and_then(|p| self.beneath(p)) {
            ctx.source_path = Some(source);
        }
        if let Some(target) = ctx.target_path.as_deref().and_then(|p| self.beneath(p)) {
            ctx.target_path = Some(target);
        }
    }
}

impl Handler for SymLinkHandler {
    fn name(&self) -> &str {
        "symlink"
    }

    fn handle(&self, ctx: &mut RequestContext, storage: &dyn StorageEngine) -> RegistryResult<()> {
        match ctx.operation() {
            Operation::Get | Operation::GetCollection | Operation::ResourceExists => {
                self.serve_read(ctx, storage)
            }
            _ => {
                self.readdress(ctx);
                Ok(())
            }
        }
    }
}
