//! CARREL Core - Resource Model and Shared Types
//!
//! Paths, resources, community entities (tags, comments, ratings),
//! the error taxonomy, configuration and the thread-scoped session.
//! Storage and the request pipeline live in `carrel-storage` and
//! `carrel-engine`.

pub mod auth;
pub mod config;
pub mod entities;
pub mod error;
pub mod path;
pub mod resource;
pub mod session;

pub use auth::{Action, AllowAll, Authorizer, StaticRealm, UserRealm};
pub use config::{
    CacheSettings, DatabaseConfig, EventingConfig, EventingPattern, MountConfig, MountEntry,
    MountTable, MountTarget, RegistryConfig, RemoteInstanceConfig,
};
pub use entities::{
    Activity, ActivityKind, Association, Comment, LogFilter, Rating, Tag, TaggedResourcePath,
    Tagging,
};
pub use error::{ConfigError, RegistryError, RegistryResult, StorageError, ValidationError};
pub use path::ResourcePath;
pub use resource::{Content, Resource};
pub use session::{ContextGuard, ContextTenant, CurrentSession, SessionGuard};

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Path of the registry root collection.
pub const ROOT_PATH: &str = "/";

/// Separator between path components.
pub const PATH_SEPARATOR: char = '/';

/// Collection holding one entry per symbolic link or remote mount.
pub const SYSTEM_MOUNT_PATH: &str = "/system/mounts";

/// Media type stamped on link placeholders.
pub const LINK_MEDIA_TYPE: &str = "application/vnd.carrel.link";

/// User recorded for operations that run without a session.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Well-known resource property names.
pub mod properties {
    /// Present (value `true`) on symbolic links and on resources served through one.
    pub const LINK: &str = "registry.link";
    /// Present (value `true`) on remote mount points.
    pub const MOUNT: &str = "registry.mount";
    /// Link target path.
    pub const ACTUAL_PATH: &str = "registry.actualpath";
    /// Path at which a linked resource was requested.
    pub const REAL_PATH: &str = "registry.realpath";
    /// Path at which the link itself lives.
    pub const MOUNT_POINT: &str = "registry.mountpoint";
    /// Remote instance id of a remote mount.
    pub const REMOTE_INSTANCE: &str = "registry.remoteinstance";
    /// Sub path inside the remote instance.
    pub const TARGET_SUB_PATH: &str = "registry.targetpoint";
    /// Link placeholders are not traversed recursively by dump.
    pub const NON_RECURSIVE: &str = "registry.nonrecursive";
    /// The link was created over a resource that already existed.
    pub const EXISTING_RESOURCE: &str = "registry.existingresource";
    /// Marks placeholders so links can be restored at startup.
    pub const LINK_RESTORATION: &str = "registry.linkrestoration";
    /// Source recorded by `import_resource`.
    pub const IMPORT_SOURCE: &str = "registry.import.source";
    /// Mount entry: link path.
    pub const MOUNT_ENTRY_PATH: &str = "path";
    /// Mount entry: link target.
    pub const MOUNT_ENTRY_TARGET: &str = "target";
    /// Mount entry: remote instance id, if any.
    pub const MOUNT_ENTRY_INSTANCE: &str = "instanceId";
}

// ============================================================================
// TENANT IDENTITY
// ============================================================================

/// Numeric tenant identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub i32);

impl TenantId {
    /// Tenant owning the deployment itself.
    pub const SUPER: TenantId = TenantId(-1234);
    /// Sentinel for an unresolved tenant.
    pub const INVALID: TenantId = TenantId(-1);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for TenantId {
    fn from(value: i32) -> Self {
        TenantId(value)
    }
}
