//! Cache keys scoped by backing store, tenant and path.
//!
//! `CacheKey`'s private inner struct means a key cannot be built without
//! all three components. Two keys are equal iff connection identity,
//! tenant and path are all equal.

use std::fmt;
use std::sync::Arc;

use carrel_core::path::absolute_path;
use carrel_core::{
    ContextTenant, CurrentSession, DatabaseConfig, MountTable, MountTarget, TenantId,
};

/// A cache key scoped to a backing store and a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    connection_id: String,
    tenant_id: TenantId,
    path: String,
}

impl CacheKey {
    pub fn new(connection_id: impl Into<String>, tenant_id: TenantId, path: impl Into<String>) -> Self {
        Self {
            inner: CacheKeyInner {
                connection_id: connection_id.into(),
                tenant_id,
                path: path.into(),
            },
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.inner.tenant_id
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}#{}",
            self.inner.connection_id, self.inner.tenant_id, self.inner.path
        )
    }
}

/// Page descriptor suffix for paginated collection keys.
pub fn page_path(path: &str, start: usize, page_size: usize) -> String {
    format!("{};start={};pageSize={}", path, start, page_size)
}

// ============================================================================
// BACKEND DESCRIPTOR
// ============================================================================

/// Which registry variant a facade wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Local store; paths are used as given
    Embedded,
    /// Paths are resolved against a root context first
    Chroot,
}

/// What the cache needs to know about the backend it fronts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub kind: BackendKind,
    pub chroot: Option<String>,
    pub default_database: Option<DatabaseConfig>,
}

impl BackendDescriptor {
    pub fn embedded(default_database: Option<DatabaseConfig>) -> Self {
        Self {
            kind: BackendKind::Embedded,
            chroot: None,
            default_database,
        }
    }

    pub fn chroot(base: impl Into<String>, default_database: Option<DatabaseConfig>) -> Self {
        Self {
            kind: BackendKind::Chroot,
            chroot: Some(base.into()),
            default_database,
        }
    }

    /// The path used for cache addressing.
    pub fn cache_path(&self, path: &str) -> String {
        match self.kind {
            BackendKind::Embedded => path.to_string(),
            BackendKind::Chroot => absolute_path(self.chroot.as_deref(), path),
        }
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Derives cache keys across tenants and mounts.
#[derive(Debug, Clone)]
pub struct CacheKeyResolver {
    mounts: Arc<MountTable>,
    bound_tenant: Option<TenantId>,
}

impl CacheKeyResolver {
    pub fn new(mounts: Arc<MountTable>) -> Self {
        Self {
            mounts,
            bound_tenant: None,
        }
    }

    /// Bind a tenant; it wins over the session and context tenants.
    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.bound_tenant = Some(tenant_id);
        self
    }

    pub fn bound_tenant(&self) -> Option<TenantId> {
        self.bound_tenant
    }

    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }

    /// Bound tenant, else session tenant, else context tenant.
    pub fn resolve_tenant(&self) -> TenantId {
        self.bound_tenant
            .or_else(CurrentSession::tenant_id)
            .unwrap_or_else(ContextTenant::current)
    }

    /// Key for a logical path on `backend`.
    pub fn resolve(&self, backend: &BackendDescriptor, path: &str) -> CacheKey {
        self.resolve_cache_path(backend, &backend.cache_path(path))
    }

    /// Key for one page of a collection.
    pub fn resolve_page(
        &self,
        backend: &BackendDescriptor,
        path: &str,
        start: usize,
        page_size: usize,
    ) -> CacheKey {
        self.resolve(backend, &page_path(path, start, page_size))
    }

    /// Key for a path already in cache-addressing form (absolute for chrooted
    /// backends). Used where the path comes from inside the backend.
    pub fn resolve_cache_path(&self, backend: &BackendDescriptor, cache_path: &str) -> CacheKey {
        let tenant_id = self.resolve_tenant();
        let (path, connection_id) = match self.mounts.first_match(cache_path) {
            Some(entry) => {
                let rewritten = entry
                    .rewrite(cache_path)
                    .unwrap_or_else(|| cache_path.to_string());
                let connection_id = match &entry.target {
                    MountTarget::CachePartition(id) => id.clone(),
                    MountTarget::Database(db) => db.connection_id(),
                };
                (rewritten, connection_id)
            }
            None => (
                cache_path.to_string(),
                backend
                    .default_database
                    .as_ref()
                    .map(DatabaseConfig::connection_id)
                    .unwrap_or_default(),
            ),
        };
        CacheKey::new(connection_id, tenant_id, path)
    }
}

// =============================================================================
// TESTS
// =============================================================================
