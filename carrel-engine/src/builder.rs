//! Assembles a registry stack from configuration.
//!
//! Layers, innermost first: the embedded registry over a storage engine, an
//! optional chroot, then the caching facade when the cache is enabled.
//!
//! The authorizer guards both paths: an EXECUTE-phase handler on the
//! embedded registry checks every operation, and the facade re-checks
//! cache hits.

use std::sync::Arc;

use carrel_core::{AllowAll, Authorizer, RegistryConfig, RegistryResult, StaticRealm, TenantId, UserRealm};
use carrel_storage::{
    BackendDescriptor, CacheKeyResolver, GhostCache, InMemoryCache, InMemoryStorage, StorageEngine,
};

use crate::caching::CacheBackedRegistry;
use crate::chroot::ChrootRegistry;
use crate::embedded::EmbeddedRegistry;
use crate::eventing::EventingUrls;
use crate::handler::{AuthorizationHandler, MatchAll, Phase};
use crate::registry::Registry;
use crate::statistics::StatisticsSink;

/// The assembled layers. `registry` is the outermost one.
pub struct RegistryStack {
    pub registry: Arc<dyn Registry>,
    pub embedded: Arc<EmbeddedRegistry>,
    pub cache: Option<Arc<CacheBackedRegistry>>,
    pub statistics: Option<Arc<StatisticsSink>>,
}

pub struct RegistryBuilder {
    config: RegistryConfig,
    storage: Option<Arc<dyn StorageEngine>>,
    authorizer: Arc<dyn Authorizer>,
    realm: Arc<dyn UserRealm>,
    statistics: Option<Arc<StatisticsSink>>,
    bound_tenant: Option<TenantId>,
    authorization_handler: bool,
}

impl RegistryBuilder {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            storage: None,
            authorizer: Arc::new(AllowAll),
            realm: Arc::new(StaticRealm::default()),
            statistics: None,
            bound_tenant: None,
            authorization_handler: true,
        }
    }

    /// Use `storage` instead of an in-memory engine. The engine's own
    /// no-cache patterns apply; `no_cache_paths` from the config does not.
    pub fn with_storage(mut self, storage: Arc<dyn StorageEngine>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_realm(mut self, realm: Arc<dyn UserRealm>) -> Self {
        self.realm = realm;
        self
    }

    pub fn with_statistics(mut self, statistics: Arc<StatisticsSink>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Bind cache keys to one tenant regardless of session.
    pub fn with_bound_tenant(mut self, tenant_id: TenantId) -> Self {
        self.bound_tenant = Some(tenant_id);
        self
    }

    /// Check the authorizer in the EXECUTE phase of every operation. On by
    /// default; when off, only cache hits are checked.
    pub fn with_authorization_handler(mut self, enabled: bool) -> Self {
        self.authorization_handler = enabled;
        self
    }

    pub fn build(self) -> RegistryResult<RegistryStack> {
        self.config.validate()?;
        let mounts = Arc::new(self.config.mount_table()?);
        tracing::info!(entries = mounts.len(), "Mount table built");

        let storage = match self.storage {
            Some(storage) => storage,
            None => Arc::new(InMemoryStorage::new().with_no_cache_paths(&self.config.no_cache_paths)?),
        };

        let descriptor = BackendDescriptor::embedded(self.config.default_database_config().cloned());
        let mut embedded = EmbeddedRegistry::new(storage)
            .with_descriptor(descriptor)
            .with_realm(self.realm)
            .with_eventing(EventingUrls::from_config(&self.config.eventing)?)
            .with_remote_instances(self.config.remote_instances.clone());
        if let Some(statistics) = &self.statistics {
            embedded = embedded.with_statistics(Arc::clone(statistics));
        }
        let embedded = Arc::new(embedded);

        if self.authorization_handler {
            embedded.handler_manager().add_handler(
                Phase::Execute,
                &[],
                Arc::new(MatchAll),
                Arc::new(AuthorizationHandler::new(Arc::clone(&self.authorizer))),
            );
        }
        embedded.restore_links()?;

        let mut registry: Arc<dyn Registry> = Arc::clone(&embedded) as Arc<dyn Registry>;
        if let Some(base) = &self.config.chroot {
            registry = Arc::new(ChrootRegistry::new(registry, base.clone()));
        }

        let cache = if self.config.cache.enabled {
            let backend = match self.config.cache.max_entries {
                Some(max) => InMemoryCache::new().with_max_entries(max),
                None => InMemoryCache::new(),
            };
            let mut resolver = CacheKeyResolver::new(Arc::clone(&mounts));
            if let Some(tenant_id) = self.bound_tenant {
                resolver = resolver.with_tenant(tenant_id);
            }
            let facade = Arc::new(CacheBackedRegistry::new(
                Arc::clone(&registry),
                Arc::new(GhostCache::new(backend)),
                resolver,
                Arc::clone(&self.authorizer),
            ));
            registry = Arc::clone(&facade) as Arc<dyn Registry>;
            Some(facade)
        } else {
            None
        };

        tracing::info!(
            mounts = mounts.len(),
            chroot = ?self.config.chroot,
            cache_enabled = cache.is_some(),
            "Registry assembled"
        );

        Ok(RegistryStack {
            registry,
            embedded,
            cache,
            statistics: self.statistics,
        })
    }
}
