//! Aspects: named behaviours attached to resources.
//!
//! An aspect is associated with a resource once, then invoked with named
//! actions. Aspects are registered per tenant.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use carrel_core::{RegistryResult, Resource, TenantId, ValidationError};
use carrel_storage::StorageEngine;

use crate::context::RequestContext;

pub trait Aspect: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare `resource` for this aspect. The caller persists it.
    fn associate(&self, resource: &mut Resource, storage: &dyn StorageEngine) -> RegistryResult<()>;

    /// Perform `action` on `ctx.resource`. The caller persists it.
    fn invoke(
        &self,
        ctx: &mut RequestContext,
        action: &str,
        storage: &dyn StorageEngine,
    ) -> RegistryResult<()>;

    fn available_actions(&self, resource: &Resource) -> Vec<String>;
}

/// Aspects known to each tenant.
#[derive(Default)]
pub struct AspectRegistry {
    by_tenant: RwLock<HashMap<TenantId, BTreeMap<String, Arc<dyn Aspect>>>>,
}

impl AspectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the tenant already had an aspect of that name.
    pub fn add(&self, tenant_id: TenantId, aspect: Arc<dyn Aspect>) -> bool {
        let mut by_tenant = self.by_tenant.write().unwrap_or_else(PoisonError::into_inner);
        let aspects = by_tenant.entry(tenant_id).or_default();
        if aspects.contains_key(aspect.name()) {
            return false;
        }
        aspects.insert(aspect.name().to_string(), aspect);
        true
    }

    pub fn remove(&self, tenant_id: TenantId, name: &str) -> bool {
        self.by_tenant
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&tenant_id)
            .is_some_and(|aspects| aspects.remove(name).is_some())
    }

    pub fn get(&self, tenant_id: TenantId, name: &str) -> Option<Arc<dyn Aspect>> {
        self.by_tenant
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tenant_id)
            .and_then(|aspects| aspects.get(name).cloned())
    }

    pub fn names(&self, tenant_id: TenantId) -> Vec<String> {
        self.by_tenant
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tenant_id)
            .map(|aspects| aspects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// LIFECYCLE ASPECT
// ============================================================================

pub const PROMOTE: &str = "promote";
pub const DEMOTE: &str = "demote";

/// Moves a resource through an ordered list of states.
#[derive(Debug, Clone)]
pub struct LifecycleAspect {
    name: String,
    states: Vec<String>,
}

impl LifecycleAspect {
    pub fn new<I, S>(name: impl Into<String>, states: I) -> RegistryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let states: Vec<String> = states.into_iter().map(Into::into).collect();
        if states.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "states".to_string(),
                reason: "a lifecycle needs at least one state".to_string(),
            }
            .into());
        }
        Ok(Self {
            name: name.into(),
            states,
        })
    }

    /// Property holding the current state.
    pub fn state_property(&self) -> String {
        format!("registry.lifecycle.{}.state", self.name)
    }

    pub fn state_of(&self, resource: &Resource) -> Option<usize> {
        let current = resource.property(&self.state_property())?;
        self.states.iter().position(|s| s == current)
    }
}

impl Aspect for LifecycleAspect {
    fn name(&self) -> &str {
        &self.name
    }

    fn associate(&self, resource: &mut Resource, _storage: &dyn StorageEngine) -> RegistryResult<()> {
        resource.set_property(self.state_property(), self.states[0].clone());
        Ok(())
    }

    fn invoke(
        &self,
        ctx: &mut RequestContext,
        action: &str,
        _storage: &dyn StorageEngine,
    ) -> RegistryResult<()> {
        let path = ctx.resource_path();
        let Some(resource) = ctx.resource.as_mut() else {
            return Err(carrel_core::RegistryError::not_found(path));
        };
        let index = self.state_of(resource).unwrap_or(0);
        let next = match action {
            PROMOTE if index + 1 < self.states.len() => index + 1,
            DEMOTE if index > 0 => index - 1,
            _ => {
                return Err(ValidationError::InvalidValue {
                    field: "action".to_string(),
                    reason: format!("'{}' is not available in state '{}'", action, self.states[index]),
                }
                .into())
            }
        };
        resource.set_property(self.state_property(), self.states[next].clone());
        ctx.properties.insert(
            self.state_property(),
            serde_json::Value::String(self.states[next].clone()),
        );
        Ok(())
    }

    fn available_actions(&self, resource: &Resource) -> Vec<String> {
        let index = self.state_of(resource).unwrap_or(0);
        let mut actions = Vec::new();
        if index + 1 < self.states.len() {
            actions.push(PROMOTE.to_string());
        }
        if index > 0 {
            actions.push(DEMOTE.to_string());
        }
        actions
    }
}
