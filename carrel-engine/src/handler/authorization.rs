//! Authorization enforced as an EXECUTE-phase handler.

use std::sync::Arc;

use carrel_core::{Action, Authorizer, RegistryError, RegistryResult};
use carrel_storage::StorageEngine;

use super::Handler;
use crate::context::RequestContext;
use crate::operation::Operation;

/// Checks the action implied by the operation before anything else runs.
///
/// Relocating operations also need `Put` on the target path.
pub struct AuthorizationHandler {
    authorizer: Arc<dyn Authorizer>,
}

impl AuthorizationHandler {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self { authorizer }
    }

    fn check(&self, user: &str, path: &str, action: Action) -> RegistryResult<()> {
        if self.authorizer.authorize(user, path, action)? {
            Ok(())
        } else {
            tracing::debug!(user, path, action = %action, "Authorization denied");
            Err(RegistryError::denied(user, action, path))
        }
    }
}

impl Handler for AuthorizationHandler {
    fn name(&self) -> &str {
        "authorization"
    }

    fn handle(&self, ctx: &mut RequestContext, _storage: &dyn StorageEngine) -> RegistryResult<()> {
        let operation = ctx.operation();
        let primary = ctx
            .source_path
            .clone()
            .unwrap_or_else(|| ctx.resource_path());
        self.check(&ctx.user, &primary, operation.action())?;

        if matches!(operation, Operation::Move | Operation::Rename | Operation::Copy) {
            if let Some(target) = &ctx.target_path {
                self.check(&ctx.user, target, Action::Put)?;
            }
        }
        Ok(())
    }
}
