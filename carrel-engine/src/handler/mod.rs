//! Request handlers and their dispatch.
//!
//! Handlers intercept operations at four phases:
//! - `Execute` before the default storage call, able to replace it
//! - `Commit` after a successful call, before the storage commit
//! - `Committed` once the storage commit has succeeded
//! - `Rollback` after any failure, before the storage rollback
//!
//! Each registration pairs a handler with a [`Filter`] and the set of
//! operations it applies to.

pub mod authorization;
pub mod filter;
pub mod manager;
pub mod symlink;

pub use authorization::AuthorizationHandler;
pub use filter::{Filter, MatchAll, MediaTypeMatcher, UrlMatcher};
pub use manager::{HandlerId, HandlerManager};
pub use symlink::SymLinkHandler;

use carrel_core::RegistryResult;
use carrel_storage::StorageEngine;

use crate::context::RequestContext;

/// Phase at which a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Execute,
    Commit,
    /// Runs outside the transaction; failures cannot undo the operation.
    Committed,
    Rollback,
}

/// An interceptor for registry operations.
pub trait Handler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn handle(&self, ctx: &mut RequestContext, storage: &dyn StorageEngine) -> RegistryResult<()>;
}

impl<F> Handler for F
where
    F: Fn(&mut RequestContext, &dyn StorageEngine) -> RegistryResult<()> + Send + Sync,
{
    fn handle(&self, ctx: &mut RequestContext, storage: &dyn StorageEngine) -> RegistryResult<()> {
        self(ctx, storage)
    }
}
