//! Handler registration and phase dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use carrel_core::RegistryResult;
use carrel_storage::StorageEngine;

use super::{Filter, Handler, Phase};
use crate::context::RequestContext;
use crate::operation::Operation;

/// Identifies one registration for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    phase: Phase,
    /// Empty means every operation
    operations: Vec<Operation>,
    filter: Arc<dyn Filter>,
    handler: Arc<dyn Handler>,
}

impl Registration {
    fn applies_to(&self, phase: Phase, operation: Operation) -> bool {
        self.phase == phase && (self.operations.is_empty() || self.operations.contains(&operation))
    }
}

/// Ordered handler registrations.
///
/// Handlers of a phase run in registration order. Registration and removal
/// may happen while other threads dispatch; a dispatch works on the set of
/// registrations present when it started.
pub struct HandlerManager {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl Default for HandlerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerManager {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `operations` (all when empty) at `phase`.
    pub fn add_handler(
        &self,
        phase: Phase,
        operations: &[Operation],
        filter: Arc<dyn Filter>,
        handler: Arc<dyn Handler>,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(
            handler = handler.name(),
            phase = ?phase,
            operations = operations.len(),
            "Handler registered"
        );
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                id,
                phase,
                operations: operations.to_vec(),
                filter,
                handler,
            });
        id
    }

    /// Returns whether the registration existed.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    pub fn handler_count(&self) -> usize {
        self.registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run every matching handler of `phase` for the context's operation.
    ///
    /// `Execute` and `Commit` stop at the first error and return it.
    /// `Committed` and `Rollback` run every handler; failures are logged and
    /// never returned.
    pub fn dispatch(
        &self,
        phase: Phase,
        ctx: &mut RequestContext,
        storage: &dyn StorageEngine,
    ) -> RegistryResult<()> {
        let operation = ctx.operation();
        let matching: Vec<(Arc<dyn Filter>, Arc<dyn Handler>)> = self
            .registrations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.applies_to(phase, operation))
            .map(|r| (Arc::clone(&r.filter), Arc::clone(&r.handler)))
            .collect();

        for (idx, (filter, handler)) in matching.iter().enumerate() {
            let result = filter.matches(ctx, storage).and_then(|matched| {
                if matched {
                    tracing::debug!(
                        handler = handler.name(),
                        operation = %operation,
                        phase = ?phase,
                        "Dispatching handler"
                    );
                    handler.handle(ctx, storage)
                } else {
                    Ok(())
                }
            });
            match (phase, result) {
                (_, Ok(())) => {}
                (Phase::Committed | Phase::Rollback, Err(e)) => {
                    tracing::warn!(
                        handler_index = idx,
                        operation = %operation,
                        phase = ?phase,
                        error = %e,
                        "Handler failed after the outcome was decided"
                    );
                }
                (_, Err(e)) => return Err(e),
            }
        }
        Ok(())
    }
}
