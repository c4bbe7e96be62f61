//! The transactional envelope every registry operation runs in.
//!
//! ```text
//! begin
//!   child EXECUTE (put/import only)
//!   EXECUTE handlers
//!   simulation?            -> rollback, return Simulated
//!   processing complete?   -> take handler output
//!   else version guard, default storage call
//!   COMMIT handlers
//!   flush activity log
//! commit
//! COMMITTED handlers
//! ```
//!
//! Any error after `begin` runs the ROLLBACK handlers and rolls back;
//! exactly one of commit or rollback reaches the storage engine. COMMITTED
//! handlers see the published state and cannot fail the operation.

use std::time::Instant;

use carrel_core::{RegistryError, RegistryResult, ResourcePath, ValidationError};
use carrel_storage::StorageEngine;

use crate::context::{FromOutput, RequestContext};
use crate::handler::{HandlerManager, Phase};
use crate::statistics::StatisticsSink;

/// How an operation produced its value.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The default storage call ran.
    Completed(T),
    /// A handler marked processing complete; its output, if any.
    Handled(Option<T>),
    /// A handler requested simulation; nothing was persisted.
    Simulated(Option<T>),
}

impl<T> Outcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            Outcome::Handled(v) | Outcome::Simulated(v) => v,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Outcome::Simulated(_))
    }
}

impl<T: Default> Outcome<T> {
    pub fn into_value_or_default(self) -> T {
        self.into_value().unwrap_or_default()
    }
}

pub struct TransactionalOperation<'a> {
    storage: &'a dyn StorageEngine,
    handlers: &'a HandlerManager,
    statistics: Option<&'a StatisticsSink>,
}

impl<'a> TransactionalOperation<'a> {
    pub fn new(storage: &'a dyn StorageEngine, handlers: &'a HandlerManager) -> Self {
        Self {
            storage,
            handlers,
            statistics: None,
        }
    }

    pub fn with_statistics(mut self, statistics: Option<&'a StatisticsSink>) -> Self {
        self.statistics = statistics;
        self
    }

    /// Run `ctx` through the handler phases, calling `default_call` unless a
    /// handler completed or simulated the operation.
    pub fn run<T, F>(&self, ctx: &mut RequestContext, default_call: F) -> RegistryResult<Outcome<T>>
    where
        T: FromOutput,
        F: FnOnce(&mut RequestContext, &dyn StorageEngine) -> RegistryResult<T>,
    {
        let started = Instant::now();
        self.storage.begin_transaction()?;

        let result = match self.execute(ctx, default_call) {
            Ok(outcome) if outcome.is_simulated() => {
                tracing::debug!(operation = %ctx.operation(), "Simulated operation rolled back");
                self.storage.rollback_transaction().map(|()| outcome)
            }
            Ok(outcome) => match self.storage.commit_transaction() {
                Ok(()) => {
                    // Committed dispatch never returns an error.
                    let _ = self.handlers.dispatch(Phase::Committed, ctx, self.storage);
                    Ok(outcome)
                }
                Err(e) => Err(self.abort(ctx, e)),
            },
            Err(e) => Err(self.abort(ctx, e)),
        };

        if let Some(statistics) = self.statistics {
            statistics.record(ctx.operation(), started.elapsed());
        }
        result
    }

    /// Run `f` inside a transaction without any handler dispatch.
    pub fn run_plain<T>(
        &self,
        f: impl FnOnce(&dyn StorageEngine) -> RegistryResult<T>,
    ) -> RegistryResult<T> {
        self.storage.begin_transaction()?;
        match f(self.storage) {
            Ok(value) => {
                self.storage.commit_transaction()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.storage.rollback_transaction() {
                    tracing::warn!(error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    fn execute<T, F>(&self, ctx: &mut RequestContext, default_call: F) -> RegistryResult<Outcome<T>>
    where
        T: FromOutput,
        F: FnOnce(&mut RequestContext, &dyn StorageEngine) -> RegistryResult<T>,
    {
        if let Some(child) = ctx.child_mut() {
            self.handlers.dispatch(Phase::Execute, child, self.storage)?;
        }
        self.handlers.dispatch(Phase::Execute, ctx, self.storage)?;

        if ctx.is_simulation() {
            return Ok(Outcome::Simulated(ctx.take_output().and_then(T::from_output)));
        }

        let outcome = if ctx.is_processing_complete() {
            Outcome::Handled(ctx.take_output().and_then(T::from_output))
        } else {
            if ctx.operation().requires_current_version()
                && !ResourcePath::parse(&ctx.path).is_current_version()
            {
                return Err(ValidationError::ArchivedVersion {
                    path: ctx.path.clone(),
                }
                .into());
            }
            Outcome::Completed(default_call(ctx, self.storage)?)
        };

        self.handlers.dispatch(Phase::Commit, ctx, self.storage)?;

        if ctx.is_logging_activity() {
            for activity in ctx.take_activities() {
                self.storage.add_log(&activity)?;
            }
        }
        Ok(outcome)
    }

    fn abort(&self, ctx: &mut RequestContext, error: RegistryError) -> RegistryError {
        tracing::debug!(operation = %ctx.operation(), error = %error, "Operation failed, rolling back");
        // Rollback dispatch never returns an error.
        let _ = self.handlers.dispatch(Phase::Rollback, ctx, self.storage);
        if let Err(e) = self.storage.rollback_transaction() {
            tracing::warn!(operation = %ctx.operation(), error = %e, "Storage rollback failed");
        }
        error
    }
}
