//! CARREL Engine - Request Pipeline and Registry Layers
//!
//! Provides the registry built on top of a storage engine:
//! - Phased handler dispatch (EXECUTE, COMMIT, COMMITTED, ROLLBACK)
//! - The transactional envelope every operation runs in
//! - The embedded registry with links, aspects and community features
//! - Chroot and read-through caching decorators
//! - Stack assembly from configuration and tracing setup

pub mod aspect;
pub mod builder;
pub mod caching;
pub mod chroot;
pub mod context;
pub mod embedded;
pub mod eventing;
pub mod handler;
pub mod operation;
pub mod registry;
pub mod statistics;
pub mod telemetry;
pub mod transaction;

pub use aspect::{Aspect, AspectRegistry, LifecycleAspect};
pub use builder::{RegistryBuilder, RegistryStack};
pub use caching::{CacheBackedRegistry, CacheInvalidationHandler};
pub use chroot::ChrootRegistry;
pub use context::{FromOutput, OperationOutput, RequestContext};
pub use embedded::{mount_entry_path, parse_tags, EmbeddedRegistry};
pub use eventing::EventingUrls;
pub use handler::{
    AuthorizationHandler, Filter, Handler, HandlerId, HandlerManager, MatchAll, MediaTypeMatcher,
    Phase, SymLinkHandler, UrlMatcher,
};
pub use operation::Operation;
pub use registry::Registry;
pub use statistics::{OperationStats, StatisticsSink};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use transaction::{Outcome, TransactionalOperation};
