//! Read-through cache primitives with ghost entries.
//!
//! A cached value is wrapped in a [`GhostResource`]: a shared cell whose
//! payload may be empty. An empty payload records that the path exists
//! without caching its content, so an existence check and a later content
//! read share one cache slot. Filling the payload upgrades the entry in
//! place, without a second cache write.
//!
//! # Keys
//!
//! [`CacheKey`] values can only be built with a connection identity, a
//! tenant and a path. The [`CacheKeyResolver`] derives all three, applying
//! the mount table so that entries from different backing stores never
//! collide.
//!
//! # Example
//!
//! ```ignore
//! let resolver = CacheKeyResolver::new(mounts).with_tenant(TenantId(0));
//! let key = resolver.resolve(&backend, "/x");
//! cache.insert_ghost(key.clone());
//! if let Some(ghost) = cache.get(&key) {
//!     ghost.set(resource);
//! }
//! ```

pub mod ghost;
pub mod key;
pub mod memory_backend;
pub mod traits;

pub use ghost::{GhostCache, GhostResource};
pub use key::{page_path, BackendDescriptor, BackendKind, CacheKey, CacheKeyResolver};
pub use memory_backend::InMemoryCache;
pub use traits::{CacheStats, KeyValueCache};
