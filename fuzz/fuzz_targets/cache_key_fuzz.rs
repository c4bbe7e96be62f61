//! Fuzz test for cache key resolution
//!
//! Resolves arbitrary paths against a small overlapping mount table and
//! checks that resolution never panics and stays deterministic.
//!
//! Run with: cargo +nightly fuzz run cache_key_fuzz -- -max_total_time=60

#![no_main]

use std::sync::Arc;

use carrel_core::{DatabaseConfig, MountEntry, MountTable, MountTarget, TenantId};
use carrel_storage::{BackendDescriptor, CacheKeyResolver};
use libfuzzer_sys::fuzz_target;

fn resolver() -> CacheKeyResolver {
    let mounts = MountTable::from_entries(vec![
        MountEntry {
            source_prefix: "/a".to_string(),
            target_prefix: "/mounted".to_string(),
            target: MountTarget::CachePartition("partition".to_string()),
        },
        MountEntry {
            source_prefix: "/a/b".to_string(),
            target_prefix: "/".to_string(),
            target: MountTarget::Database(
                DatabaseConfig::new("remote", "jdbc:remote").with_username("u@realm"),
            ),
        },
    ]);
    CacheKeyResolver::new(Arc::new(mounts)).with_tenant(TenantId(7))
}

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let resolver = resolver();
    let embedded = BackendDescriptor::embedded(Some(DatabaseConfig::new("db", "jdbc:db")));
    let chrooted = BackendDescriptor::chroot("/root", None);

    for backend in [&embedded, &chrooted] {
        let first = resolver.resolve(backend, input);
        let second = resolver.resolve(backend, input);
        assert_eq!(first, second, "resolution must be deterministic");
        assert_eq!(first.tenant_id(), TenantId(7));

        let cache_path = backend.cache_path(input);
        if !cache_path.starts_with("/a") {
            assert_eq!(first.path(), cache_path);
        } else {
            assert_eq!(first.connection_id(), "partition");
        }
    }
});
