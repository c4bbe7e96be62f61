//! Read-through cache behaviour of the caching facade over an embedded
//! registry backed by a recording storage engine.

use std::sync::{Arc, Mutex};
use std::thread;

use carrel_core::{MountTable, RegistryError, RegistryResult, Resource, TenantId};
use carrel_engine::{
    CacheBackedRegistry, EmbeddedRegistry, MatchAll, Operation, Phase, Registry, RequestContext,
};
use carrel_storage::{BackendDescriptor, CacheKey, CacheKeyResolver, GhostCache, StorageEngine};
use carrel_test_utils::assertions::{assert_denied, assert_not_found};
use carrel_test_utils::fixtures::{default_database, link_resource, mount_resource, partition_mount, text_resource};
use carrel_test_utils::generators::{arb_resource_path, arb_tenant};
use carrel_test_utils::{CountingAuthorizer, RecordingStorage};
use proptest::prelude::*;

struct Harness {
    storage: Arc<RecordingStorage>,
    authorizer: Arc<CountingAuthorizer>,
    registry: Arc<CacheBackedRegistry>,
}

fn harness() -> Harness {
    let storage = Arc::new(RecordingStorage::new());
    let authorizer = Arc::new(CountingAuthorizer::default());
    let embedded = EmbeddedRegistry::new(storage.clone())
        .with_descriptor(BackendDescriptor::embedded(Some(default_database())));
    let registry = Arc::new(CacheBackedRegistry::new(
        Arc::new(embedded),
        Arc::new(GhostCache::default()),
        CacheKeyResolver::new(Arc::new(MountTable::default())).with_tenant(TenantId(0)),
        authorizer.clone(),
    ));
    Harness {
        storage,
        authorizer,
        registry,
    }
}

#[test]
fn test_end_to_end_scenario() {
    let h = harness();
    h.registry.put("/x", &text_resource("/x", "R")).unwrap();
    h.storage.reset();

    let first = h.registry.get("/x").unwrap();
    assert_eq!(first.bytes(), Some(&b"R"[..]));
    let key = CacheKey::new("user@jdbc:db1", TenantId(0), "/x");
    assert_eq!(h.registry.cache_key("/x"), key);
    assert_eq!(h.registry.cache().len(), 1);
    let cached = h.registry.cache().get(&key).unwrap().get().unwrap();
    assert_eq!(cached.bytes(), Some(&b"R"[..]));

    let gets = h.storage.calls("get");
    let second = h.registry.get("/x").unwrap();
    assert_eq!(second.bytes(), first.bytes());
    assert_eq!(h.storage.calls("get"), gets);
    assert_eq!(h.authorizer.calls(), 1);

    assert!(!h.registry.resource_exists("/y").unwrap());
    assert!(!h.registry.resource_exists("/y").unwrap());
    assert_eq!(h.storage.calls("exists"), 2);

    h.registry.put("/y", &text_resource("/y", "Y")).unwrap();
    let before = h.registry.cache().len();
    assert!(h.registry.resource_exists("/y").unwrap());
    assert_eq!(h.registry.cache().len(), before + 1);
    let ghost = h.registry.cache().get(&h.registry.cache_key("/y")).unwrap();
    assert!(ghost.is_empty());
}

#[test]
fn test_mount_precedence_follows_declaration_order() {
    let outer = partition_mount("/a", "/outer", "p-outer");
    let inner = partition_mount("/a/b", "/inner", "p-inner");
    let backend = BackendDescriptor::embedded(Some(default_database()));

    let resolver = CacheKeyResolver::new(Arc::new(MountTable::from_entries(vec![
        outer.clone(),
        inner.clone(),
    ])))
    .with_tenant(TenantId(0));
    assert_eq!(
        resolver.resolve(&backend, "/a/b/c"),
        CacheKey::new("p-outer", TenantId(0), "/outer/b/c")
    );

    let resolver = CacheKeyResolver::new(Arc::new(MountTable::from_entries(vec![inner, outer])))
        .with_tenant(TenantId(0));
    assert_eq!(
        resolver.resolve(&backend, "/a/b/c"),
        CacheKey::new("p-inner", TenantId(0), "/inner/c")
    );
    assert_eq!(
        resolver.resolve(&backend, "/z"),
        CacheKey::new("user@jdbc:db1", TenantId(0), "/z")
    );
}

#[test]
fn test_ghost_upgrade_keeps_single_entry() {
    let h = harness();
    h.registry.put("/g", &text_resource("/g", "payload")).unwrap();
    let key = h.registry.cache_key("/g");

    assert!(h.registry.resource_exists("/g").unwrap());
    assert_eq!(h.registry.cache().len(), 1);
    assert!(h.registry.cache().get(&key).unwrap().is_empty());

    let fetched = h.registry.get("/g").unwrap();
    assert_eq!(h.registry.cache().len(), 1);
    let entry = h.registry.cache().get(&key).unwrap();
    assert_eq!(entry.get().unwrap().bytes(), fetched.bytes());
    assert_eq!(h.registry.stats().ghost_upgrades, 1);
}

#[test]
fn test_absence_is_never_cached() {
    let h = harness();
    for expected in 1..=3 {
        assert!(!h.registry.resource_exists("/missing").unwrap());
        assert_eq!(h.storage.calls("exists"), expected);
        assert!(h.registry.cache().is_empty());
    }

    h.registry.put("/missing", &Resource::new("/missing")).unwrap();
    assert!(h.registry.resource_exists("/missing").unwrap());
    assert_eq!(h.registry.cache().len(), 1);

    // Served from the entry now
    let exists_calls = h.storage.calls("exists");
    assert!(h.registry.resource_exists("/missing").unwrap());
    assert_eq!(h.storage.calls("exists"), exists_calls);
}

#[test]
fn test_hit_is_reauthorized() {
    let h = harness();
    h.registry.put("/secret", &text_resource("/secret", "s")).unwrap();
    h.registry.get("/secret").unwrap();
    assert_eq!(h.registry.cache().len(), 1);

    h.authorizer.set_allow(false);
    let gets = h.storage.calls("get");
    assert_denied(&h.registry.get("/secret"));
    assert_eq!(h.storage.calls("get"), gets);
    assert_eq!(h.registry.cache().len(), 1);

    h.authorizer.set_allow(true);
    assert!(h.registry.get("/secret").is_ok());
}

#[test]
fn test_links_are_not_cached_but_mounts_are() {
    let h = harness();
    h.registry.put("/l", &link_resource("/l")).unwrap();
    assert!(h.registry.get("/l").unwrap().is_link());
    assert!(h.registry.cache().is_empty());

    h.registry.put("/m", &mount_resource("/m")).unwrap();
    assert!(h.registry.get("/m").unwrap().is_mount());
    assert_eq!(h.registry.cache().len(), 1);
    assert!(h.registry.cache().contains(&h.registry.cache_key("/m")));
}

#[test]
fn test_link_collection_pages_are_not_cached() {
    let h = harness();
    h.registry.put("/m/child", &Resource::new("/m/child")).unwrap();
    let mut mount = mount_resource("/m");
    mount.content = carrel_core::Content::Children(Vec::new());
    h.registry.put("/m", &mount).unwrap();

    h.registry.get_collection("/m", 0, 10).unwrap();
    assert!(h.registry.cache().is_empty());

    h.registry.put("/plain/a", &Resource::new("/plain/a")).unwrap();
    h.registry.get_collection("/plain", 0, 10).unwrap();
    assert_eq!(h.registry.cache().len(), 1);
}

#[test]
fn test_community_paths_bypass_the_cache() {
    let h = harness();
    h.registry.put("/a/b", &Resource::new("/a/b")).unwrap();
    h.registry.add_comment("/a/b", "first").unwrap();

    for _ in 0..3 {
        let comments = h.registry.get("/a/b;comments").unwrap();
        assert_eq!(comments.children().unwrap().len(), 1);
    }
    let stats = h.registry.stats();
    assert_eq!(stats.hits + stats.misses, 0);
    assert_eq!(stats.inserts, 0);
    assert_eq!(stats.bypasses, 3);
    assert!(h.registry.cache().is_empty());
    assert_eq!(h.authorizer.calls(), 0);
}

#[test]
fn test_mutation_invalidates_before_next_read() {
    let h = harness();
    h.registry.put("/x", &text_resource("/x", "old")).unwrap();
    assert_eq!(h.registry.get("/x").unwrap().bytes(), Some(&b"old"[..]));
    h.registry.put("/x", &text_resource("/x", "new")).unwrap();
    assert_eq!(h.registry.get("/x").unwrap().bytes(), Some(&b"new"[..]));
}

#[test]
fn test_read_inside_commit_window_leaves_no_stale_entry() {
    let h = harness();
    h.registry.put("/x", &text_resource("/x", "old")).unwrap();
    assert_eq!(h.registry.get("/x").unwrap().bytes(), Some(&b"old"[..]));

    // A reader running between the mutation and the storage commit
    let facade = Arc::downgrade(&h.registry);
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        h.registry.handler_manager().add_handler(
            Phase::Commit,
            &[Operation::Put],
            Arc::new(MatchAll),
            Arc::new(move |_ctx: &mut RequestContext, _s: &dyn StorageEngine| -> RegistryResult<()> {
                let Some(facade) = facade.upgrade() else {
                    return Ok(());
                };
                let reader = thread::spawn(move || {
                    facade.get("/x").map(|r| r.bytes().map(<[u8]>::to_vec))
                });
                let read = reader
                    .join()
                    .map_err(|_| RegistryError::server_content("reader panicked"))??;
                seen.lock().unwrap().push(read);
                Ok(())
            }),
        );
    }

    h.registry.put("/x", &text_resource("/x", "new")).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Some(b"old".to_vec())]);
    assert_eq!(h.registry.get("/x").unwrap().bytes(), Some(&b"new"[..]));

    // Same window with nothing cached beforehand
    h.registry.cache().clear();
    h.registry.put("/x", &text_resource("/x", "newer")).unwrap();
    assert_eq!(h.registry.get("/x").unwrap().bytes(), Some(&b"newer"[..]));
}

#[test]
fn test_removed_version_history_is_not_served_from_cache() {
    let h = harness();
    h.registry.put("/doc", &text_resource("/doc", "one")).unwrap();
    h.registry.create_version("/doc").unwrap();
    let archived = "/doc;version:1";
    assert_eq!(h.registry.get(archived).unwrap().bytes(), Some(&b"one"[..]));
    assert!(h.registry.cache().contains(&h.registry.cache_key(archived)));

    assert!(h.registry.remove_version_history("/doc", 1).unwrap());
    assert!(h.registry.cache().is_empty());
    assert_not_found(&h.registry.get(archived));
}

#[test]
fn test_failed_mutation_keeps_cache() {
    let h = harness();
    h.registry.put("/keep", &text_resource("/keep", "v")).unwrap();
    h.registry.get("/keep").unwrap();
    assert!(h.registry.rename("/absent", "other").is_err());
    assert_eq!(h.registry.cache().len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_cache_key_is_deterministic(path in arb_resource_path(), tenant in arb_tenant()) {
        let mounts = Arc::new(MountTable::from_entries(vec![partition_mount("/a", "/t", "p")]));
        let backend = BackendDescriptor::embedded(Some(default_database()));
        let resolver = CacheKeyResolver::new(mounts).with_tenant(tenant);
        let first = resolver.resolve(&backend, &path);
        let second = resolver.resolve(&backend, &path);
        prop_assert_eq!(first.tenant_id(), tenant);
        prop_assert_eq!(first, second);
    }
}
