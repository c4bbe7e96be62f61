use carrel_core::{DatabaseConfig, MountEntry, MountTable, MountTarget, Resource, TenantId};
use carrel_storage::{BackendDescriptor, CacheKeyResolver, GhostCache};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;

fn bench_mounts(count: usize) -> MountTable {
    MountTable::from_entries(
        (0..count)
            .map(|i| MountEntry {
                source_prefix: format!("/_system/mount{}", i),
                target_prefix: format!("/_system/remote{}", i),
                target: MountTarget::Database(
                    DatabaseConfig::new(format!("db{}", i), format!("jdbc:db{}", i))
                        .with_username("registry@carbon.super"),
                ),
            })
            .collect(),
    )
}

fn bench_key_resolution(c: &mut Criterion) {
    let backend = BackendDescriptor::embedded(Some(
        DatabaseConfig::new("local", "jdbc:local").with_username("admin"),
    ));
    let resolver = CacheKeyResolver::new(Arc::new(bench_mounts(16))).with_tenant(TenantId(0));

    c.bench_function("cache_key/unmounted", |b| {
        b.iter(|| black_box(resolver.resolve(&backend, black_box("/_system/local/config/a"))));
    });

    c.bench_function("cache_key/last_mount", |b| {
        b.iter(|| black_box(resolver.resolve(&backend, black_box("/_system/mount15/a/b"))));
    });
}

fn bench_ghost_lookup(c: &mut Criterion) {
    let backend = BackendDescriptor::embedded(None);
    let resolver = CacheKeyResolver::new(Arc::new(MountTable::new())).with_tenant(TenantId(0));
    let cache: GhostCache<Resource> = GhostCache::default();
    for i in 0..1_000 {
        let path = format!("/r/{}", i);
        cache.insert(resolver.resolve(&backend, &path), Resource::new(path));
    }
    let key = resolver.resolve(&backend, "/r/500");

    c.bench_function("ghost_cache/hit", |b| {
        b.iter(|| {
            let ghost = cache.get(black_box(&key)).expect("cached");
            black_box(ghost.get());
        });
    });
}

criterion_group!(benches, bench_key_resolution, bench_ghost_lookup);
criterion_main!(benches);
