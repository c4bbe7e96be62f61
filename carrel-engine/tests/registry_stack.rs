//! Full stacks assembled from configuration: chroot, tags, links,
//! eventing URLs and mount-aware cache keys.

use std::sync::Arc;

use carrel_core::{CurrentSession, RegistryConfig, Resource, TenantId};
use carrel_engine::{ChrootRegistry, EmbeddedRegistry, Registry, RegistryBuilder};
use carrel_storage::{CacheKey, StorageEngine};
use carrel_test_utils::assertions::{
    assert_denied, assert_invalid_input, assert_not_found, assert_server_content,
};
use carrel_test_utils::fixtures::{minimal_config, text_resource};
use carrel_test_utils::{CountingAuthorizer, RecordingStorage};

const STACK_YAML: &str = r#"
databases:
  - name: db1
    url: "jdbc:db1"
    username: "user@carbon.super"
  - name: shared
    url: "jdbc:shared"
    username: "reader"
default_database: db1
remote_instances:
  - id: partitioned
    cache_id: "partition-7"
  - id: governance
    db_config: shared
mounts:
  - path: /_system/config
    target_path: /_system/nodes
    instance_id: partitioned
  - path: /_system/governance
    target_path: /_system/governance
    instance_id: governance
eventing:
  default_url: "http://events/default"
  patterns:
    - pattern: "/hot(/.*)?"
      url: "http://events/hot"
    - pattern: "/hot/.*"
      url: "http://events/shadowed"
"#;

#[test]
fn test_chrooted_paths_land_under_base() {
    let storage = Arc::new(RecordingStorage::new());
    let embedded: Arc<dyn Registry> = Arc::new(EmbeddedRegistry::new(storage.clone()));
    let chrooted = ChrootRegistry::new(embedded, "/basePrefix");

    chrooted.put("/testResource", &text_resource("/testResource", "t")).unwrap();
    assert!(storage.inner().exists("/basePrefix/testResource").unwrap());
    assert!(!storage.inner().exists("/testResource").unwrap());

    let fetched = chrooted.get("/testResource").unwrap();
    assert_eq!(fetched.path, "/testResource");
    assert_eq!(
        chrooted.get("/").unwrap().children().unwrap(),
        &["/testResource".to_string()][..]
    );
}

#[test]
fn test_chroot_from_config_is_cached_by_absolute_path() {
    let mut config = minimal_config();
    config.chroot = Some("/basePrefix".to_string());
    let stack = RegistryBuilder::new(config)
        .with_bound_tenant(TenantId(3))
        .build()
        .unwrap();

    stack.registry.put("/doc", &Resource::new("/doc")).unwrap();
    stack.registry.get("/doc").unwrap();
    let cache = stack.cache.as_ref().unwrap();
    assert!(cache
        .cache()
        .contains(&CacheKey::new("user@jdbc:db1", TenantId(3), "/basePrefix/doc")));
    assert!(stack.embedded.resource_exists("/basePrefix/doc").unwrap());
}

#[test]
fn test_tag_parsing_and_rejection() {
    let stack = RegistryBuilder::new(minimal_config()).build().unwrap();
    let _session = CurrentSession::enter("tagger", TenantId(0));
    stack.registry.put("/t", &Resource::new("/t")).unwrap();

    assert_invalid_input(&stack.registry.apply_tag("/t", "ok, bad;tag"));
    assert!(stack.registry.get_tags("/t").unwrap().is_empty());

    stack.registry.apply_tag("/t", " blue , red,blue ,, ").unwrap();
    let names: Vec<String> = stack
        .registry
        .get_tags("/t")
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["blue", "red"]);
    assert_eq!(stack.registry.get_resource_paths_with_tag("red").unwrap().len(), 1);
}

#[test]
fn test_remove_unknown_link_is_server_content() {
    let stack = RegistryBuilder::new(minimal_config()).build().unwrap();
    stack.registry.put("/real/doc", &text_resource("/real/doc", "d")).unwrap();
    stack.registry.create_link("/alias", "/real").unwrap();

    assert_server_content(&stack.registry.remove_link("/not-a-link"));
    // The existing link survives the failed removal
    assert!(stack.registry.get("/alias/doc").unwrap().is_link());

    stack.registry.remove_link("/alias").unwrap();
    assert_not_found(&stack.registry.get("/alias/doc"));
}

#[test]
fn test_links_are_restored_by_a_new_stack() {
    let storage: Arc<dyn StorageEngine> = Arc::new(RecordingStorage::new());
    {
        let first = RegistryBuilder::new(minimal_config())
            .with_storage(Arc::clone(&storage))
            .build()
            .unwrap();
        first.registry.put("/real/doc", &text_resource("/real/doc", "d")).unwrap();
        first.registry.create_link("/alias", "/real").unwrap();
    }
    let second = RegistryBuilder::new(minimal_config())
        .with_storage(storage)
        .build()
        .unwrap();
    assert_eq!(second.embedded.link_paths(), vec!["/alias"]);
    assert_eq!(second.registry.get("/alias/doc").unwrap().bytes(), Some(&b"d"[..]));
}

#[test]
fn test_eventing_urls_from_config() {
    let config = RegistryConfig::from_yaml_str(STACK_YAML).unwrap();
    let stack = RegistryBuilder::new(config).build().unwrap();
    let url = |path: Option<&str>| stack.registry.get_eventing_service_url(path).unwrap();

    assert_eq!(url(Some("/hot/a")).as_deref(), Some("http://events/hot"));
    assert_eq!(url(Some("/hot")).as_deref(), Some("http://events/hot"));
    assert_eq!(url(Some("/cold")).as_deref(), Some("http://events/default"));
    assert_eq!(url(None).as_deref(), Some("http://events/default"));

    stack
        .registry
        .set_eventing_service_url(Some("/hot(/.*)?"), None)
        .unwrap();
    assert_eq!(url(Some("/hot/a")).as_deref(), Some("http://events/shadowed"));
}

#[test]
fn test_mounted_paths_use_mount_connection() {
    let config = RegistryConfig::from_yaml_str(STACK_YAML).unwrap();
    let stack = RegistryBuilder::new(config).build().unwrap();
    let cache = stack.cache.as_ref().unwrap();
    let _session = CurrentSession::enter("admin", TenantId(5));

    assert_eq!(
        cache.cache_key("/_system/config/node1"),
        CacheKey::new("partition-7", TenantId(5), "/_system/nodes/node1")
    );
    assert_eq!(
        cache.cache_key("/_system/governance/svc"),
        CacheKey::new("reader@jdbc:shared", TenantId(5), "/_system/governance/svc")
    );
    assert_eq!(
        cache.cache_key("/local"),
        CacheKey::new("user@jdbc:db1", TenantId(5), "/local")
    );
}

#[test]
fn test_denied_caller_is_refused_on_a_cold_read() {
    let authorizer = Arc::new(CountingAuthorizer::default());
    let stack = RegistryBuilder::new(minimal_config())
        .with_authorizer(authorizer.clone())
        .build()
        .unwrap();
    stack.registry.put("/secret", &text_resource("/secret", "s")).unwrap();

    authorizer.set_allow(false);
    let cache = stack.cache.as_ref().unwrap();
    assert!(cache.cache().is_empty());
    assert_denied(&stack.registry.get("/secret"));
    assert!(cache.cache().is_empty());
    assert_denied(&stack.registry.get_collection("/", 0, 10));

    authorizer.set_allow(true);
    assert_eq!(stack.registry.get("/secret").unwrap().bytes(), Some(&b"s"[..]));
    authorizer.set_allow(false);
    // Now cached, refused on the hit path
    assert_denied(&stack.registry.get("/secret"));
}

#[test]
fn test_denied_prefix_blocks_writes() {
    let authorizer = Arc::new(CountingAuthorizer::default());
    authorizer.deny_prefix("/locked");
    let stack = RegistryBuilder::new(minimal_config())
        .with_authorizer(authorizer)
        .build()
        .unwrap();
    assert_denied(&stack.registry.put("/locked/doc", &Resource::new("/locked/doc")));
    stack.registry.put("/open", &Resource::new("/open")).unwrap();
    assert!(stack.registry.resource_exists("/open").unwrap());
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = minimal_config();
    config.default_database = Some("missing".to_string());
    assert!(RegistryBuilder::new(config).build().is_err());

    let mut config = minimal_config();
    config.no_cache_paths = vec!["(".to_string()];
    assert!(RegistryBuilder::new(config).build().is_err());
}
