//! Handler pipeline and transactional envelope, observed through the
//! storage calls an embedded registry makes.

use std::sync::{Arc, Mutex};

use carrel_core::{RegistryError, RegistryResult, Resource};
use carrel_engine::{
    EmbeddedRegistry, LifecycleAspect, MatchAll, Operation, Phase, Registry, RequestContext,
    UrlMatcher,
};
use carrel_storage::StorageEngine;
use carrel_test_utils::assertions::{assert_archived_version, assert_server_content};
use carrel_test_utils::fixtures::text_resource;
use carrel_test_utils::RecordingStorage;

fn registry() -> (Arc<RecordingStorage>, EmbeddedRegistry) {
    let storage = Arc::new(RecordingStorage::new());
    let registry = EmbeddedRegistry::new(storage.clone());
    (storage, registry)
}

fn failing(ctx: &mut RequestContext, _storage: &dyn StorageEngine) -> RegistryResult<()> {
    Err(RegistryError::server_content(format!("refusing {}", ctx.path)))
}

#[test]
fn test_successful_operation_commits_once() {
    let (storage, registry) = registry();
    registry.put("/ok", &text_resource("/ok", "v")).unwrap();
    assert_eq!(storage.begins(), 1);
    assert_eq!(storage.commits(), 1);
    assert_eq!(storage.rollbacks(), 0);
}

#[test]
fn test_execute_failure_rolls_back_once() {
    let (storage, registry) = registry();
    let rolled_back = Arc::new(Mutex::new(Vec::new()));
    {
        let rolled_back = Arc::clone(&rolled_back);
        registry.handler_manager().add_handler(
            Phase::Rollback,
            &[],
            Arc::new(MatchAll),
            Arc::new(move |ctx: &mut RequestContext, _s: &dyn StorageEngine| -> RegistryResult<()> {
                rolled_back.lock().unwrap().push(ctx.path.clone());
                Ok(())
            }),
        );
    }
    registry.handler_manager().add_handler(
        Phase::Execute,
        &[Operation::Put],
        Arc::new(UrlMatcher::prefix("/guarded").unwrap()),
        Arc::new(failing),
    );

    assert_server_content(&registry.put("/guarded/x", &Resource::new("/guarded/x")));
    assert_eq!(storage.begins(), 1);
    assert_eq!(storage.commits(), 0);
    assert_eq!(storage.rollbacks(), 1);
    assert_eq!(storage.calls("put"), 0);
    assert_eq!(*rolled_back.lock().unwrap(), vec!["/guarded/x".to_string()]);
    assert!(!registry.resource_exists("/guarded/x").unwrap());

    storage.reset();
    registry.put("/open", &Resource::new("/open")).unwrap();
    assert_eq!((storage.commits(), storage.rollbacks()), (1, 0));
}

#[test]
fn test_commit_handler_failure_rolls_back() {
    let (storage, registry) = registry();
    registry.handler_manager().add_handler(
        Phase::Commit,
        &[Operation::Delete],
        Arc::new(MatchAll),
        Arc::new(failing),
    );
    registry.put("/kept", &Resource::new("/kept")).unwrap();
    storage.reset();

    assert_server_content(&registry.delete("/kept"));
    assert_eq!((storage.commits(), storage.rollbacks()), (0, 1));
    assert!(registry.resource_exists("/kept").unwrap());
}

#[test]
fn test_archived_versions_reject_community_writes_before_storage() {
    let (storage, registry) = registry();
    registry
        .add_aspect(Arc::new(LifecycleAspect::new("review", ["draft", "final"]).unwrap()))
        .unwrap();
    registry.put("/doc", &text_resource("/doc", "one")).unwrap();
    registry.create_version("/doc").unwrap();
    storage.reset();

    let archived = "/doc;version:1";
    assert_archived_version(&registry.apply_tag(archived, "t"));
    assert_archived_version(&registry.add_comment(archived, "c"));
    assert_archived_version(&registry.rate_resource(archived, 4));
    assert_archived_version(&registry.associate_aspect(archived, "review"));

    assert_eq!(storage.mutations(), 0);
    assert_eq!(storage.commits(), 0);
    assert_eq!(storage.rollbacks(), 4);
}

#[test]
fn test_simulation_persists_nothing() {
    let (storage, registry) = registry();
    registry.handler_manager().add_handler(
        Phase::Execute,
        &[],
        Arc::new(MatchAll),
        Arc::new(|ctx: &mut RequestContext, _s: &dyn StorageEngine| -> RegistryResult<()> {
            ctx.set_simulation(true);
            Ok(())
        }),
    );

    registry.put("/sim", &text_resource("/sim", "x")).unwrap();
    registry.apply_tag("/sim", "t").unwrap();
    assert_eq!(storage.mutations(), 0);
    assert_eq!(storage.commits(), 0);
    assert_eq!(storage.rollbacks(), 2);
    assert!(!storage.inner().exists("/sim").unwrap());
}

#[test]
fn test_handlers_run_in_order_after_processing_complete() {
    let (storage, registry) = registry();
    let order = Arc::new(Mutex::new(Vec::new()));
    for label in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        registry.handler_manager().add_handler(
            Phase::Execute,
            &[Operation::Put],
            Arc::new(MatchAll),
            Arc::new(move |ctx: &mut RequestContext, _s: &dyn StorageEngine| -> RegistryResult<()> {
                order.lock().unwrap().push(label);
                if label == "first" {
                    ctx.set_processing_complete(true);
                    ctx.set_output("/handled".to_string());
                }
                Ok(())
            }),
        );
    }

    let stored = registry.put("/p", &Resource::new("/p")).unwrap();
    assert_eq!(stored, "/handled");
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    // The default storage call was skipped
    assert_eq!(storage.calls("put"), 0);
    assert_eq!(storage.commits(), 1);
}
