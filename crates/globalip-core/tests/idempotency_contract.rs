//! Contract Test: Creation & Idempotency
//!
//! Constraints verified:
//! - A binding with no recorded state is created once, routed to the
//!   resolved target, and persisted with id and address
//! - Re-applying an unchanged binding issues no remote mutation
//! - Persisted state survives a restart (file store) without re-creating
//!
//! If this test fails, repeated applies leak or churn global IPs.

mod common;

use common::*;
use globalip_core::traits::StateStore;
use globalip_core::{
    AddressFamily, BindingSpec, CancelToken, FileStateStore, MemoryStateStore, ReconcileEvent,
    ReconcileOutcome, Reconciler, RouteTarget,
};

fn vm1_binding() -> BindingSpec {
    BindingSpec::new(
        "test-global-ip",
        RouteTarget::reference("vm1", "ipv4_address"),
    )
}

#[tokio::test]
async fn absent_binding_is_created_and_recorded() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (reconciler, mut events) = reconciler(&service, &store, 3);

    let state = converged("vm1", "ipv4_address", "10.0.0.5");
    let outcome = reconciler
        .reconcile(&vm1_binding(), &state, &CancelToken::never())
        .await
        .expect("create succeeds");

    let ReconcileOutcome::Created(binding) = outcome else {
        panic!("expected Created, got {:?}", outcome);
    };
    assert!(!binding.id.is_empty());
    assert_eq!(binding.family(), AddressFamily::V4);
    assert_eq!(binding.routes_to.as_str(), "10.0.0.5");
    assert!(binding.is_consistent());

    // Nothing to refresh before the first create
    assert_eq!(service.calls(), vec!["create:ipv4".to_string()]);

    let stored = store.get_binding("test-global-ip").await.unwrap();
    assert_eq!(stored, Some(binding.clone()));

    let remote = service.object(&binding.id).expect("remote object exists");
    assert_eq!(remote.destination.unwrap().as_str(), "10.0.0.5");

    assert!(matches!(
        drain_events(&mut events).as_slice(),
        [ReconcileEvent::Created { name, .. }] if name == "test-global-ip"
    ));
}

#[tokio::test]
async fn second_apply_issues_no_mutation() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (reconciler, mut events) = reconciler(&service, &store, 3);
    let state = converged("vm1", "ipv4_address", "10.0.0.5");

    let first = reconciler
        .reconcile(&vm1_binding(), &state, &CancelToken::never())
        .await
        .unwrap();
    let mutations_after_first = service.mutation_count();

    let second = reconciler
        .reconcile(&vm1_binding(), &state, &CancelToken::never())
        .await
        .unwrap();

    assert!(matches!(second, ReconcileOutcome::Unchanged(_)));
    assert!(!second.is_mutation());
    assert_eq!(second.binding(), first.binding());
    assert_eq!(
        service.mutation_count(),
        mutations_after_first,
        "an unchanged binding must not be mutated remotely"
    );
    // Only the read-back
    assert_eq!(service.get_count(), 1);

    let events = drain_events(&mut events);
    assert!(matches!(events.last(), Some(ReconcileEvent::Unchanged { .. })));
}

#[tokio::test]
async fn unchanged_when_service_does_not_report_routes() {
    let service = FakeGlobalIpService::new();
    service.hide_destination();
    let store = MemoryStateStore::new();
    let (reconciler, _events) = reconciler(&service, &store, 3);
    let state = converged("vm1", "ipv4_address", "10.0.0.5");

    reconciler
        .reconcile(&vm1_binding(), &state, &CancelToken::never())
        .await
        .unwrap();
    let outcome = reconciler
        .reconcile(&vm1_binding(), &state, &CancelToken::never())
        .await
        .unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Unchanged(_)));
    assert_eq!(service.mutation_count(), 1);
}

#[tokio::test]
async fn restart_with_file_store_does_not_recreate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let service = FakeGlobalIpService::new();
    let state = converged("vm1", "ipv4_address", "10.0.0.5");

    let created = {
        let store = FileStateStore::new(&path).await.unwrap();
        let (reconciler, _events) = Reconciler::new(
            Box::new(service.clone()),
            Box::new(store),
            fast_engine_config(3),
        )
        .unwrap();
        reconciler
            .reconcile(&vm1_binding(), &state, &CancelToken::never())
            .await
            .unwrap()
    };

    // "Restart": fresh store instance over the same file
    let store = FileStateStore::new(&path).await.unwrap();
    let (reconciler, _events) = Reconciler::new(
        Box::new(service.clone()),
        Box::new(store),
        fast_engine_config(3),
    )
    .unwrap();
    let outcome = reconciler
        .reconcile(&vm1_binding(), &state, &CancelToken::never())
        .await
        .unwrap();

    assert!(matches!(outcome, ReconcileOutcome::Unchanged(_)));
    assert_eq!(outcome.binding(), created.binding());
    assert_eq!(service.create_count(), 1);
    assert_eq!(service.object_count(), 1);
}

#[tokio::test]
async fn destroy_releases_and_forgets() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (reconciler, _events) = reconciler(&service, &store, 3);
    let state = converged("vm1", "ipv4_address", "10.0.0.5");

    let created = reconciler
        .reconcile(&vm1_binding(), &state, &CancelToken::never())
        .await
        .unwrap();
    let id = created.binding().unwrap().id.clone();

    let outcome = reconciler
        .destroy("test-global-ip", &CancelToken::never())
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::Deleted { id: id.clone() });
    assert!(service.object(&id).is_none());
    assert!(store.get_binding("test-global-ip").await.unwrap().is_none());

    // Destroying an absent binding is a no-op
    let again = reconciler
        .destroy("test-global-ip", &CancelToken::never())
        .await
        .unwrap();
    assert_eq!(again, ReconcileOutcome::Absent);
    assert_eq!(service.delete_count(), 1);
}
