//! Contract Test: Reconciler-Owned Retries and Cancellation
//!
//! Constraints verified:
//! - Transient transport failures are retried up to `max_retries`
//! - Definitive rejections are never retried and surface verbatim
//! - Retries can be disabled with `max_retries = 0`
//! - A failed mutation leaves persisted state untouched
//! - Cancellation stops the cycle between steps, after recording whatever
//!   the last remote call produced
//!
//! If this test fails, retries moved into the service layer, hide
//! rejections, or cancellation loses track of allocated global IPs.

mod common;

use common::*;
use globalip_core::traits::StateStore;
use globalip_core::{
    Address, BindingSpec, CancelToken, Error, GlobalIpBinding, MemoryStateStore, Plan,
    ReconcileEvent, ReconcileOutcome, RouteTarget, cancel_pair,
};
use tokio_test::{assert_err, assert_ok};

fn literal_binding() -> BindingSpec {
    BindingSpec::new("gip", RouteTarget::literal("10.0.0.5"))
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (reconciler, _events) = reconciler(&service, &store, 3);
    service.fail_next(2);

    let outcome = assert_ok!(
        reconciler
            .reconcile(&literal_binding(), &Default::default(), &CancelToken::never())
            .await
    );

    assert!(matches!(outcome, ReconcileOutcome::Created(_)));
    assert_eq!(service.create_count(), 3);
    assert_eq!(service.object_count(), 1);
}

#[tokio::test]
async fn exhausted_retries_leave_state_untouched() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (reconciler, mut events) = reconciler(&service, &store, 2);
    service.fail_next(10);

    let err = assert_err!(
        reconciler
            .reconcile(&literal_binding(), &Default::default(), &CancelToken::never())
            .await
    );

    assert!(matches!(err, Error::TransientTransport(_)), "{err}");
    assert_eq!(service.create_count(), 3, "one attempt plus two retries");
    assert!(store.is_empty().await);
    assert!(matches!(
        drain_events(&mut events).as_slice(),
        [ReconcileEvent::Failed { name, .. }] if name == "gip"
    ));
}

#[tokio::test]
async fn rejection_is_not_retried() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (reconciler, mut events) = reconciler(&service, &store, 5);
    service.reject_mutations("Global IP quota exceeded for account 12345");

    let err = assert_err!(
        reconciler
            .reconcile(&literal_binding(), &Default::default(), &CancelToken::never())
            .await
    );

    match &err {
        Error::RemoteRejection { service, message } => {
            assert_eq!(service, "fake");
            assert_eq!(message, "Global IP quota exceeded for account 12345");
        }
        other => panic!("expected RemoteRejection, got {other:?}"),
    }
    assert_eq!(service.create_count(), 1);
    assert!(store.is_empty().await);

    let events = drain_events(&mut events);
    assert!(matches!(
        events.as_slice(),
        [ReconcileEvent::Failed { error, .. }] if error.contains("quota exceeded")
    ));
}

#[tokio::test]
async fn failed_reroute_keeps_previous_route() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (reconciler, _events) = reconciler(&service, &store, 3);

    assert_ok!(
        reconciler
            .reconcile(&literal_binding(), &Default::default(), &CancelToken::never())
            .await
    );
    service.reject_mutations("destination is not provisioned");

    let moved = BindingSpec::new("gip", RouteTarget::literal("10.0.0.9"));
    assert_err!(
        reconciler
            .reconcile(&moved, &Default::default(), &CancelToken::never())
            .await
    );

    let stored = store.get_binding("gip").await.unwrap().unwrap();
    assert_eq!(stored.routes_to.as_str(), "10.0.0.5");
}

#[tokio::test]
async fn zero_retries_means_single_attempt() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (reconciler, _events) = reconciler(&service, &store, 0);
    service.fail_next(1);

    let err = assert_err!(
        reconciler
            .reconcile(&literal_binding(), &Default::default(), &CancelToken::never())
            .await
    );

    assert!(err.is_transient());
    assert_eq!(service.total_calls(), 1);
}

#[tokio::test]
async fn refresh_reads_are_retried_too() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (reconciler, _events) = reconciler(&service, &store, 3);

    assert_ok!(
        reconciler
            .reconcile(&literal_binding(), &Default::default(), &CancelToken::never())
            .await
    );
    service.fail_next(1);

    let outcome = assert_ok!(
        reconciler
            .reconcile(&literal_binding(), &Default::default(), &CancelToken::never())
            .await
    );

    assert!(matches!(outcome, ReconcileOutcome::Unchanged(_)));
    assert_eq!(service.get_count(), 2);
}

#[tokio::test]
async fn cancelled_token_makes_no_remote_call() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();
    let (orchestrator, mut events) = orchestrator(&service, &store);
    let (handle, token) = cancel_pair();
    handle.cancel();

    let plan = Plan::new().with_binding(literal_binding());
    let report = assert_ok!(orchestrator.apply(&plan, &token).await);

    assert!(report.cancelled);
    assert!(!report.is_success());
    assert_eq!(service.total_calls(), 0);
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn cancellation_records_allocation_before_stopping() {
    let service = FakeGlobalIpService::new();
    let store = MemoryStateStore::new();

    // Recorded earlier, no longer planned; must survive a cancelled cycle
    service.insert("900", "159.8.200.1", "10.0.0.1");
    store
        .set_binding(
            "retired",
            &GlobalIpBinding::new(
                "900",
                Address::parse("159.8.200.1").unwrap(),
                Address::parse("10.0.0.1").unwrap(),
            ),
        )
        .await
        .unwrap();

    let (orchestrator, _events) = orchestrator(&service, &store);
    let (handle, token) = cancel_pair();
    service.cancel_on_create(handle);

    let plan = Plan::new()
        .with_target(vm("vm1", "10.0.0.5", None))
        .with_binding(BindingSpec::new(
            "front",
            RouteTarget::reference("vm1", "ipv4_address"),
        ))
        .with_binding(BindingSpec::new(
            "chained",
            RouteTarget::reference("front", "ip_address"),
        ));

    let report = assert_ok!(orchestrator.apply(&plan, &token).await);

    assert!(report.cancelled);
    let front = report.binding("front").expect("front was created").clone();
    assert_eq!(store.get_binding("front").await.unwrap(), Some(front));
    assert!(report.outcome("chained").is_none());
    assert!(store.get_binding("chained").await.unwrap().is_none());
    assert!(store.get_binding("retired").await.unwrap().is_some());
    assert_eq!(service.create_count(), 1);
    assert_eq!(service.delete_count(), 0);
}
