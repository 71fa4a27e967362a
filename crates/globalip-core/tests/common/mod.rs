//! Test doubles and common utilities for reconciliation contract tests
//!
//! `FakeGlobalIpService` behaves like a remote global IP API held in memory:
//! it allocates ids and addresses, remembers routes, and counts every call
//! (including failed attempts). Clones share state and counters so a test
//! can keep a handle after boxing one into the reconciler.

#![allow(dead_code)]

use globalip_core::traits::{GlobalIpService, StaticTargetSource, TargetSource};
use globalip_core::{
    Address, AddressFamily, CancelHandle, ConvergedState, EngineConfig, Error, MemoryStateStore,
    Orchestrator, ReconcileEvent, Reconciler, RemoteGlobalIp, Result, TargetSpec,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Default)]
struct Counters {
    get: AtomicUsize,
    create: AtomicUsize,
    set_route: AtomicUsize,
    delete: AtomicUsize,
}

#[derive(Default)]
struct FakeState {
    objects: HashMap<String, RemoteGlobalIp>,
    next_id: u64,
    transient_failures: usize,
    rejection: Option<String>,
    cancel_on_create: Option<CancelHandle>,
    hide_destination: bool,
    vanish_on_route: bool,
    calls: Vec<String>,
}

/// In-memory remote global IP service
#[derive(Clone, Default)]
pub struct FakeGlobalIpService {
    state: Arc<Mutex<FakeState>>,
    counters: Arc<Counters>,
}

impl FakeGlobalIpService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls with a transient transport error
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().transient_failures = n;
    }

    /// Reject every mutation with `message`
    pub fn reject_mutations(&self, message: &str) {
        self.state.lock().unwrap().rejection = Some(message.to_string());
    }

    /// Cancel `handle` while a create is in flight
    pub fn cancel_on_create(&self, handle: CancelHandle) {
        self.state.lock().unwrap().cancel_on_create = Some(handle);
    }

    /// Report no destination on reads, like a service that does not expose routes
    pub fn hide_destination(&self) {
        self.state.lock().unwrap().hide_destination = true;
    }

    /// Delete the object between the reconciler's read and its re-route
    pub fn vanish_on_route(&self) {
        self.state.lock().unwrap().vanish_on_route = true;
    }

    /// Delete an object behind the reconciler's back
    pub fn remove_out_of_band(&self, id: &str) {
        self.state.lock().unwrap().objects.remove(id);
    }

    /// Re-route an object behind the reconciler's back
    pub fn reroute_out_of_band(&self, id: &str, target: &str) {
        if let Some(object) = self.state.lock().unwrap().objects.get_mut(id) {
            object.destination = Some(Address::parse(target).unwrap());
        }
    }

    /// Re-number an object behind the reconciler's back
    pub fn readdress_out_of_band(&self, id: &str, ip: &str) {
        if let Some(object) = self.state.lock().unwrap().objects.get_mut(id) {
            object.ip_address = Address::parse(ip).unwrap();
        }
    }

    /// Seed an existing object
    pub fn insert(&self, id: &str, ip: &str, destination: &str) {
        self.state.lock().unwrap().objects.insert(
            id.to_string(),
            RemoteGlobalIp {
                id: id.to_string(),
                ip_address: Address::parse(ip).unwrap(),
                destination: Some(Address::parse(destination).unwrap()),
            },
        );
    }

    pub fn object(&self, id: &str) -> Option<RemoteGlobalIp> {
        self.state.lock().unwrap().objects.get(id).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// Remote call names in order, e.g. `["get:1", "delete:1", "create:v6"]`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn get_count(&self) -> usize {
        self.counters.get.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.counters.create.load(Ordering::SeqCst)
    }

    pub fn set_route_count(&self) -> usize {
        self.counters.set_route.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.counters.delete.load(Ordering::SeqCst)
    }

    /// Create + set_route + delete attempts
    pub fn mutation_count(&self) -> usize {
        self.create_count() + self.set_route_count() + self.delete_count()
    }

    /// Every remote call, reads included
    pub fn total_calls(&self) -> usize {
        self.get_count() + self.mutation_count()
    }

    /// Common entry bookkeeping: record the call and inject failures
    fn enter(&self, counter: &AtomicUsize, call: String, mutation: bool) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);

        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(Error::transient("connection reset by peer"));
        }
        if mutation {
            if let Some(message) = &state.rejection {
                return Err(Error::rejected("fake", message.clone()));
            }
        }
        Ok(())
    }

    fn allocate(state: &mut FakeState, family: AddressFamily) -> (String, Address) {
        state.next_id += 1;
        let n = state.next_id;
        let ip = match family {
            AddressFamily::V4 => format!("159.8.0.{}", n),
            AddressFamily::V6 => format!("2001:0db8:0000:0000:0000:0000:0000:{:04x}", n),
        };
        (format!("{}", 1000 + n), Address::parse(&ip).unwrap())
    }
}

#[async_trait::async_trait]
impl GlobalIpService for FakeGlobalIpService {
    async fn get_global_ip(&self, id: &str) -> Result<RemoteGlobalIp> {
        self.enter(&self.counters.get, format!("get:{id}"), false)?;
        let state = self.state.lock().unwrap();
        let mut object = state
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("global ip {id}")))?;
        if state.hide_destination {
            object.destination = None;
        }
        Ok(object)
    }

    async fn create_global_ip(
        &self,
        family: AddressFamily,
        initial_route: &Address,
    ) -> Result<RemoteGlobalIp> {
        self.enter(&self.counters.create, format!("create:{family}"), true)?;
        let mut state = self.state.lock().unwrap();

        if initial_route.family() != family {
            return Err(Error::rejected(
                "fake",
                format!("cannot route {family} global IP to {initial_route}"),
            ));
        }

        let (id, ip_address) = Self::allocate(&mut state, family);
        let object = RemoteGlobalIp {
            id: id.clone(),
            ip_address,
            destination: Some(initial_route.clone()),
        };
        state.objects.insert(id, object.clone());

        if let Some(handle) = state.cancel_on_create.take() {
            handle.cancel();
        }
        Ok(object)
    }

    async fn set_route(&self, id: &str, target: &Address) -> Result<()> {
        self.enter(&self.counters.set_route, format!("set_route:{id}"), true)?;
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.vanish_on_route) {
            state.objects.remove(id);
        }
        let object = state
            .objects
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("global ip {id}")))?;

        if object.ip_address.family() != target.family() {
            return Err(Error::rejected(
                "fake",
                format!("cannot route {} to {}", object.ip_address, target),
            ));
        }
        object.destination = Some(target.clone());
        Ok(())
    }

    async fn delete_global_ip(&self, id: &str) -> Result<()> {
        self.enter(&self.counters.delete, format!("delete:{id}"), true)?;
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("global ip {id}")))
    }

    fn service_name(&self) -> &'static str {
        "fake"
    }
}

/// Target source that fails for selected targets and counts convergences
#[derive(Clone, Default)]
pub struct FlakyTargetSource {
    failing: Arc<Mutex<HashSet<String>>>,
    converged: Arc<AtomicUsize>,
}

impl FlakyTargetSource {
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing: Arc::new(Mutex::new(ids.iter().map(|s| s.to_string()).collect())),
            converged: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn converge_count(&self) -> usize {
        self.converged.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TargetSource for FlakyTargetSource {
    async fn converge(&self, target: &TargetSpec) -> Result<HashMap<String, String>> {
        self.converged.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(&target.id) {
            return Err(Error::Other(format!("instance {} failed to boot", target.id)));
        }
        StaticTargetSource.converge(target).await
    }

    fn source_name(&self) -> &'static str {
        "flaky"
    }
}

/// Engine settings with millisecond backoff so retry tests stay fast
pub fn fast_engine_config(max_retries: usize) -> EngineConfig {
    EngineConfig {
        max_retries,
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 4,
        ..EngineConfig::default()
    }
}

/// Reconciler over a fake service and a shared memory store
pub fn reconciler(
    service: &FakeGlobalIpService,
    store: &MemoryStateStore,
    max_retries: usize,
) -> (Reconciler, mpsc::Receiver<ReconcileEvent>) {
    Reconciler::new(
        Box::new(service.clone()),
        Box::new(store.clone()),
        fast_engine_config(max_retries),
    )
    .expect("reconciler construction succeeds")
}

/// Orchestrator with static targets
pub fn orchestrator(
    service: &FakeGlobalIpService,
    store: &MemoryStateStore,
) -> (Orchestrator, mpsc::Receiver<ReconcileEvent>) {
    orchestrator_with_targets(service, store, Box::new(StaticTargetSource))
}

pub fn orchestrator_with_targets(
    service: &FakeGlobalIpService,
    store: &MemoryStateStore,
    targets: Box<dyn TargetSource>,
) -> (Orchestrator, mpsc::Receiver<ReconcileEvent>) {
    let (reconciler, events) = reconciler(service, store, 3);
    (Orchestrator::new(reconciler, targets), events)
}

/// A converged state where `resource` produced a single attribute
pub fn converged(resource: &str, attribute: &str, value: &str) -> ConvergedState {
    let mut state = ConvergedState::new();
    state.record(
        resource,
        HashMap::from([(attribute.to_string(), value.to_string())]),
    );
    state
}

/// A target resource with an `ipv4_address` and optional `ipv6_address`
pub fn vm(id: &str, ipv4: &str, ipv6: Option<&str>) -> TargetSpec {
    let target = TargetSpec::new(id).with_attribute("ipv4_address", ipv4);
    match ipv6 {
        Some(v6) => target.with_attribute("ipv6_address", v6),
        None => target,
    }
}

/// Everything currently queued on the event channel
pub fn drain_events(events: &mut mpsc::Receiver<ReconcileEvent>) -> Vec<ReconcileEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
