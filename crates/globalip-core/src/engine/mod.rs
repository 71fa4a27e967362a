//! Global IP reconciler
//!
//! The Reconciler is responsible for:
//! - Resolving the binding's route target
//! - Refreshing persisted state against the remote service (drift)
//! - Deciding CREATE / NO-OP / UPDATE-ROUTE / RECREATE / DELETE
//! - Persisting state after every confirmed remote mutation
//!
//! ## State Machine
//!
//! ```text
//!                  create
//!   ┌────────┐ ───────────────► ┌────────┐ ──┐ set route
//!   │ ABSENT │                  │ BOUND  │ ◄─┘ (same family)
//!   └────────┘ ◄─────────────── └────────┘
//!       ▲          delete            │
//!       └────────────────────────────┘
//!         family change: delete, then create
//! ```
//!
//! ## Decision Flow
//!
//! 1. Resolve `routes_to` (fail fast, no remote call)
//! 2. Check the family pin
//! 3. Read persisted state and re-read the remote object
//! 4. Remote object gone → drift warning, treat as ABSENT
//! 5. Diff and issue at most one kind of mutation
//! 6. Persist the result

use crate::address::{Address, AddressFamily};
use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{BindingSpec, GlobalIpBinding, RemoteGlobalIp};
use crate::resolver::{self, ConvergedState};
use crate::traits::{GlobalIpService, StateStore};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// A new global IP was allocated and routed
    Created {
        name: String,
        id: String,
        ip_address: String,
        routes_to: String,
    },

    /// An existing global IP was re-routed
    RouteUpdated {
        name: String,
        id: String,
        previous_route: String,
        routes_to: String,
    },

    /// Nothing to do
    Unchanged { name: String, id: String },

    /// The address family changed, the global IP was replaced
    Recreated {
        name: String,
        previous_id: String,
        id: String,
        ip_address: String,
    },

    /// A global IP was released
    Deleted { name: String, id: String },

    /// Persisted and remote state disagreed
    DriftDetected {
        name: String,
        id: String,
        detail: String,
    },

    /// Reconciliation failed
    Failed { name: String, error: String },
}

/// Result of reconciling one binding
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// ABSENT → BOUND
    Created(GlobalIpBinding),

    /// BOUND → BOUND with a new route
    RouteUpdated {
        binding: GlobalIpBinding,
        previous_route: Address,
    },

    /// Already converged
    Unchanged(GlobalIpBinding),

    /// BOUND → ABSENT → BOUND because the family changed
    Recreated {
        binding: GlobalIpBinding,
        previous_id: String,
    },

    /// BOUND → ABSENT
    Deleted { id: String },

    /// Nothing was bound and nothing is desired
    Absent,
}

impl ReconcileOutcome {
    /// The binding after reconciliation, if bound
    pub fn binding(&self) -> Option<&GlobalIpBinding> {
        match self {
            ReconcileOutcome::Created(binding)
            | ReconcileOutcome::Unchanged(binding)
            | ReconcileOutcome::RouteUpdated { binding, .. }
            | ReconcileOutcome::Recreated { binding, .. } => Some(binding),
            ReconcileOutcome::Deleted { .. } | ReconcileOutcome::Absent => None,
        }
    }

    /// Whether any remote mutation was issued
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            ReconcileOutcome::Unchanged(_) | ReconcileOutcome::Absent
        )
    }
}

/// Normalized read of a remote object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// The object exists
    Present(RemoteGlobalIp),
    /// The object no longer exists
    Gone,
}

/// A bound binding after refreshing it against the remote service
struct Current {
    binding: GlobalIpBinding,
    /// Route the remote object actually has
    observed_route: Address,
}

/// Global IP reconciler
///
/// One `reconcile` call is a linear sequence of steps for one binding.
/// Distinct bindings can be reconciled concurrently through a shared
/// `&Reconciler`; they never touch each other's state.
///
/// ## Retry Policy
///
/// Retries are owned here, not by the service:
/// - [`Error::TransientTransport`] is retried up to `max_retries` times with
///   exponential backoff
/// - Every other error is surfaced after the first attempt
pub struct Reconciler {
    /// Remote global IP service
    service: Box<dyn GlobalIpService>,

    /// Persisted binding state
    store: Box<dyn StateStore>,

    /// Retry and channel settings
    config: EngineConfig,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ReconcileEvent>,

    /// Set once the event receiver has been dropped
    events_closed: AtomicBool,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver) where event_receiver yields reconcile events
    pub fn new(
        service: Box<dyn GlobalIpService>,
        store: Box<dyn StateStore>,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<ReconcileEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let reconciler = Self {
            service,
            store,
            config,
            event_tx: tx,
            events_closed: AtomicBool::new(false),
        };

        Ok((reconciler, rx))
    }

    /// The state store this reconciler persists into
    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Converge one binding towards its desired state
    ///
    /// # Errors
    ///
    /// - [`Error::UnresolvedDependency`]: the route target has not converged
    ///   yet in this cycle; no remote call was made
    /// - [`Error::AttributeTypeMismatch`]: the route target is not a usable
    ///   address, or contradicts the family pin; no remote call was made
    /// - [`Error::TransientTransport`]: retries exhausted
    /// - [`Error::RemoteRejection`]: the service refused the operation
    /// - [`Error::Cancelled`]: the cycle was cancelled between steps
    pub async fn reconcile(
        &self,
        spec: &BindingSpec,
        converged: &ConvergedState,
        cancel: &CancelToken,
    ) -> Result<ReconcileOutcome> {
        let result = self.reconcile_binding(spec, converged, cancel).await;
        if let Err(e) = &result {
            self.report_failure(&spec.name, e);
        }
        result
    }

    /// Release the binding's global IP and forget it
    pub async fn destroy(&self, name: &str, cancel: &CancelToken) -> Result<ReconcileOutcome> {
        let result = self.destroy_binding(name, cancel).await;
        if let Err(e) = &result {
            self.report_failure(name, e);
        }
        result
    }

    /// Read a remote object, mapping `NotFound` to [`Observed::Gone`]
    pub async fn observe(&self, id: &str) -> Result<Observed> {
        match self
            .with_retry("get", id, || self.service.get_global_ip(id))
            .await
        {
            Ok(remote) => Ok(Observed::Present(remote)),
            Err(e) if e.is_not_found() => Ok(Observed::Gone),
            Err(e) => Err(e),
        }
    }

    async fn reconcile_binding(
        &self,
        spec: &BindingSpec,
        converged: &ConvergedState,
        cancel: &CancelToken,
    ) -> Result<ReconcileOutcome> {
        cancel.check()?;

        let route = resolver::resolve(&spec.routes_to, converged)?;
        let family = route.family();

        if let Some(pinned) = spec.family {
            if pinned != family {
                return Err(Error::type_mismatch(
                    spec.routes_to.to_string(),
                    format!(
                        "resolves to {} address {} but binding {} is pinned to {}",
                        family, route, spec.name, pinned
                    ),
                ));
            }
        }

        let current = self.refresh(&spec.name).await?;
        cancel.check()?;

        match current {
            None => {
                let binding = self.create(&spec.name, family, &route).await?;
                Ok(ReconcileOutcome::Created(binding))
            }
            Some(current) if current.binding.family() != family => {
                self.recreate(&spec.name, current.binding, family, &route, cancel)
                    .await
            }
            Some(current) if current.observed_route == route => {
                debug!(
                    "Global IP {} already routes to {}, skipping update",
                    spec.name, route
                );
                self.emit_event(ReconcileEvent::Unchanged {
                    name: spec.name.clone(),
                    id: current.binding.id.clone(),
                });
                Ok(ReconcileOutcome::Unchanged(current.binding))
            }
            Some(current) => self.update_route(&spec.name, current, &route).await,
        }
    }

    /// Re-read the persisted binding from the remote service
    async fn refresh(&self, name: &str) -> Result<Option<Current>> {
        let Some(mut binding) = self.store.get_binding(name).await? else {
            return Ok(None);
        };

        let remote = match self.observe(&binding.id).await? {
            Observed::Present(remote) => remote,
            Observed::Gone => {
                warn!(
                    "Global IP {} (id {}) no longer exists remotely, recreating",
                    name, binding.id
                );
                self.emit_event(ReconcileEvent::DriftDetected {
                    name: name.to_string(),
                    id: binding.id.clone(),
                    detail: "remote object not found".to_string(),
                });
                self.store.delete_binding(name).await?;
                return Ok(None);
            }
        };

        if remote.ip_address != binding.ip_address {
            warn!(
                "Global IP {} (id {}) reports address {} but {} was recorded, adopting remote value",
                name, binding.id, remote.ip_address, binding.ip_address
            );
            self.emit_event(ReconcileEvent::DriftDetected {
                name: name.to_string(),
                id: binding.id.clone(),
                detail: format!("ip_address changed to {}", remote.ip_address),
            });
            binding.ip_address = remote.ip_address.clone();
            self.store.set_binding(name, &binding).await?;
        }

        let observed_route = match remote.destination {
            Some(destination) if destination != binding.routes_to => {
                warn!(
                    "Global IP {} (id {}) routes to {} but {} was recorded",
                    name, binding.id, destination, binding.routes_to
                );
                self.emit_event(ReconcileEvent::DriftDetected {
                    name: name.to_string(),
                    id: binding.id.clone(),
                    detail: format!("route changed to {}", destination),
                });
                destination
            }
            _ => binding.routes_to.clone(),
        };

        Ok(Some(Current {
            binding,
            observed_route,
        }))
    }

    /// ABSENT → BOUND
    async fn create(
        &self,
        name: &str,
        family: AddressFamily,
        route: &Address,
    ) -> Result<GlobalIpBinding> {
        info!("Creating {} global IP {} -> {}", family, name, route);

        let remote = self
            .with_retry("create", name, || {
                self.service.create_global_ip(family, route)
            })
            .await?;

        if remote.id.is_empty() {
            return Err(Error::rejected(
                self.service.service_name(),
                format!("create for {name} returned no id"),
            ));
        }

        // Recorded before anything else can interrupt the cycle
        let binding = GlobalIpBinding::new(remote.id, remote.ip_address, route.clone());
        self.store.set_binding(name, &binding).await?;

        info!(
            "Created global IP {} (id {}) {} -> {}",
            name, binding.id, binding.ip_address, binding.routes_to
        );
        self.emit_event(ReconcileEvent::Created {
            name: name.to_string(),
            id: binding.id.clone(),
            ip_address: binding.ip_address.to_string(),
            routes_to: binding.routes_to.to_string(),
        });

        Ok(binding)
    }

    /// BOUND → BOUND, only the route changes
    async fn update_route(
        &self,
        name: &str,
        current: Current,
        route: &Address,
    ) -> Result<ReconcileOutcome> {
        let id = current.binding.id.clone();
        info!(
            "Re-routing global IP {} (id {}) {} -> {}",
            name, id, current.observed_route, route
        );

        match self
            .with_retry("set_route", name, || self.service.set_route(&id, route))
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(
                    "Global IP {} (id {}) disappeared before re-routing, recreating",
                    name, id
                );
                self.emit_event(ReconcileEvent::DriftDetected {
                    name: name.to_string(),
                    id,
                    detail: "remote object not found".to_string(),
                });
                self.store.delete_binding(name).await?;
                let binding = self.create(name, route.family(), route).await?;
                return Ok(ReconcileOutcome::Created(binding));
            }
            Err(e) => return Err(e),
        }

        let binding = current.binding.rerouted(route.clone());
        self.store.set_binding(name, &binding).await?;

        self.emit_event(ReconcileEvent::RouteUpdated {
            name: name.to_string(),
            id: binding.id.clone(),
            previous_route: current.observed_route.to_string(),
            routes_to: binding.routes_to.to_string(),
        });

        Ok(ReconcileOutcome::RouteUpdated {
            binding,
            previous_route: current.observed_route,
        })
    }

    /// BOUND → ABSENT → BOUND
    async fn recreate(
        &self,
        name: &str,
        previous: GlobalIpBinding,
        family: AddressFamily,
        route: &Address,
        cancel: &CancelToken,
    ) -> Result<ReconcileOutcome> {
        info!(
            "Global IP {} (id {}) is {} but route {} is {}, replacing it",
            name,
            previous.id,
            previous.family(),
            route,
            family
        );

        self.delete_remote(name, &previous.id).await?;
        self.store.delete_binding(name).await?;
        cancel.check()?;

        let binding = self.create(name, family, route).await?;

        self.emit_event(ReconcileEvent::Recreated {
            name: name.to_string(),
            previous_id: previous.id.clone(),
            id: binding.id.clone(),
            ip_address: binding.ip_address.to_string(),
        });

        Ok(ReconcileOutcome::Recreated {
            binding,
            previous_id: previous.id,
        })
    }

    async fn destroy_binding(&self, name: &str, cancel: &CancelToken) -> Result<ReconcileOutcome> {
        cancel.check()?;

        let Some(binding) = self.store.get_binding(name).await? else {
            debug!("Global IP {} is not bound, nothing to delete", name);
            return Ok(ReconcileOutcome::Absent);
        };

        info!("Deleting global IP {} (id {})", name, binding.id);
        self.delete_remote(name, &binding.id).await?;
        self.store.delete_binding(name).await?;

        self.emit_event(ReconcileEvent::Deleted {
            name: name.to_string(),
            id: binding.id.clone(),
        });

        Ok(ReconcileOutcome::Deleted { id: binding.id })
    }

    /// Delete a remote object; an already missing object counts as deleted
    async fn delete_remote(&self, name: &str, id: &str) -> Result<()> {
        match self
            .with_retry("delete", name, || self.service.delete_global_ip(id))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(
                    "Global IP {} (id {}) was already deleted remotely",
                    name, id
                );
                self.emit_event(ReconcileEvent::DriftDetected {
                    name: name.to_string(),
                    id: id.to_string(),
                    detail: "remote object not found".to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run a single remote call, retrying only transient transport failures
    async fn with_retry<T, F, Fut>(&self, operation: &str, subject: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        "{} {} attempt {} failed on {}: {}, retrying in {:?}",
                        self.service.service_name(),
                        operation,
                        attempt,
                        subject,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(
                        "{} {} failed on {} after {} attempt(s): {}",
                        self.service.service_name(),
                        operation,
                        subject,
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    fn report_failure(&self, name: &str, error: &Error) {
        if matches!(error, Error::Cancelled) {
            return;
        }
        self.emit_event(ReconcileEvent::Failed {
            name: name.to_string(),
            error: error.to_string(),
        });
    }

    /// Emit a reconcile event
    fn emit_event(&self, event: ReconcileEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Event channel full, dropping event. Consider increasing event_channel_capacity."
                );
            }
            Err(TrySendError::Closed(_)) => {
                if !self.events_closed.swap(true, Ordering::Relaxed) {
                    debug!("Event receiver dropped, reconcile events are no longer reported");
                }
            }
        }
    }
}
