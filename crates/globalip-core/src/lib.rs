// # globalip-core
//
// Core library for declarative global IP management.
//
// ## Architecture Overview
//
// A global IP is a provider-allocated public address that can be re-routed
// to any instance. This library keeps each declared binding converged:
// - **GlobalIpService**: Trait for the remote create/read/route/delete API
// - **TargetSource**: Trait reporting attributes of target resources
// - **StateStore**: Trait for persisted binding state
// - **Reconciler**: Per-binding diff and apply (create, re-route, recreate, delete)
// - **Orchestrator**: Dependency-ordered apply cycles over a whole plan
// - **ProviderRegistry**: Plugin-based registry for services, sources and stores
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from provider implementations
// 2. **Fresh Resolution**: Route targets are resolved anew in every cycle
// 3. **Plugin-Based**: Components are registered dynamically, no hard-coded if-else
// 4. **Library-First**: All core functionality can be used as a library
// 5. **Record Before Cancel**: A confirmed remote object is always persisted

pub mod address;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use address::{Address, AddressFamily};
pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use config::{EngineConfig, GlobalIpConfig, ProviderConfig, StateStoreConfig, TargetSourceConfig};
pub use engine::{Observed, ReconcileEvent, ReconcileOutcome, Reconciler};
pub use error::{Error, Result};
pub use graph::{ApplyGraph, GraphNode, NodeKind};
pub use model::{BindingSpec, GlobalIpBinding, Plan, RemoteGlobalIp, RouteTarget, TargetReference, TargetSpec};
pub use orchestrator::{CycleReport, NodeOutcome, NodeReport, Orchestrator};
pub use registry::ProviderRegistry;
pub use resolver::{ConvergedState, resolve};
pub use state::{FileStateStore, MemoryStateStore};
pub use traits::{GlobalIpService, StateStore, TargetSource};
