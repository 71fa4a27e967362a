//! Plugin-based provider registry
//!
//! The registry allows global IP services, target sources and state stores
//! to be registered dynamically at runtime, avoiding hardcoded if-else chains.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use globalip_core::registry::ProviderRegistry;
//! use globalip_core::config::ProviderConfig;
//!
//! // Built-in state stores and the static target source
//! let registry = ProviderRegistry::with_builtins();
//!
//! // Provider crates register themselves
//! globalip_provider_softlayer::register(&registry);
//!
//! let config = ProviderConfig::Softlayer { ... };
//! let service = registry.create_service(&config)?;
//! ```
//!
//! ## Registration
//!
//! Implementations should register themselves during initialization:
//!
//! ```rust,ignore
//! // In globalip-provider-softlayer crate
//! pub fn register(registry: &ProviderRegistry) {
//!     registry.register_service("softlayer", Box::new(SoftLayerFactory));
//! }
//! ```

use crate::config::{ProviderConfig, StateStoreConfig, TargetSourceConfig};
use crate::error::{Error, Result};
use crate::state::{FileStateStoreFactory, MemoryStateStoreFactory};
use crate::traits::{
    GlobalIpService, GlobalIpServiceFactory, StateStore, StateStoreFactory,
    StaticTargetSourceFactory, TargetSource, TargetSourceFactory,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Registry for plugin-based component creation
///
/// The registry maintains maps of type names to factory objects, allowing
/// dynamic instantiation of components based on configuration.
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ProviderRegistry {
    /// Registered global IP service factories
    services: RwLock<HashMap<String, Box<dyn GlobalIpServiceFactory>>>,

    /// Registered target source factories
    target_sources: RwLock<HashMap<String, Box<dyn TargetSourceFactory>>>,

    /// Registered state store factories
    state_stores: RwLock<HashMap<String, Arc<dyn StateStoreFactory>>>,
}

// A panicking registrant cannot leave a map half-written, so a poisoned
// lock still guards consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the in-crate components registered
    ///
    /// - state stores: `memory`, `file`
    /// - target sources: `static`
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_state_store("memory", Box::new(MemoryStateStoreFactory));
        registry.register_state_store("file", Box::new(FileStateStoreFactory));
        registry.register_target_source("static", Box::new(StaticTargetSourceFactory));
        registry
    }

    /// Register a global IP service factory
    ///
    /// # Parameters
    ///
    /// - `name`: Service type name (e.g., "softlayer")
    /// - `factory`: Factory object for creating service instances
    pub fn register_service(
        &self,
        name: impl Into<String>,
        factory: Box<dyn GlobalIpServiceFactory>,
    ) {
        write(&self.services).insert(name.into(), factory);
    }

    /// Register a target source factory
    pub fn register_target_source(
        &self,
        name: impl Into<String>,
        factory: Box<dyn TargetSourceFactory>,
    ) {
        write(&self.target_sources).insert(name.into(), factory);
    }

    /// Register a state store factory
    pub fn register_state_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn StateStoreFactory>,
    ) {
        write(&self.state_stores).insert(name.into(), Arc::from(factory));
    }

    /// Create a global IP service from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn GlobalIpService>)`: Created service instance
    /// - `Err(Error)`: If the service type is not registered or creation fails
    pub fn create_service(&self, config: &ProviderConfig) -> Result<Box<dyn GlobalIpService>> {
        let service_type = config.type_name();
        let services = read(&self.services);

        let factory = services
            .get(service_type)
            .ok_or_else(|| Error::config(format!("Unknown provider type: {}", service_type)))?;

        factory.create(config)
    }

    /// Create a target source from configuration
    pub fn create_target_source(
        &self,
        config: &TargetSourceConfig,
    ) -> Result<Box<dyn TargetSource>> {
        let source_type = config.type_name();
        let sources = read(&self.target_sources);

        let factory = sources.get(source_type).ok_or_else(|| {
            Error::config(format!("Unknown target source type: {}", source_type))
        })?;

        factory.create(config)
    }

    /// Create a state store from configuration
    pub async fn create_state_store(
        &self,
        config: &StateStoreConfig,
    ) -> Result<Box<dyn StateStore>> {
        let store_type = config.type_name();

        // Clone the factory out so no lock is held across the await
        let factory = read(&self.state_stores)
            .get(store_type)
            .cloned()
            .ok_or_else(|| Error::config(format!("Unknown state store type: {}", store_type)))?;

        factory.create(config).await
    }

    /// List all registered service types
    pub fn list_services(&self) -> Vec<String> {
        read(&self.services).keys().cloned().collect()
    }

    /// List all registered target source types
    pub fn list_target_sources(&self) -> Vec<String> {
        read(&self.target_sources).keys().cloned().collect()
    }

    /// List all registered state store types
    pub fn list_state_stores(&self) -> Vec<String> {
        read(&self.state_stores).keys().cloned().collect()
    }

    /// Check if a service type is registered
    pub fn has_service(&self, name: &str) -> bool {
        read(&self.services).contains_key(name)
    }

    /// Check if a target source type is registered
    pub fn has_target_source(&self, name: &str) -> bool {
        read(&self.target_sources).contains_key(name)
    }

    /// Check if a state store type is registered
    pub fn has_state_store(&self, name: &str) -> bool {
        read(&self.state_stores).contains_key(name)
    }
}
