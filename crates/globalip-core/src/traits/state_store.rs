// # State Store Trait
//
// Defines the interface for persisted binding state.
//
// ## Purpose
//
// The state store is the "last known" side of every diff:
// - The id and allocated address of each bound global IP
// - The route last written to the remote service
// - Update timestamps
//
// A binding is written only after the remote service has confirmed it, so a
// stored record always carries a real id and a valid address.
//
// ## Implementations
//
// - File-based: JSON file with atomic writes and backup
// - Memory: for tests and throwaway runs

use crate::model::GlobalIpBinding;
use async_trait::async_trait;

/// Trait for state store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks;
/// distinct bindings are reconciled in parallel.
///
/// # Implementation Guidelines
///
/// - **Async I/O only**: never block the runtime
/// - **Durable writes**: `set_binding` must not return before the record is
///   persisted; an unrecorded remote object leaks
/// - **Explicit flush**: `flush()` must persist all pending changes
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the persisted binding
    ///
    /// # Returns
    ///
    /// - `Ok(Some(GlobalIpBinding))`: the binding is `BOUND`
    /// - `Ok(None)`: the binding is `ABSENT`
    /// - `Err(Error)`: storage error
    async fn get_binding(&self, name: &str) -> Result<Option<GlobalIpBinding>, crate::Error>;

    /// Create or replace a binding record
    async fn set_binding(&self, name: &str, binding: &GlobalIpBinding)
    -> Result<(), crate::Error>;

    /// Delete a binding record (succeeds if it did not exist)
    async fn delete_binding(&self, name: &str) -> Result<(), crate::Error>;

    /// List all binding names in the store
    async fn list_bindings(&self) -> Result<Vec<String>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing state stores from configuration
#[async_trait]
pub trait StateStoreFactory: Send + Sync {
    /// Create a StateStore instance from configuration
    async fn create(
        &self,
        config: &crate::config::StateStoreConfig,
    ) -> Result<Box<dyn StateStore>, crate::Error>;
}
