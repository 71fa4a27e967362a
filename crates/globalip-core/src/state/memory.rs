// # Memory State Store
//
// In-memory implementation of StateStore.
//
// ## Crash Behavior
//
// - All bindings are forgotten on restart
// - The next cycle sees every binding as ABSENT and allocates new global IPs;
//   the old ones stay allocated remotely
//
// Use it for tests and one-off runs against throwaway accounts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StateStoreConfig;
use crate::model::GlobalIpBinding;
use crate::traits::{StateStore, StateStoreFactory};

/// In-memory state store implementation
///
/// Clones share the same underlying map, so a test can keep a handle to the
/// store it hands to the reconciler.
///
/// # Example
///
/// ```rust,no_run
/// use globalip_core::state::MemoryStateStore;
/// use globalip_core::traits::StateStore;
/// use globalip_core::{Address, GlobalIpBinding};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new();
///     let binding = GlobalIpBinding::new(
///         "1234",
///         Address::parse("159.8.1.2")?,
///         Address::parse("10.0.0.5")?,
///     );
///
///     store.set_binding("test-global-ip", &binding).await?;
///     assert_eq!(store.get_binding("test-global-ip").await?, Some(binding));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<HashMap<String, GlobalIpBinding>>>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of bindings in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_binding(&self, name: &str) -> Result<Option<GlobalIpBinding>, Error> {
        Ok(self.inner.read().await.get(name).cloned())
    }

    async fn set_binding(&self, name: &str, binding: &GlobalIpBinding) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(name.to_string(), binding.clone());
        Ok(())
    }

    async fn delete_binding(&self, name: &str) -> Result<(), Error> {
        self.inner.write().await.remove(name);
        Ok(())
    }

    async fn list_bindings(&self) -> Result<Vec<String>, Error> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for [`MemoryStateStore`]
pub struct MemoryStateStoreFactory;

#[async_trait]
impl StateStoreFactory for MemoryStateStoreFactory {
    async fn create(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>, Error> {
        match config {
            StateStoreConfig::Memory => Ok(Box::new(MemoryStateStore::new())),
            other => Err(Error::config(format!(
                "Memory state store cannot be built from {} config",
                other.type_name()
            ))),
        }
    }
}
