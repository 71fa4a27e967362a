// # Global IP Service Trait
//
// Defines the remote service boundary for global IP objects.
//
// ## Implementations
//
// - SoftLayer: `globalip-provider-softlayer` crate
//
// ## Usage
//
// ```rust,ignore
// use globalip_core::{Address, AddressFamily, GlobalIpService};
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let service = /* GlobalIpService implementation */;
//
//     let target = Address::parse("10.0.0.5")?;
//     let created = service.create_global_ip(AddressFamily::V4, &target).await?;
//     service.set_route(&created.id, &Address::parse("10.0.0.9")?).await?;
//     service.delete_global_ip(&created.id).await?;
//
//     Ok(())
// }
// ```

use crate::address::{Address, AddressFamily};
use crate::model::RemoteGlobalIp;
use async_trait::async_trait;

/// Trait for remote global IP services
///
/// Each method maps to exactly one logical remote operation:
///
/// | Method | Remote contract |
/// |---|---|
/// | [`get_global_ip`](Self::get_global_ip) | `GetGlobalIp(id) -> {id, ip_address} \| NotFound \| Error` |
/// | [`create_global_ip`](Self::create_global_ip) | `CreateGlobalIp(family, initial_route) -> {id, ip_address} \| Error` |
/// | [`set_route`](Self::set_route) | `SetGlobalIpRoute(id, target_literal) -> Ack \| Error` |
/// | [`delete_global_ip`](Self::delete_global_ip) | `DeleteGlobalIp(id) -> Ack \| Error` |
///
/// # Error Classification
///
/// Implementations must classify every failure:
/// - [`crate::Error::NotFound`]: the object does not exist
/// - [`crate::Error::TransientTransport`]: timeouts, connection failures, 429, 5xx
/// - [`crate::Error::RemoteRejection`]: everything the service refused definitively
///
/// # No Retry Logic
///
/// Services are single-shot. Retry and backoff for transient failures are
/// owned by [`crate::Reconciler`], which only retries what the service
/// classified as transient.
///
/// # Thread Safety
///
/// Implementations must be usable from concurrent reconciliations of
/// distinct bindings.
#[async_trait]
pub trait GlobalIpService: Send + Sync {
    /// Fetch a global IP by id
    ///
    /// # Returns
    ///
    /// - `Ok(RemoteGlobalIp)`: the normalized remote object
    /// - `Err(Error::NotFound)`: the object no longer exists
    /// - `Err(Error)`: transport failure or rejection
    async fn get_global_ip(&self, id: &str) -> Result<RemoteGlobalIp, crate::Error>;

    /// Allocate a new global IP of `family` routed to `initial_route`
    ///
    /// Only returns once the remote service has assigned both an id and an
    /// address.
    async fn create_global_ip(
        &self,
        family: AddressFamily,
        initial_route: &Address,
    ) -> Result<RemoteGlobalIp, crate::Error>;

    /// Point an existing global IP at a new destination
    async fn set_route(&self, id: &str, target: &Address) -> Result<(), crate::Error>;

    /// Release a global IP
    async fn delete_global_ip(&self, id: &str) -> Result<(), crate::Error>;

    /// Service name (for logging/debugging)
    fn service_name(&self) -> &'static str;
}

/// Helper trait for constructing global IP services from configuration
pub trait GlobalIpServiceFactory: Send + Sync {
    /// Create a GlobalIpService instance from configuration
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Box<dyn GlobalIpService>, crate::Error>;
}
