// # SoftLayer Global IP Service
//
// This crate provides the SoftLayer implementation of `GlobalIpService` and a
// target source that reads virtual guest addresses.
//
// ## Behavior
//
// - One logical operation per trait call, errors propagated to the reconciler
// - HTTP timeout configured (30 seconds)
// - Status codes classified into NotFound / TransientTransport / RemoteRejection
// - NO retry or backoff (owned by Reconciler)
// - NO caching (state owned by StateStore)
// - NO background tasks
//
// ## Security Requirements
//
// - API key NEVER appears in logs or Debug output
// - Provider fails fast if credentials are empty
//
// ## API Reference
//
// - Read: GET `SoftLayer_Network_Subnet_IpAddress_Global/:id/getObject`
// - Route: POST `SoftLayer_Network_Subnet_IpAddress_Global/:id/route`
// - Delete: GET `.../:id/getBillingItem`, then GET `SoftLayer_Billing_Item/:id/cancelService`
// - Create: GET `SoftLayer_Product_Package/getAllObjects` (filtered by key name),
//   POST `SoftLayer_Product_Order/placeOrder`, then poll
//   GET `SoftLayer_Account/getGlobalIpRecords` for the new record

mod client;
mod guest;
mod wire;

pub use client::DEFAULT_ENDPOINT;
pub use guest::{
    ATTR_IPV4_ADDRESS, ATTR_IPV4_ADDRESS_PRIVATE, ATTR_IPV6_ADDRESS, VirtualGuestFactory,
    VirtualGuestTargetSource,
};

use async_trait::async_trait;
use client::{SERVICE_NAME, SoftLayerClient};
use globalip_core::config::ProviderConfig;
use globalip_core::traits::{GlobalIpService, GlobalIpServiceFactory};
use globalip_core::{Address, AddressFamily, Error, RemoteGlobalIp, Result};
use std::time::Duration;
use tokio::time::Instant;
use wire::{
    BillingItemRef, GLOBAL_IP_MASK, GLOBAL_IP_ORDER_MASK, GlobalIpRecord, OrderReceipt,
    PACKAGE_MASK, ProductPackage,
};

/// Product package that sells global IPs
const GLOBAL_IP_PACKAGE: &str = "ADDITIONAL_SERVICES_GLOBAL_IP_ADDRESSES";

/// Default upper bound on waiting for an ordered global IP
const DEFAULT_PROVISIONING_TIMEOUT: Duration = Duration::from_secs(600);

/// Interval between provisioning polls
const PROVISIONING_POLL_INTERVAL: Duration = Duration::from_secs(5);

const GLOBAL_IP_SERVICE: &str = "SoftLayer_Network_Subnet_IpAddress_Global";

/// Package item for an address family
fn item_key_name(family: AddressFamily) -> &'static str {
    match family {
        AddressFamily::V4 => "GLOBAL_IPV4",
        AddressFamily::V6 => "GLOBAL_IPV6",
    }
}

/// Error for a create that failed after its order was placed
///
/// Never transient: retrying the create would place a second billed order.
/// The order id lets an operator find and cancel the allocation.
fn placed_order_failed(order_id: u64, cause: Error) -> Error {
    Error::rejected(
        SERVICE_NAME,
        format!(
            "Order {} was placed but its global IP could not be completed: {}",
            order_id, cause
        ),
    )
}

/// SoftLayer global IP service
///
/// Stateless and single-shot: every coordination concern (retries, backoff,
/// persistence, scheduling) belongs to the `Reconciler`. The only waiting it
/// does is for a placed order to be provisioned, which is not a retry.
#[derive(Debug)]
pub struct SoftLayerService {
    client: SoftLayerClient,
    provisioning_timeout: Duration,
}

impl SoftLayerService {
    /// Create a new SoftLayer service
    ///
    /// # Parameters
    ///
    /// - `username`: SoftLayer API username
    /// - `api_key`: SoftLayer API key
    /// - `endpoint`: REST endpoint, defaults to [`DEFAULT_ENDPOINT`]
    pub fn new(
        username: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            client: SoftLayerClient::new(username, api_key, endpoint)?,
            provisioning_timeout: DEFAULT_PROVISIONING_TIMEOUT,
        })
    }

    /// Bound the wait for a newly ordered global IP
    pub fn with_provisioning_timeout(mut self, timeout: Duration) -> Self {
        self.provisioning_timeout = timeout;
        self
    }

    /// Price id for one global IP of `family`
    async fn find_price(&self, family: AddressFamily) -> Result<(u64, u64)> {
        let filter = serde_json::json!({
            "keyName": { "operation": GLOBAL_IP_PACKAGE }
        });
        let packages: Vec<ProductPackage> = self
            .client
            .get(
                "SoftLayer_Product_Package/getAllObjects",
                Some(PACKAGE_MASK),
                Some(&filter),
            )
            .await?;

        let key_name = item_key_name(family);
        packages
            .iter()
            .find_map(|package| {
                package
                    .standard_price(key_name)
                    .map(|price| (package.id, price))
            })
            .ok_or_else(|| {
                Error::rejected(
                    SERVICE_NAME,
                    format!("No price found for {} in package {}", key_name, GLOBAL_IP_PACKAGE),
                )
            })
    }

    /// Wait for the global IP created by `order_id` to get an address
    ///
    /// Transient read failures are tolerated until the deadline: the order
    /// already exists, so giving up early cannot be repaired by ordering again.
    async fn await_provisioned(&self, order_id: u64) -> Result<GlobalIpRecord> {
        let deadline = Instant::now() + self.provisioning_timeout;
        let mut last_error: Option<Error> = None;

        loop {
            match self
                .client
                .get::<Vec<GlobalIpRecord>>(
                    "SoftLayer_Account/getGlobalIpRecords",
                    Some(GLOBAL_IP_ORDER_MASK),
                    None,
                )
                .await
            {
                Ok(records) => {
                    if let Some(record) = records
                        .into_iter()
                        .find(|r| r.order_id() == Some(order_id) && r.to_remote().is_ok())
                    {
                        return Ok(record);
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!("Polling order {} failed: {}", order_id, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() + PROVISIONING_POLL_INTERVAL > deadline {
                let detail = last_error
                    .map(|e| format!(" (last error: {})", e))
                    .unwrap_or_default();
                return Err(Error::transient(format!(
                    "Global IP for order {} not provisioned within {:?}{}",
                    order_id, self.provisioning_timeout, detail
                )));
            }

            tracing::debug!("Waiting for global IP of order {} to be provisioned", order_id);
            tokio::time::sleep(PROVISIONING_POLL_INTERVAL).await;
        }
    }

    async fn route(&self, id: &str, target: &Address) -> Result<()> {
        let routed: bool = self
            .client
            .post(
                &format!("{}/{}/route", GLOBAL_IP_SERVICE, id),
                serde_json::json!([target.as_str()]),
            )
            .await?;

        if routed {
            Ok(())
        } else {
            Err(Error::rejected(
                SERVICE_NAME,
                format!("Routing global IP {} to {} was refused", id, target),
            ))
        }
    }
}

#[async_trait]
impl GlobalIpService for SoftLayerService {
    async fn get_global_ip(&self, id: &str) -> Result<RemoteGlobalIp> {
        let record: GlobalIpRecord = self
            .client
            .get(
                &format!("{}/{}/getObject", GLOBAL_IP_SERVICE, id),
                Some(GLOBAL_IP_MASK),
                None,
            )
            .await?;

        record.to_remote()
    }

    async fn create_global_ip(
        &self,
        family: AddressFamily,
        initial_route: &Address,
    ) -> Result<RemoteGlobalIp> {
        let (package_id, price_id) = self.find_price(family).await?;

        let order = serde_json::json!([{
            "complexType": "SoftLayer_Container_Product_Order_Network_Subnet",
            "packageId": package_id,
            "prices": [{ "id": price_id }],
            "quantity": 1,
        }]);
        let receipt: OrderReceipt = self
            .client
            .post("SoftLayer_Product_Order/placeOrder", order)
            .await?;
        tracing::info!(
            "Placed order {} for a {} global IP",
            receipt.order_id,
            family
        );

        let order_id = receipt.order_id;
        let record = self
            .await_provisioned(order_id)
            .await
            .map_err(|e| placed_order_failed(order_id, e))?;
        let mut remote = record
            .to_remote()
            .map_err(|e| placed_order_failed(order_id, e))?;

        if let Err(e) = self.route(&remote.id, initial_route).await {
            // Do not leave an unrecorded allocation behind
            tracing::warn!(
                "Routing new global IP {} failed, cancelling it: {}",
                remote.id,
                e
            );
            if let Err(cancel_err) = self.delete_global_ip(&remote.id).await {
                tracing::error!(
                    "Failed to cancel global IP {} ({}) after routing failure: {}",
                    remote.id,
                    remote.ip_address,
                    cancel_err
                );
                return Err(placed_order_failed(order_id, e));
            }
            return Err(e);
        }

        remote.destination = Some(initial_route.clone());
        Ok(remote)
    }

    async fn set_route(&self, id: &str, target: &Address) -> Result<()> {
        tracing::debug!("Routing SoftLayer global IP {} to {}", id, target);
        self.route(id, target).await
    }

    async fn delete_global_ip(&self, id: &str) -> Result<()> {
        let billing_item: Option<BillingItemRef> = self
            .client
            .get(
                &format!("{}/{}/getBillingItem", GLOBAL_IP_SERVICE, id),
                None,
                None,
            )
            .await?;

        // No billing item: the IP is already cancelled
        let billing_id = billing_item
            .and_then(|b| b.id)
            .ok_or_else(|| Error::not_found(format!("Global IP {} has no billing item", id)))?;

        let cancelled: bool = self
            .client
            .get(
                &format!("SoftLayer_Billing_Item/{}/cancelService", billing_id),
                None,
                None,
            )
            .await?;

        if cancelled {
            Ok(())
        } else {
            Err(Error::rejected(
                SERVICE_NAME,
                format!("Cancellation of global IP {} was refused", id),
            ))
        }
    }

    fn service_name(&self) -> &'static str {
        SERVICE_NAME
    }
}

/// Factory for creating SoftLayer services
pub struct SoftLayerFactory;

impl GlobalIpServiceFactory for SoftLayerFactory {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn GlobalIpService>> {
        match config {
            ProviderConfig::Softlayer {
                username,
                api_key,
                endpoint,
                provisioning_timeout_secs,
            } => {
                let mut service =
                    SoftLayerService::new(username.clone(), api_key.clone(), endpoint.as_deref())?;
                if let Some(secs) = provisioning_timeout_secs {
                    service = service.with_provisioning_timeout(Duration::from_secs(*secs));
                }
                Ok(Box::new(service))
            }
            _ => Err(Error::config("Invalid config for SoftLayer provider")),
        }
    }
}

/// Register the SoftLayer service and virtual guest target source
///
/// # Example
///
/// ```rust
/// use globalip_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::with_builtins();
/// globalip_provider_softlayer::register(&registry);
/// assert!(registry.has_service("softlayer"));
/// ```
pub fn register(registry: &globalip_core::ProviderRegistry) {
    registry.register_service("softlayer", Box::new(SoftLayerFactory));
    registry.register_target_source("softlayer_virtual_guest", Box::new(VirtualGuestFactory));
}
