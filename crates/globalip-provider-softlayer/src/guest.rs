// # Virtual Guest Target Source
//
// Reports the addresses of SoftLayer virtual guests so bindings can route to
// `${vm.ipv4_address}` or `${vm.ipv6_address}`. The guest itself is
// provisioned elsewhere; `external_ref` holds its id.

use crate::client::SoftLayerClient;
use crate::wire::{GUEST_MASK, VirtualGuest};
use async_trait::async_trait;
use globalip_core::config::TargetSourceConfig;
use globalip_core::traits::{TargetSource, TargetSourceFactory};
use globalip_core::{Error, Result, TargetSpec};
use std::collections::HashMap;

/// Public IPv4 address of the guest
pub const ATTR_IPV4_ADDRESS: &str = "ipv4_address";
/// Private (backend) IPv4 address of the guest
pub const ATTR_IPV4_ADDRESS_PRIVATE: &str = "ipv4_address_private";
/// Primary IPv6 address of the guest
pub const ATTR_IPV6_ADDRESS: &str = "ipv6_address";

/// Target source backed by `SoftLayer_Virtual_Guest`
#[derive(Debug)]
pub struct VirtualGuestTargetSource {
    client: SoftLayerClient,
}

impl VirtualGuestTargetSource {
    /// Create a new target source
    pub fn new(
        username: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            client: SoftLayerClient::new(username, api_key, endpoint)?,
        })
    }
}

#[async_trait]
impl TargetSource for VirtualGuestTargetSource {
    /// Static attributes from the plan, overlaid with the guest's addresses
    ///
    /// A target without `external_ref` is reported from its static
    /// attributes only.
    async fn converge(&self, target: &TargetSpec) -> Result<HashMap<String, String>> {
        let mut attributes = target.attributes.clone();

        let Some(guest_id) = target.external_ref.as_deref() else {
            tracing::debug!(
                "Target {} has no virtual guest id, using static attributes",
                target.id
            );
            return Ok(attributes);
        };

        let guest: VirtualGuest = self
            .client
            .get(
                &format!("SoftLayer_Virtual_Guest/{}/getObject", guest_id),
                Some(GUEST_MASK),
                None,
            )
            .await?;

        let discovered = [
            (ATTR_IPV4_ADDRESS, guest.primary_ip_address.as_deref()),
            (
                ATTR_IPV4_ADDRESS_PRIVATE,
                guest.primary_backend_ip_address.as_deref(),
            ),
            (ATTR_IPV6_ADDRESS, guest.ipv6_address()),
        ];
        for (name, value) in discovered {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                attributes.insert(name.to_string(), value.to_string());
            }
        }

        tracing::debug!(
            "Virtual guest {} ({}) reports {} attribute(s)",
            target.id,
            guest.id,
            attributes.len()
        );
        Ok(attributes)
    }

    fn source_name(&self) -> &'static str {
        "softlayer_virtual_guest"
    }
}

/// Factory for [`VirtualGuestTargetSource`]
pub struct VirtualGuestFactory;

impl TargetSourceFactory for VirtualGuestFactory {
    fn create(&self, config: &TargetSourceConfig) -> Result<Box<dyn TargetSource>> {
        match config {
            TargetSourceConfig::SoftlayerVirtualGuest {
                username,
                api_key,
                endpoint,
            } => Ok(Box::new(VirtualGuestTargetSource::new(
                username.clone(),
                api_key.clone(),
                endpoint.as_deref(),
            )?)),
            _ => Err(Error::config("Invalid config for SoftLayer virtual guest source")),
        }
    }
}
