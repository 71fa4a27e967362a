// SoftLayer data types, restricted to the fields the object masks request.

use crate::client::SERVICE_NAME;
use globalip_core::{Address, Error, RemoteGlobalIp, Result};
use serde::Deserialize;

/// Mask for a single global IP read
pub(crate) const GLOBAL_IP_MASK: &str =
    "mask[id,ipAddress[ipAddress],destinationIpAddress[ipAddress]]";

/// Mask for the account-wide listing used to find a freshly ordered global IP
pub(crate) const GLOBAL_IP_ORDER_MASK: &str =
    "mask[id,ipAddress[ipAddress],destinationIpAddress[ipAddress],billingItem[id,orderItem[order[id]]]]";

/// Mask for the product package lookup
pub(crate) const PACKAGE_MASK: &str = "mask[id,items[id,keyName,prices[id,locationGroupId]]]";

/// Mask for virtual guest addresses
pub(crate) const GUEST_MASK: &str = "mask[id,primaryIpAddress,primaryBackendIpAddress,primaryNetworkComponent[primaryVersion6IpAddressRecord[ipAddress]]]";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IpAddressRef {
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct IdRef {
    #[serde(default)]
    pub id: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrderItemRef {
    #[serde(default)]
    pub order: Option<IdRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BillingItemRef {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub order_item: Option<OrderItemRef>,
}

/// `SoftLayer_Network_Subnet_IpAddress_Global`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GlobalIpRecord {
    pub id: u64,
    #[serde(default)]
    pub ip_address: Option<IpAddressRef>,
    #[serde(default)]
    pub destination_ip_address: Option<IpAddressRef>,
    #[serde(default)]
    pub billing_item: Option<BillingItemRef>,
}

impl GlobalIpRecord {
    /// Id of the order that allocated this record, when masked in
    pub fn order_id(&self) -> Option<u64> {
        self.billing_item
            .as_ref()?
            .order_item
            .as_ref()?
            .order
            .as_ref()?
            .id
    }

    /// Normalize into the engine's view
    ///
    /// A record without an address is still being provisioned and is not
    /// usable; a missing destination means the IP is not routed.
    pub fn to_remote(&self) -> Result<RemoteGlobalIp> {
        let ip = self
            .ip_address
            .as_ref()
            .and_then(|a| a.ip_address.as_deref())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::rejected(
                    SERVICE_NAME,
                    format!("global IP {} has no address assigned", self.id),
                )
            })?;

        let ip_address = Address::parse(ip).map_err(|_| {
            Error::rejected(
                SERVICE_NAME,
                format!("global IP {} reports unusable address {:?}", self.id, ip),
            )
        })?;

        // An unparseable destination is reported as unknown, the recorded
        // route stays authoritative
        let destination = self
            .destination_ip_address
            .as_ref()
            .and_then(|a| a.ip_address.as_deref())
            .and_then(|d| Address::parse(d).ok());

        Ok(RemoteGlobalIp {
            id: self.id.to_string(),
            ip_address,
            destination,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ItemPrice {
    pub id: u64,
    #[serde(default)]
    pub location_group_id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PackageItem {
    #[serde(default)]
    pub key_name: String,
    #[serde(default)]
    pub prices: Vec<ItemPrice>,
}

/// `SoftLayer_Product_Package`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProductPackage {
    pub id: u64,
    #[serde(default)]
    pub items: Vec<PackageItem>,
}

impl ProductPackage {
    /// Location-independent price of the item with `key_name`
    pub fn standard_price(&self, key_name: &str) -> Option<u64> {
        self.items
            .iter()
            .filter(|item| item.key_name == key_name)
            .flat_map(|item| item.prices.iter())
            .find(|price| price.location_group_id.is_none())
            .map(|price| price.id)
    }
}

/// `SoftLayer_Container_Product_Order_Receipt`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OrderReceipt {
    pub order_id: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NetworkComponent {
    #[serde(default)]
    pub primary_version6_ip_address_record: Option<IpAddressRef>,
}

/// `SoftLayer_Virtual_Guest`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VirtualGuest {
    pub id: u64,
    #[serde(default)]
    pub primary_ip_address: Option<String>,
    #[serde(default)]
    pub primary_backend_ip_address: Option<String>,
    #[serde(default)]
    pub primary_network_component: Option<NetworkComponent>,
}

impl VirtualGuest {
    pub fn ipv6_address(&self) -> Option<&str> {
        self.primary_network_component
            .as_ref()?
            .primary_version6_ip_address_record
            .as_ref()?
            .ip_address
            .as_deref()
    }
}
