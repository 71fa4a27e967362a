//! Data model for global IP bindings
//!
//! - [`BindingSpec`]: desired state for one binding (user intent)
//! - [`GlobalIpBinding`]: persisted `BOUND` state
//! - [`RemoteGlobalIp`]: normalized view of the remote object
//! - [`TargetSpec`]: a target resource node in the apply graph
//! - [`Plan`]: everything one apply cycle should converge

use crate::address::{Address, AddressFamily};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Output attribute carrying a binding's remote id
pub const ATTR_ID: &str = "id";
/// Output attribute carrying a binding's allocated address
pub const ATTR_IP_ADDRESS: &str = "ip_address";
/// Output attribute carrying a binding's current route
pub const ATTR_ROUTES_TO: &str = "routes_to";

/// A (resource, attribute) pair pointing at another resource's computed value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetReference {
    /// Identity of the referenced resource
    pub resource: String,
    /// Name of the referenced attribute
    pub attribute: String,
}

impl TargetReference {
    /// Create a new reference
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }

    /// Parse `resource.attribute`; the attribute is the last dotted segment
    pub fn parse(expr: &str) -> Result<Self> {
        match expr.rsplit_once('.') {
            Some((resource, attribute)) if !resource.is_empty() && !attribute.is_empty() => {
                Ok(Self::new(resource, attribute))
            }
            _ => Err(Error::config(format!(
                "Invalid target reference {expr:?}, expected resource.attribute"
            ))),
        }
    }
}

impl fmt::Display for TargetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// Where a global IP should route to
///
/// In configuration this is a single string: `${resource.attribute}` is a
/// reference, anything else is an address literal (validated at resolve time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RouteTarget {
    /// A literal address
    Literal(String),
    /// Another resource's computed address attribute
    Reference(TargetReference),
}

impl RouteTarget {
    /// Reference to `resource.attribute`
    pub fn reference(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        RouteTarget::Reference(TargetReference::new(resource, attribute))
    }

    /// A literal address
    pub fn literal(value: impl Into<String>) -> Self {
        RouteTarget::Literal(value.into())
    }

    /// The referenced resource, if any
    pub fn dependency(&self) -> Option<&str> {
        match self {
            RouteTarget::Literal(_) => None,
            RouteTarget::Reference(r) => Some(&r.resource),
        }
    }
}

impl TryFrom<String> for RouteTarget {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        let trimmed = value.trim();
        match trimmed
            .strip_prefix("${")
            .and_then(|rest| rest.strip_suffix('}'))
        {
            Some(expr) => TargetReference::parse(expr.trim()).map(RouteTarget::Reference),
            None => Ok(RouteTarget::Literal(trimmed.to_string())),
        }
    }
}

impl From<RouteTarget> for String {
    fn from(target: RouteTarget) -> Self {
        match target {
            RouteTarget::Literal(literal) => literal,
            RouteTarget::Reference(r) => format!("${{{r}}}"),
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Literal(literal) => f.write_str(literal),
            RouteTarget::Reference(r) => write!(f, "${{{r}}}"),
        }
    }
}

/// Desired state of one global IP binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSpec {
    /// Binding name, unique within a plan
    pub name: String,

    /// Routing target
    pub routes_to: RouteTarget,

    /// Explicit address family pin; inferred from the route when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<AddressFamily>,
}

impl BindingSpec {
    /// Create a binding spec without a family pin
    pub fn new(name: impl Into<String>, routes_to: RouteTarget) -> Self {
        Self {
            name: name.into(),
            routes_to,
            family: None,
        }
    }

    /// Pin the address family
    pub fn with_family(mut self, family: AddressFamily) -> Self {
        self.family = Some(family);
        self
    }
}

/// Persisted state of a bound global IP
///
/// A binding only exists once the remote service has confirmed both an id
/// and an allocated address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalIpBinding {
    /// Remote identifier, immutable once assigned
    pub id: String,
    /// Allocated global address, fixed for the life of the binding
    pub ip_address: Address,
    /// Last route written to the remote service
    pub routes_to: Address,
    /// Timestamp of the last change
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl GlobalIpBinding {
    /// Create a binding record stamped with the current time
    pub fn new(id: impl Into<String>, ip_address: Address, routes_to: Address) -> Self {
        Self {
            id: id.into(),
            ip_address,
            routes_to,
            last_updated: chrono::Utc::now(),
        }
    }

    /// Family of the allocated address
    pub fn family(&self) -> AddressFamily {
        self.ip_address.family()
    }

    /// Allocated address and route share a family
    pub fn is_consistent(&self) -> bool {
        !self.id.is_empty() && self.ip_address.family() == self.routes_to.family()
    }

    /// Copy with a new route, keeping id and address untouched
    pub fn rerouted(&self, routes_to: Address) -> Self {
        Self {
            id: self.id.clone(),
            ip_address: self.ip_address.clone(),
            routes_to,
            last_updated: chrono::Utc::now(),
        }
    }

    /// Attributes other graph nodes may reference
    pub fn outputs(&self) -> HashMap<String, String> {
        HashMap::from([
            (ATTR_ID.to_string(), self.id.clone()),
            (ATTR_IP_ADDRESS.to_string(), self.ip_address.as_str().to_string()),
            (ATTR_ROUTES_TO.to_string(), self.routes_to.as_str().to_string()),
        ])
    }
}

/// Normalized remote global IP object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteGlobalIp {
    /// Remote identifier
    pub id: String,
    /// Allocated address
    pub ip_address: Address,
    /// Current route destination, if the service reports one
    pub destination: Option<Address>,
}

/// A target resource in the apply graph
///
/// Target resources are reconciled elsewhere; a [`crate::TargetSource`]
/// reports their attributes once they have converged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Resource identity, referenced as `${id.attribute}`
    pub id: String,

    /// Provider-specific handle (e.g. a virtual guest id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    /// Statically known attributes
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl TargetSpec {
    /// Create a target with no attributes
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            external_ref: None,
            attributes: HashMap::new(),
        }
    }

    /// Add a static attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set the provider-specific handle
    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }
}

/// Desired state for one apply cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Target resources bindings may route to
    #[serde(default)]
    pub targets: Vec<TargetSpec>,

    /// Global IP bindings to converge
    #[serde(default)]
    pub bindings: Vec<BindingSpec>,
}

impl Plan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target
    pub fn with_target(mut self, target: TargetSpec) -> Self {
        self.targets.push(target);
        self
    }

    /// Add a binding
    pub fn with_binding(mut self, binding: BindingSpec) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Parse a plan from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Find a binding by name
    pub fn binding(&self, name: &str) -> Option<&BindingSpec> {
        self.bindings.iter().find(|b| b.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_target_parses_reference_and_literal() {
        let r = RouteTarget::try_from("${softlayer_virtual_guest.vm1.ipv4_address}".to_string())
            .unwrap();
        assert_eq!(
            r,
            RouteTarget::reference("softlayer_virtual_guest.vm1", "ipv4_address")
        );
        assert_eq!(r.dependency(), Some("softlayer_virtual_guest.vm1"));

        let l = RouteTarget::try_from("10.0.0.5".to_string()).unwrap();
        assert_eq!(l, RouteTarget::literal("10.0.0.5"));
        assert_eq!(l.dependency(), None);

        assert!(RouteTarget::try_from("${novalue}".to_string()).is_err());
    }

    #[test]
    fn plan_loads_from_json() {
        let plan = Plan::from_json(
            r#"{
                "targets": [
                    { "id": "vm1", "attributes": { "ipv4_address": "10.0.0.5" } }
                ],
                "bindings": [
                    { "name": "test-global-ip", "routes_to": "${vm1.ipv4_address}" },
                    { "name": "pinned", "routes_to": "10.0.0.9", "family": "v4" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(plan.targets.len(), 1);
        assert_eq!(
            plan.binding("test-global-ip").unwrap().routes_to,
            RouteTarget::reference("vm1", "ipv4_address")
        );
        assert_eq!(
            plan.binding("pinned").unwrap().family,
            Some(AddressFamily::V4)
        );
    }

    #[test]
    fn binding_outputs_and_consistency() {
        let binding = GlobalIpBinding::new(
            "1234",
            Address::parse("159.8.1.2").unwrap(),
            Address::parse("10.0.0.5").unwrap(),
        );
        assert!(binding.is_consistent());
        assert_eq!(binding.outputs()[ATTR_IP_ADDRESS], "159.8.1.2");

        let rerouted = binding.rerouted(Address::parse("10.0.0.9").unwrap());
        assert_eq!(rerouted.id, binding.id);
        assert_eq!(rerouted.ip_address.as_str(), binding.ip_address.as_str());
        assert_eq!(rerouted.routes_to.as_str(), "10.0.0.9");

        let mixed = GlobalIpBinding::new(
            "1234",
            Address::parse("159.8.1.2").unwrap(),
            Address::parse("2607:f0d0:1000:00c8:0000:0000:0000:0004").unwrap(),
        );
        assert!(!mixed.is_consistent());
    }
}
