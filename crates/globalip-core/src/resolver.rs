//! Target resolution
//!
//! Turns a [`RouteTarget`] into a concrete [`Address`] using the outputs of
//! resources that have finished their apply in the current cycle.
//!
//! A [`ConvergedState`] lives for exactly one apply cycle. Nothing is cached
//! across cycles: the point of a binding is to follow the latest value of the
//! attribute it references.

use crate::address::Address;
use crate::error::{Error, Result};
use crate::model::RouteTarget;
use std::collections::HashMap;

/// Outputs of resources that completed their apply in this cycle
#[derive(Debug, Clone, Default)]
pub struct ConvergedState {
    outputs: HashMap<String, HashMap<String, String>>,
}

impl ConvergedState {
    /// Empty state for a fresh cycle
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outputs of a resource that finished its apply
    pub fn record(&mut self, resource: impl Into<String>, attributes: HashMap<String, String>) {
        self.outputs.insert(resource.into(), attributes);
    }

    /// Whether the resource finished its apply in this cycle
    pub fn is_converged(&self, resource: &str) -> bool {
        self.outputs.contains_key(resource)
    }

    /// Read one attribute of a converged resource
    pub fn attribute(&self, resource: &str, attribute: &str) -> Option<&str> {
        self.outputs
            .get(resource)
            .and_then(|attrs| attrs.get(attribute))
            .map(String::as_str)
    }

    /// Number of converged resources
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether nothing has converged yet
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Resolve a route target to a literal address
///
/// # Errors
///
/// - [`Error::UnresolvedDependency`]: the referenced resource has not
///   converged in this cycle, or has not produced the attribute yet
/// - [`Error::AttributeTypeMismatch`]: the value is not a valid address
pub fn resolve(target: &RouteTarget, converged: &ConvergedState) -> Result<Address> {
    match target {
        RouteTarget::Literal(literal) => Address::parse(literal)
            .map_err(|_| Error::type_mismatch(literal, "literal route is not a valid address")),
        RouteTarget::Reference(reference) => {
            if !converged.is_converged(&reference.resource) {
                return Err(Error::unresolved(
                    &reference.resource,
                    &reference.attribute,
                    "resource has not completed its apply in this cycle",
                ));
            }

            let value = converged
                .attribute(&reference.resource, &reference.attribute)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    Error::unresolved(
                        &reference.resource,
                        &reference.attribute,
                        "attribute has not been produced",
                    )
                })?;

            Address::parse(value).map_err(|_| {
                Error::type_mismatch(
                    reference.to_string(),
                    format!("value {value:?} is not an IPv4 or full-form IPv6 address"),
                )
            })
        }
    }
}
