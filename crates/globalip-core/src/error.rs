//! Error types for the global IP system
//!
//! The taxonomy mirrors how failures are handled by the reconciler:
//! only [`Error::NotFound`] is recovered internally (drift handling),
//! only [`Error::TransientTransport`] is retried, everything else
//! propagates unchanged to the orchestrator.

use thiserror::Error;

/// Result type alias for global IP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the global IP system
#[derive(Error, Debug)]
pub enum Error {
    /// A route target was resolved before its resource converged this cycle
    #[error("Unresolved dependency: {resource}.{attribute} ({reason})")]
    UnresolvedDependency {
        /// Referenced resource identity
        resource: String,
        /// Referenced attribute name
        attribute: String,
        /// Why resolution failed
        reason: String,
    },

    /// A referenced attribute does not hold a usable address
    #[error("Attribute type mismatch for {reference}: {message}")]
    AttributeTypeMismatch {
        /// The reference (or literal) that produced the value
        reference: String,
        /// What was wrong with it
        message: String,
    },

    /// A literal failed address validation
    #[error("Invalid address literal: {0:?}")]
    InvalidAddress(String),

    /// Remote object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure, timeout or server-side (5xx/429) error
    #[error("Transient transport error: {0}")]
    TransientTransport(String),

    /// Definitive rejection from the remote service (quota, validation, auth)
    #[error("Remote rejection ({service}): {message}")]
    RemoteRejection {
        /// Remote service name
        service: String,
        /// Message as reported by the service
        message: String,
    },

    /// The apply graph contains a cycle
    #[error("Dependency cycle between: {0}")]
    DependencyCycle(String),

    /// The apply cycle was cancelled between steps
    #[error("Apply cycle cancelled")]
    Cancelled,

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an unresolved dependency error
    pub fn unresolved(
        resource: impl Into<String>,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnresolvedDependency {
            resource: resource.into(),
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// Create an attribute type mismatch error
    pub fn type_mismatch(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AttributeTypeMismatch {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a transient transport error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientTransport(msg.into())
    }

    /// Create a remote rejection error
    pub fn rejected(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteRejection {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the engine may retry the failed call
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientTransport(_))
    }

    /// Whether the error signals a missing remote object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_transient() {
        assert!(Error::transient("timeout").is_transient());
        assert!(!Error::rejected("softlayer", "quota exceeded").is_transient());
        assert!(!Error::not_found("global ip 42").is_transient());
        assert!(!Error::unresolved("vm1", "ipv4_address", "not applied").is_transient());
    }

    #[test]
    fn rejection_message_is_verbatim() {
        let err = Error::rejected("softlayer", "Invalid route target 10.0.0.999");
        assert_eq!(
            err.to_string(),
            "Remote rejection (softlayer): Invalid route target 10.0.0.999"
        );
    }
}
