//! Configuration types for the global IP system
//!
//! This module defines all configuration structures used throughout the crate.
//! Desired state itself lives in [`crate::Plan`]; these types only describe
//! how to reach the remote service and how the engine behaves.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalIpConfig {
    /// Remote global IP service configuration
    pub provider: ProviderConfig,

    /// Where target resource attributes come from
    #[serde(default)]
    pub targets: TargetSourceConfig,

    /// State store configuration
    #[serde(default)]
    pub state_store: StateStoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl GlobalIpConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.provider.validate()?;
        self.targets.validate()?;
        self.state_store.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Remote global IP service configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// SoftLayer REST API
    Softlayer {
        /// API username
        username: String,
        /// API key
        api_key: String,
        /// REST endpoint (defaults to the public SoftLayer endpoint)
        #[serde(default)]
        endpoint: Option<String>,
        /// How long to wait for an ordered global IP to be provisioned
        #[serde(default)]
        provisioning_timeout_secs: Option<u64>,
    },

    /// Custom service
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Softlayer {
                username, api_key, ..
            } => {
                if username.is_empty() {
                    return Err(crate::Error::config("SoftLayer username cannot be empty"));
                }
                if api_key.is_empty() {
                    return Err(crate::Error::config("SoftLayer API key cannot be empty"));
                }
                Ok(())
            }
            ProviderConfig::Custom { factory, config } => {
                validate_custom("provider", factory, config)
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Softlayer { .. } => "softlayer",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Softlayer {
            username: String::new(),
            api_key: String::new(),
            endpoint: None,
            provisioning_timeout_secs: None,
        }
    }
}

// Credentials never reach logs
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderConfig::Softlayer {
                username,
                endpoint,
                provisioning_timeout_secs,
                ..
            } => f
                .debug_struct("Softlayer")
                .field("username", username)
                .field("api_key", &"<REDACTED>")
                .field("endpoint", endpoint)
                .field("provisioning_timeout_secs", provisioning_timeout_secs)
                .finish(),
            ProviderConfig::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .field("config", &"<REDACTED>")
                .finish(),
        }
    }
}

/// Target source configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetSourceConfig {
    /// Attributes are declared in the plan
    #[default]
    Static,

    /// Attributes are read from SoftLayer virtual guests (`external_ref` = guest id)
    SoftlayerVirtualGuest {
        /// API username
        username: String,
        /// API key
        api_key: String,
        /// REST endpoint (defaults to the public SoftLayer endpoint)
        #[serde(default)]
        endpoint: Option<String>,
    },

    /// Custom target source
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl TargetSourceConfig {
    /// Validate the target source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            TargetSourceConfig::Static => Ok(()),
            TargetSourceConfig::SoftlayerVirtualGuest {
                username, api_key, ..
            } => {
                if username.is_empty() || api_key.is_empty() {
                    return Err(crate::Error::config(
                        "SoftLayer virtual guest source requires username and API key",
                    ));
                }
                Ok(())
            }
            TargetSourceConfig::Custom { factory, config } => {
                validate_custom("target source", factory, config)
            }
        }
    }

    /// Get the target source type name
    pub fn type_name(&self) -> &str {
        match self {
            TargetSourceConfig::Static => "static",
            TargetSourceConfig::SoftlayerVirtualGuest { .. } => "softlayer_virtual_guest",
            TargetSourceConfig::Custom { factory, .. } => factory,
        }
    }
}

impl fmt::Debug for TargetSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSourceConfig::Static => f.write_str("Static"),
            TargetSourceConfig::SoftlayerVirtualGuest {
                username, endpoint, ..
            } => f
                .debug_struct("SoftlayerVirtualGuest")
                .field("username", username)
                .field("api_key", &"<REDACTED>")
                .field("endpoint", endpoint)
                .finish(),
            TargetSourceConfig::Custom { factory, .. } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .field("config", &"<REDACTED>")
                .finish(),
        }
    }
}

/// State store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    #[default]
    Memory,

    /// Custom state store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl StateStoreConfig {
    /// Validate the state store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StateStoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("State file path cannot be empty"))
            }
            StateStoreConfig::Custom { factory, config } => {
                validate_custom("state store", factory, config)
            }
            _ => Ok(()),
        }
    }

    /// Get the state store type name
    pub fn type_name(&self) -> &str {
        match self {
            StateStoreConfig::File { .. } => "file",
            StateStoreConfig::Memory => "memory",
            StateStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

fn validate_custom(
    what: &str,
    factory: &str,
    config: &serde_json::Value,
) -> Result<(), crate::Error> {
    if factory.is_empty() {
        return Err(crate::Error::config(format!(
            "Custom {what} factory cannot be empty"
        )));
    }
    if config.is_null() {
        return Err(crate::Error::config(format!(
            "Custom {what} config cannot be null"
        )));
    }
    Ok(())
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of retries for transient transport failures
    ///
    /// Set to 0 to make every remote call single-attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Delay before the first retry (in milliseconds); doubles per attempt
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single retry delay (in milliseconds)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Capacity of the reconcile event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(crate::Error::config(
                "Maximum retry delay cannot be shorter than the base delay",
            ));
        }
        Ok(())
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32) as u32).unwrap_or(u64::MAX);
        let delay = self
            .retry_base_delay_ms
            .saturating_mul(factor)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_event_channel_capacity() -> usize {
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let engine = EngineConfig {
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1_000,
            ..EngineConfig::default()
        };

        assert_eq!(engine.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(engine.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(engine.backoff_delay(3), Duration::from_millis(800));
        assert_eq!(engine.backoff_delay(4), Duration::from_millis(1_000));
        assert_eq!(engine.backoff_delay(200), Duration::from_millis(1_000));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: GlobalIpConfig = serde_json::from_str(
            r#"{
                "provider": { "type": "softlayer", "username": "sluser", "api_key": "k" },
                "state_store": { "type": "file", "path": "/var/lib/globalip/state.json" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.provider.type_name(), "softlayer");
        assert_eq!(config.targets.type_name(), "static");
        assert_eq!(config.state_store.type_name(), "file");
        assert_eq!(config.engine.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_credentials_are_rejected() {
        assert!(ProviderConfig::default().validate().is_err());
        assert!(
            StateStoreConfig::File {
                path: String::new()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn api_key_not_exposed_in_debug() {
        let config = ProviderConfig::Softlayer {
            username: "sluser".to_string(),
            api_key: "secret_key_12345".to_string(),
            endpoint: None,
            provisioning_timeout_secs: None,
        };
        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("secret_key_12345"));
        assert!(debug_str.contains("sluser"));
    }
}
