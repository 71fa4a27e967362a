// # Target Source Trait
//
// Target resources (typically compute instances) are reconciled by their own
// loop. The orchestrator only needs to know when such a resource has
// finished its apply for the cycle and what attributes it produced.

use crate::model::TargetSpec;
use async_trait::async_trait;
use std::collections::HashMap;

/// Trait for target source implementations
///
/// `converge` is called at most once per target per apply cycle, after every
/// resource the target depends on. The returned attributes become visible to
/// bindings in the same cycle.
#[async_trait]
pub trait TargetSource: Send + Sync {
    /// Converge a target and report its attributes
    ///
    /// # Returns
    ///
    /// - `Ok(attributes)`: e.g. `ipv4_address`, `ipv6_address`
    /// - `Err(Error)`: the target failed; bindings referencing it will fail
    ///   with `UnresolvedDependency` for this cycle
    async fn converge(&self, target: &TargetSpec) -> Result<HashMap<String, String>, crate::Error>;

    /// Source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}

/// Target source that reports the attributes declared in the plan
#[derive(Debug, Clone, Default)]
pub struct StaticTargetSource;

#[async_trait]
impl TargetSource for StaticTargetSource {
    async fn converge(&self, target: &TargetSpec) -> Result<HashMap<String, String>, crate::Error> {
        Ok(target.attributes.clone())
    }

    fn source_name(&self) -> &'static str {
        "static"
    }
}

/// Helper trait for constructing target sources from configuration
pub trait TargetSourceFactory: Send + Sync {
    /// Create a TargetSource instance from configuration
    fn create(
        &self,
        config: &crate::config::TargetSourceConfig,
    ) -> Result<Box<dyn TargetSource>, crate::Error>;
}

/// Factory for [`StaticTargetSource`]
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticTargetSourceFactory;

impl TargetSourceFactory for StaticTargetSourceFactory {
    fn create(
        &self,
        _config: &crate::config::TargetSourceConfig,
    ) -> Result<Box<dyn TargetSource>, crate::Error> {
        Ok(Box::new(StaticTargetSource))
    }
}
