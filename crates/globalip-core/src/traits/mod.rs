//! Core traits for the global IP system
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`GlobalIpService`]: Remote create/read/route/delete of global IPs
//! - [`TargetSource`]: Attributes of target resources after their apply
//! - [`StateStore`]: Persisted binding state

pub mod global_ip_service;
pub mod state_store;
pub mod target_source;

pub use global_ip_service::{GlobalIpService, GlobalIpServiceFactory};
pub use state_store::{StateStore, StateStoreFactory};
pub use target_source::{
    StaticTargetSource, StaticTargetSourceFactory, TargetSource, TargetSourceFactory,
};
