//! Hermes core
//!
//! Shared identity and channel types, settler configuration, and the
//! application event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{HermesConfig, RetrySettings};
pub use error::CoreError;
pub use events::{
    AppEvent, EventBus, HermesPromiseEvent, NodeStatus, RegistrationEvent, ServiceState,
    ServiceStatusEvent,
};
pub use types::{Address, ChannelSnapshot, Identity, Promise, RegistrationStatus};
