pub mod adapters;
pub mod bridge;
pub mod config;
pub mod drain;
pub mod error;
pub mod handles;
pub mod helpers;
pub mod host;
pub mod inbound;
pub mod inspector;
pub mod monitor;
pub mod network_core;
pub mod port;
pub mod registry;
pub mod resolver;
pub mod runtime;

#[cfg(any(test, feature = "test_features"))]
pub mod mocks;

#[cfg(test)]
mod tests;

pub use bridge::{PortSession, WishBridge};
pub use config::BridgeConfig;
pub use error::{BridgeError, ConfigError, HostError, PortError};
pub use host::PortHost;
pub use network_core::{CoreSignal, Endpoint, NetworkCore};
pub use port::CorePort;
