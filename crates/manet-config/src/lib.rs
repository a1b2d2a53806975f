//! # manet-config
//!
//! Configuration for the manet simulator. Reads from `manet.toml`, environment
//! variables, and CLI overrides, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::ManetConfig;
pub use schema::{
    ConfigWarning, DevicesConfig, GridBounds, LoggingConfig, NetworkConfig, RegistryConfig,
    WarningSeverity,
};
