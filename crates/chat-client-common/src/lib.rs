//! # chat-client-common
//!
//! Shared configuration, client identification properties, and telemetry
//! for the chat client crates.

pub mod config;
pub mod properties;
pub mod telemetry;

pub use config::{
    ClientConfig, ConfigError, GatewayConfig, ProxyConfig, RestConfig, SchedulerConfig,
};
pub use properties::ClientProperties;
