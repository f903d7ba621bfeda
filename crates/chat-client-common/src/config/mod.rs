//! Configuration module

mod client_config;

pub use client_config::{
    ClientConfig, ConfigError, GatewayConfig, ProxyConfig, RestConfig, SchedulerConfig,
};
