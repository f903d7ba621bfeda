//! Client configuration structs
//!
//! Loads configuration from environment variables or is constructed
//! programmatically through the `Default` impls.

use crate::properties::ClientProperties;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

/// Top-level client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Authentication token sent in IDENTIFY and the `Authorization` header
    pub token: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub rest: RestConfig,
    #[serde(default)]
    pub properties: ClientProperties,
}

/// Gateway (WebSocket) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Gateway base URL (`wss://...`), without query parameters
    #[serde(default = "default_gateway_url")]
    pub url: String,
    /// Gateway protocol version, appended as `?v={n}`
    #[serde(default = "default_gateway_version")]
    pub version: u16,
    /// Payload encoding (`json`)
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Negotiate zlib-stream transport compression
    #[serde(default)]
    pub compress: bool,
    /// Gateway intents bitmask sent in IDENTIFY
    #[serde(default = "default_intents")]
    pub intents: u64,
    /// Outbound frame pacing
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Use the QoS heartbeat payload shape instead of the plain sequence
    #[serde(default)]
    pub use_qos_heartbeat: bool,
    /// How long after READY to wait for expected guilds before promoting
    /// the shard to Ready anyway
    #[serde(default = "default_wait_guild_timeout_ms")]
    pub wait_guild_timeout_ms: u64,
    /// Watchdog for a close frame after the client issues one
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// How long to wait for HELLO after the socket opens
    #[serde(default = "default_hello_timeout_ms")]
    pub hello_timeout_ms: u64,
}

/// Outbound send scheduler configuration
///
/// The gateway allows `capacity` sends per sliding `window_ms`; the
/// scheduler enforces that budget with a token bucket.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_capacity")]
    pub capacity: u32,
    #[serde(default = "default_scheduler_window_ms")]
    pub window_ms: u64,
    /// Consecutive important frames dispatched before a pending normal
    /// frame is served
    #[serde(default = "default_important_burst")]
    pub important_burst: u32,
}

/// REST pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    /// API base URL, without the `/v{n}` suffix
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// API version; `None` sends unversioned requests
    #[serde(default = "default_api_version")]
    pub version: Option<u16>,
    /// CDN base URL
    #[serde(default = "default_cdn_url")]
    pub cdn_url: String,
    /// Extra headers merged into every request (`User-Agent` lives here)
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Outbound proxy, if any
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// Requests allowed per one-second global window
    #[serde(default = "default_global_rate_limit")]
    pub global_rate_limit: u32,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Extra margin added to every computed rate-limit delay, in milliseconds
    #[serde(default)]
    pub time_offset_ms: u64,
    /// How often inactive handlers and orphan bucket bindings are swept
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Retries for network errors and 5xx responses
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Emit `INVALID_REQUEST_WARNING` every N invalid requests (0 = never)
    #[serde(default)]
    pub invalid_request_warning_interval: u32,
    /// Captcha solve attempts per request
    #[serde(default = "default_captcha_retry_limit")]
    pub captcha_retry_limit: u32,
    /// Base32 TOTP secret for the second-factor retry loop
    #[serde(default)]
    pub totp_key: Option<String>,
}

/// Outbound proxy configuration
///
/// Accepts a bare URI or a URI plus headers forwarded on CONNECT.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub uri: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ProxyConfig {
    /// Parse a proxy spec from a plain URI string
    #[must_use]
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: HashMap::new(),
        }
    }
}

// Default value functions

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_gateway_version() -> u16 {
    9
}

fn default_encoding() -> String {
    "json".to_string()
}

fn default_intents() -> u64 {
    0
}

fn default_wait_guild_timeout_ms() -> u64 {
    15_000
}

fn default_close_timeout_ms() -> u64 {
    5_000
}

fn default_hello_timeout_ms() -> u64 {
    20_000
}

fn default_scheduler_capacity() -> u32 {
    120
}

fn default_scheduler_window_ms() -> u64 {
    60_000
}

fn default_important_burst() -> u32 {
    2
}

fn default_api_url() -> String {
    "https://discord.com/api".to_string()
}

fn default_api_version() -> Option<u16> {
    Some(9)
}

fn default_cdn_url() -> String {
    "https://cdn.discordapp.com".to_string()
}

fn default_global_rate_limit() -> u32 {
    50
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_retry_limit() -> u32 {
    1
}

fn default_captcha_retry_limit() -> u32 {
    3
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            version: default_gateway_version(),
            encoding: default_encoding(),
            compress: false,
            intents: default_intents(),
            scheduler: SchedulerConfig::default(),
            use_qos_heartbeat: false,
            wait_guild_timeout_ms: default_wait_guild_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            hello_timeout_ms: default_hello_timeout_ms(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: default_scheduler_capacity(),
            window_ms: default_scheduler_window_ms(),
            important_burst: default_important_burst(),
        }
    }
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            version: default_api_version(),
            cdn_url: default_cdn_url(),
            headers: HashMap::new(),
            proxy: None,
            global_rate_limit: default_global_rate_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            time_offset_ms: 0,
            sweep_interval_ms: default_sweep_interval_ms(),
            retry_limit: default_retry_limit(),
            invalid_request_warning_interval: 0,
            captcha_retry_limit: default_captcha_retry_limit(),
            totp_key: None,
        }
    }
}

impl ClientConfig {
    /// Build a configuration with defaults for everything but the token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway: GatewayConfig::default(),
            rest: RestConfig::default(),
            properties: ClientProperties::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CHAT_TOKEN` is missing
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let mut config = Self::new(
            env::var("CHAT_TOKEN").map_err(|_| ConfigError::MissingVar("CHAT_TOKEN"))?,
        );

        if let Ok(url) = env::var("CHAT_GATEWAY_URL") {
            config.gateway.url = url;
        }
        if let Ok(url) = env::var("CHAT_API_URL") {
            config.rest.api_url = url;
        }
        if let Some(version) = env::var("CHAT_API_VERSION").ok().and_then(|s| s.parse().ok()) {
            config.rest.version = Some(version);
        }
        if let Some(intents) = env::var("CHAT_INTENTS").ok().and_then(|s| s.parse().ok()) {
            config.gateway.intents = intents;
        }
        if let Ok(uri) = env::var("CHAT_PROXY") {
            config.rest.proxy = Some(ProxyConfig::from_uri(uri));
        }
        if let Ok(key) = env::var("CHAT_TOTP_KEY") {
            config.rest.totp_key = Some(key);
        }

        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gateway_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.version, 9);
        assert_eq!(config.encoding, "json");
        assert!(!config.compress);
        assert_eq!(config.hello_timeout_ms, 20_000);
        assert_eq!(config.wait_guild_timeout_ms, 15_000);
    }

    #[test]
    fn test_default_scheduler_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.capacity, 120);
        assert_eq!(config.window_ms, 60_000);
        assert_eq!(config.important_burst, 2);
    }

    #[test]
    fn test_default_rest_config() {
        let config = RestConfig::default();
        assert_eq!(config.version, Some(9));
        assert_eq!(config.global_rate_limit, 50);
        assert_eq!(config.request_timeout_ms, 15_000);
        assert_eq!(config.retry_limit, 1);
        assert_eq!(config.captcha_retry_limit, 3);
        assert!(config.totp_key.is_none());
    }

    #[test]
    fn test_new_with_token() {
        let config = ClientConfig::new("tok-123");
        assert_eq!(config.token, "tok-123");
        assert_eq!(config.gateway.scheduler.capacity, 120);
    }

    #[test]
    fn test_proxy_from_uri() {
        let proxy = ProxyConfig::from_uri("socks5://127.0.0.1:9050");
        assert_eq!(proxy.uri, "socks5://127.0.0.1:9050");
        assert!(proxy.headers.is_empty());
    }
}
