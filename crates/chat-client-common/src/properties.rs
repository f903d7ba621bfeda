//! Client identification properties
//!
//! The same property set feeds the gateway IDENTIFY payload and the REST
//! `X-Super-Properties` header.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Identifies the client build to the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
    #[serde(default = "default_locale")]
    pub system_locale: String,
    #[serde(default = "default_user_agent")]
    pub browser_user_agent: String,
    #[serde(default)]
    pub browser_version: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub client_build_number: u64,
    #[serde(default)]
    pub release_channel: String,
    /// Installation id attached as `X-Debug-Options` peer header when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_launch_id: Option<String>,
    /// IANA timezone attached as `X-Discord-Timezone` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            os: "Windows".to_string(),
            browser: "Chrome".to_string(),
            device: String::new(),
            system_locale: default_locale(),
            browser_user_agent: default_user_agent(),
            browser_version: String::new(),
            os_version: "10".to_string(),
            client_build_number: 0,
            release_channel: "stable".to_string(),
            client_launch_id: None,
            timezone: None,
        }
    }
}

impl ClientProperties {
    /// Platform label derived from the OS name, as the service expects it
    /// in browser-like headers
    #[must_use]
    pub fn platform_label(&self) -> &'static str {
        match self.os.to_ascii_lowercase().as_str() {
            "windows" => "\"Windows\"",
            "macos" | "mac os" | "osx" | "darwin" => "\"macOS\"",
            "linux" => "\"Linux\"",
            "android" => "\"Android\"",
            "ios" => "\"iOS\"",
            _ => "\"Unknown\"",
        }
    }

    /// Infer the browser major version from the user agent
    ///
    /// Returns `None` when the UA carries no recognizable `Chrome/{n}` or
    /// `Firefox/{n}` token.
    #[must_use]
    pub fn browser_major_version(&self) -> Option<u32> {
        let ua = &self.browser_user_agent;
        for marker in ["Chrome/", "Firefox/"] {
            if let Some(idx) = ua.find(marker) {
                let rest = &ua[idx + marker.len()..];
                let major: String = rest.chars().take_while(char::is_ascii_digit).collect();
                if let Ok(v) = major.parse() {
                    return Some(v);
                }
            }
        }
        None
    }

    /// Serialize to the base64 JSON blob sent as `X-Super-Properties`
    ///
    /// # Errors
    /// Returns an error if serialization fails (never for well-formed
    /// properties).
    pub fn to_super_properties(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(BASE64.encode(json))
    }
}
