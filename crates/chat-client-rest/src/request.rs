//! Request construction
//!
//! Assembles the browser-like header set, encodes the body (JSON or
//! multipart), and applies the configured timeout.

use crate::error::RestError;
use crate::routes::Route;
use crate::solver::CaptchaSolution;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chat_client_common::ClientConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// A file to upload as one multipart part
#[derive(Debug, Clone)]
pub struct FileAttachment {
    /// Part name; defaults to `files[{index}]`
    pub key: Option<String>,
    pub name: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// Per-request options
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Query parameters; array values repeat the key
    pub query: Option<Value>,
    /// JSON body (or form fields when `dont_use_payload_json` is set)
    pub data: Option<Value>,
    pub files: Vec<FileAttachment>,
    /// Caller header overrides
    pub headers: HashMap<String, String>,
    /// Audit-log reason, percent-encoded into its header
    pub reason: Option<String>,
    /// Attach the Authorization header (default true)
    pub auth: bool,
    /// Prefix the path with `/v{n}` (default true)
    pub versioned: bool,
    /// Webhook call: skips auth and global rate-limit accounting
    pub webhook: bool,
    /// Context object sent base64-encoded as `X-Context-Properties`
    pub context: Option<Value>,
    /// Pre-acquired MFA token
    pub mfa_token: Option<String>,
    /// Force `payload_json` for multipart data
    pub use_payload_json: bool,
    /// Send data as individual form fields instead of `payload_json`
    pub dont_use_payload_json: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            query: None,
            data: None,
            files: Vec::new(),
            headers: HashMap::new(),
            reason: None,
            auth: true,
            versioned: true,
            webhook: false,
            context: None,
            mfa_token: None,
            use_payload_json: false,
            dont_use_payload_json: false,
        }
    }
}

/// A parsed response body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Bytes(Vec<u8>),
    Empty,
}

impl ResponseBody {
    /// The JSON value, when the response carried one
    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Headers earned during the retry loop (captcha, second factor)
#[derive(Debug, Clone, Default)]
pub(crate) struct AttemptState {
    pub captcha: Option<CaptchaSolution>,
    pub mfa_authorization: Option<String>,
}

/// Build the full request URL
pub(crate) fn build_url(config: &ClientConfig, route: &Route, options: &RequestOptions) -> String {
    let base = config.rest.api_url.trim_end_matches('/');
    match (options.versioned, config.rest.version) {
        (true, Some(version)) => format!("{base}/v{version}{}", route.path()),
        _ => format!("{base}{}", route.path()),
    }
}

/// Flatten a query object into key/value pairs, repeating arrays
pub(crate) fn query_pairs(query: &Value) -> Vec<(String, String)> {
    let Some(object) = query.as_object() else {
        return Vec::new();
    };
    let mut pairs = Vec::new();
    for (key, value) in object {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), scalar_to_string(item)));
                }
            }
            other => pairs.push((key.clone(), scalar_to_string(other))),
        }
    }
    pairs
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Assemble the header set for one attempt
pub(crate) fn build_headers(
    config: &ClientConfig,
    options: &RequestOptions,
    auth_token: &str,
    super_properties: &str,
    attempt: &AttemptState,
) -> Result<HeaderMap, RestError> {
    let mut headers = HeaderMap::new();
    let mut insert = |name: &str, value: &str| -> Result<(), RestError> {
        let name = name
            .parse::<HeaderName>()
            .map_err(|e| RestError::Build(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RestError::Build(format!("invalid header value: {e}")))?;
        headers.insert(name, value);
        Ok(())
    };

    let properties = &config.properties;

    // Browser-like base set derived from the client properties.
    if let Some(major) = properties.browser_major_version() {
        insert(
            "sec-ch-ua",
            &format!("\"Not)A;Brand\";v=\"99\", \"Chromium\";v=\"{major}\""),
        )?;
        insert("sec-ch-ua-mobile", "?0")?;
        insert("sec-ch-ua-platform", properties.platform_label())?;
    }
    insert("X-Discord-Locale", &properties.system_locale)?;
    if let Some(timezone) = &properties.timezone {
        insert("X-Discord-Timezone", timezone)?;
    }
    if let Some(launch_id) = &properties.client_launch_id {
        insert("X-Client-Launch-Id", launch_id)?;
    }
    insert("X-Super-Properties", super_properties)?;
    insert("User-Agent", &properties.browser_user_agent)?;

    // Configured headers, then caller overrides.
    for (name, value) in &config.rest.headers {
        insert(name, value)?;
    }
    for (name, value) in &options.headers {
        insert(name, value)?;
    }

    if let Some(reason) = &options.reason {
        insert("X-Audit-Log-Reason", &urlencoding::encode(reason))?;
    }
    if let Some(context) = &options.context {
        let encoded = BASE64.encode(context.to_string());
        insert("X-Context-Properties", &encoded)?;
    }
    if options.auth && !options.webhook {
        insert("Authorization", auth_token)?;
    }

    if let Some(mfa) = attempt
        .mfa_authorization
        .as_deref()
        .or(options.mfa_token.as_deref())
    {
        insert("X-Discord-Mfa-Authorization", mfa)?;
    }
    if let Some(captcha) = &attempt.captcha {
        insert("X-Captcha-Key", &captcha.key)?;
        if let Some(rqtoken) = &captcha.rqtoken {
            insert("X-Captcha-Rqtoken", rqtoken)?;
        }
    }

    Ok(headers)
}

/// Build one ready-to-send request
///
/// Multipart bodies cannot be reused across attempts, so the handler
/// rebuilds the request per attempt from the same options.
pub(crate) fn build_request(
    http: &reqwest::Client,
    config: &ClientConfig,
    method: &Method,
    route: &Route,
    options: &RequestOptions,
    auth_token: &str,
    super_properties: &str,
    attempt: &AttemptState,
) -> Result<reqwest::RequestBuilder, RestError> {
    let url = build_url(config, route, options);
    let mut request = http
        .request(method.clone(), url)
        .headers(build_headers(config, options, auth_token, super_properties, attempt)?)
        .timeout(Duration::from_millis(config.rest.request_timeout_ms));

    if let Some(query) = &options.query {
        let pairs = query_pairs(query);
        if !pairs.is_empty() {
            request = request.query(&pairs);
        }
    }

    if !options.files.is_empty() {
        let mut form = Form::new();
        for (index, file) in options.files.iter().enumerate() {
            let key = file
                .key
                .clone()
                .unwrap_or_else(|| format!("files[{index}]"));
            let mut part = Part::bytes(file.data.clone()).file_name(file.name.clone());
            if let Some(content_type) = &file.content_type {
                part = part
                    .mime_str(content_type)
                    .map_err(|e| RestError::Build(format!("invalid content type: {e}")))?;
            }
            form = form.part(key, part);
        }
        if let Some(data) = &options.data {
            if options.dont_use_payload_json && !options.use_payload_json {
                if let Some(fields) = data.as_object() {
                    for (key, value) in fields {
                        form = form.text(key.clone(), scalar_to_string(value));
                    }
                }
            } else {
                form = form.text("payload_json", data.to_string());
            }
        }
        request = request.multipart(form);
    } else if let Some(data) = &options.data {
        request = request.json(data);
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ClientConfig {
        ClientConfig::new("the-token")
    }

    #[test]
    fn test_build_url_versioned() {
        let config = config();
        let route = Route::from_path("/users/@me");
        let options = RequestOptions::default();
        assert_eq!(
            build_url(&config, &route, &options),
            "https://discord.com/api/v9/users/@me"
        );
    }

    #[test]
    fn test_build_url_unversioned() {
        let config = config();
        let route = Route::from_path("/users/@me");
        let options = RequestOptions {
            versioned: false,
            ..RequestOptions::default()
        };
        assert_eq!(
            build_url(&config, &route, &options),
            "https://discord.com/api/users/@me"
        );
    }

    #[test]
    fn test_query_pairs_repeats_arrays() {
        let query = json!({
            "limit": 50,
            "ids": ["1", "2", "3"],
            "around": "777",
            "skip": null,
        });
        let mut pairs = query_pairs(&query);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("around".to_string(), "777".to_string()),
                ("ids".to_string(), "1".to_string()),
                ("ids".to_string(), "2".to_string()),
                ("ids".to_string(), "3".to_string()),
                ("limit".to_string(), "50".to_string()),
            ]
        );
    }

    #[test]
    fn test_headers_carry_identity_and_auth() {
        let config = config();
        let options = RequestOptions::default();
        let headers = build_headers(
            &config,
            &options,
            "the-token",
            "c3VwZXI=",
            &AttemptState::default(),
        )
        .unwrap();

        assert_eq!(headers.get("Authorization").unwrap(), "the-token");
        assert_eq!(headers.get("X-Super-Properties").unwrap(), "c3VwZXI=");
        assert_eq!(headers.get("X-Discord-Locale").unwrap(), "en-US");
        assert!(headers.get("User-Agent").is_some());
        // Default UA is Chrome 124.
        assert!(headers
            .get("sec-ch-ua")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("124"));
    }

    #[test]
    fn test_no_auth_for_webhook_or_unauthenticated() {
        let config = config();
        for options in [
            RequestOptions {
                auth: false,
                ..RequestOptions::default()
            },
            RequestOptions {
                webhook: true,
                ..RequestOptions::default()
            },
        ] {
            let headers = build_headers(
                &config,
                &options,
                "the-token",
                "x",
                &AttemptState::default(),
            )
            .unwrap();
            assert!(headers.get("Authorization").is_none());
        }
    }

    #[test]
    fn test_audit_reason_is_percent_encoded() {
        let config = config();
        let options = RequestOptions {
            reason: Some("spam & abuse".to_string()),
            ..RequestOptions::default()
        };
        let headers =
            build_headers(&config, &options, "t", "x", &AttemptState::default()).unwrap();
        assert_eq!(
            headers.get("X-Audit-Log-Reason").unwrap(),
            "spam%20%26%20abuse"
        );
    }

    #[test]
    fn test_context_properties_are_base64_json() {
        let config = config();
        let options = RequestOptions {
            context: Some(json!({"location": "Invite"})),
            ..RequestOptions::default()
        };
        let headers =
            build_headers(&config, &options, "t", "x", &AttemptState::default()).unwrap();
        let raw = headers.get("X-Context-Properties").unwrap().to_str().unwrap();
        let decoded = BASE64.decode(raw).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&decoded).unwrap(),
            json!({"location": "Invite"})
        );
    }

    #[test]
    fn test_caller_headers_override_configured() {
        let mut config = config();
        config
            .rest
            .headers
            .insert("X-Track".to_string(), "configured".to_string());
        let mut options = RequestOptions::default();
        options
            .headers
            .insert("X-Track".to_string(), "caller".to_string());

        let headers =
            build_headers(&config, &options, "t", "x", &AttemptState::default()).unwrap();
        assert_eq!(headers.get("X-Track").unwrap(), "caller");
    }

    #[test]
    fn test_captcha_and_mfa_headers() {
        let config = config();
        let options = RequestOptions::default();
        let attempt = AttemptState {
            captcha: Some(CaptchaSolution {
                key: "solved".to_string(),
                rqtoken: Some("rq".to_string()),
            }),
            mfa_authorization: Some("mfa-tok".to_string()),
        };
        let headers = build_headers(&config, &options, "t", "x", &attempt).unwrap();
        assert_eq!(headers.get("X-Captcha-Key").unwrap(), "solved");
        assert_eq!(headers.get("X-Captcha-Rqtoken").unwrap(), "rq");
        assert_eq!(headers.get("X-Discord-Mfa-Authorization").unwrap(), "mfa-tok");
    }

    #[test]
    fn test_response_body_into_json() {
        assert_eq!(
            ResponseBody::Json(json!({"a": 1})).into_json(),
            Some(json!({"a": 1}))
        );
        assert_eq!(ResponseBody::Empty.into_json(), None);
        assert_eq!(ResponseBody::Bytes(vec![1, 2]).into_json(), None);
    }
}
