//! REST error types
//!
//! Unified error surface for the request pipeline.

use serde_json::Value;

/// Errors returned by the REST pipeline
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The API answered with a structured error body
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Transport failure or a 5xx that exhausted its retries
    #[error(transparent)]
    Http(#[from] HttpError),

    /// A rate limit the caller elected to fail fast on
    #[error(transparent)]
    RateLimited(#[from] Box<RateLimitError>),

    /// The request could not be constructed
    #[error("Failed to build request: {0}")]
    Build(String),
}

/// A structured API error response (4xx with a JSON body)
#[derive(Debug, thiserror::Error)]
#[error("API error {status} on {method} {path}: {message}")]
pub struct ApiError {
    pub status: u16,
    /// Service-specific error code, when present
    pub code: Option<u64>,
    pub message: String,
    pub method: String,
    pub path: String,
    /// The raw error body for callers that need field-level details
    pub body: Value,
}

impl ApiError {
    /// Build from a response body, tolerating non-standard shapes
    #[must_use]
    pub fn from_body(body: Value, status: u16, method: &str, path: &str) -> Self {
        let code = body.get("code").and_then(Value::as_u64);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        Self {
            status,
            code,
            message,
            method: method.to_string(),
            path: path.to_string(),
            body,
        }
    }
}

/// Transport-level failure
#[derive(Debug, thiserror::Error)]
#[error("HTTP error on {method} {path}: {message}")]
pub struct HttpError {
    pub message: String,
    pub status: Option<u16>,
    pub method: String,
    pub path: String,
    #[source]
    pub source: Option<reqwest::Error>,
}

/// A rate limit surfaced to the caller instead of being waited out
#[derive(Debug, thiserror::Error)]
#[error("Rate limited on {method} {path} (route {route}), retry in {timeout_ms} ms")]
pub struct RateLimitError {
    pub timeout_ms: i64,
    pub limit: u32,
    pub method: String,
    pub path: String,
    pub route: String,
    pub global: bool,
}
