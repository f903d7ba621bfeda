//! Rate-limit header extraction
//!
//! The server describes bucket state in `x-ratelimit-*` headers. The
//! reset moment is computed monotonically from `reset-after` when
//! available; the absolute `reset` fallback is corrected by the skew
//! between the server's `date` header and the local clock.

use chrono::DateTime;
use reqwest::header::HeaderMap;

/// Extra pad on reaction routes when only the absolute reset is known;
/// the server coalesces reaction windows slightly later than advertised
const REACTIONS_RESET_PAD_MS: i64 = 250;

/// Scope qualifier of a 429 response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    /// Per-user bucket limit
    User,
    /// Limit shared across users (not this client's fault)
    Shared,
    /// Account-wide global limit
    Global,
}

impl RateLimitScope {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "shared" => Some(Self::Shared),
            "global" => Some(Self::Global),
            _ => None,
        }
    }
}

/// Parsed rate-limit view of one response
#[derive(Debug, Clone, Default)]
pub struct RateLimitHeaders {
    /// Server-assigned bucket hash
    pub bucket: Option<String>,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Absolute reset, unix seconds
    pub reset: Option<f64>,
    /// Relative reset, seconds
    pub reset_after: Option<f64>,
    /// 429 retry delay, seconds
    pub retry_after: Option<f64>,
    pub scope: Option<RateLimitScope>,
    /// `x-ratelimit-global` presence flag
    pub global: bool,
    /// Server clock from the `date` header, unix milliseconds
    pub server_date_ms: Option<i64>,
}

impl RateLimitHeaders {
    /// Extract the rate-limit headers from a response
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let number = |name: &str| text(name).and_then(|v| v.parse::<f64>().ok());

        Self {
            bucket: text("x-ratelimit-bucket"),
            limit: number("x-ratelimit-limit").map(|v| v as u32),
            remaining: number("x-ratelimit-remaining").map(|v| v as u32),
            reset: number("x-ratelimit-reset"),
            reset_after: number("x-ratelimit-reset-after"),
            retry_after: number("retry-after"),
            scope: text("x-ratelimit-scope")
                .as_deref()
                .and_then(RateLimitScope::parse),
            global: headers.contains_key("x-ratelimit-global"),
            server_date_ms: text("date")
                .and_then(|d| DateTime::parse_from_rfc2822(&d).ok())
                .map(|d| d.timestamp_millis()),
        }
    }

    /// Whether the 429 is scoped to the shared class
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.scope == Some(RateLimitScope::Shared)
    }

    /// Whether the response flags the account-wide global limit
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.global || self.scope == Some(RateLimitScope::Global)
    }
}

/// Compute the absolute reset moment for a bucket, in local unix ms
///
/// Prefers the monotonic `reset-after`; falls back to the absolute
/// `reset` corrected for server/client clock skew. Reaction routes get
/// [`REACTIONS_RESET_PAD_MS`] on the fallback path.
#[must_use]
pub fn compute_reset_at(
    headers: &RateLimitHeaders,
    now_ms: i64,
    route_has_reactions: bool,
) -> Option<i64> {
    if let Some(reset_after) = headers.reset_after {
        return Some(now_ms + (reset_after * 1000.0) as i64);
    }

    let reset = headers.reset?;
    let reset_ms = (reset * 1000.0) as i64;
    let skew = headers.server_date_ms.map_or(0, |server| server - now_ms);
    let mut at = reset_ms - skew;
    if route_has_reactions {
        at += REACTIONS_RESET_PAD_MS;
    }
    Some(at)
}
