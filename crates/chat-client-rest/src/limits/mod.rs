//! Rate-limit coordination
//!
//! Translates response headers into handler/global state, decides when a
//! request must wait, and computes retry backoff.

mod backoff;
mod global;
mod headers;
mod invalid;

pub use backoff::{backoff_429, backoff_5xx};
pub use global::GlobalState;
pub use headers::{compute_reset_at, RateLimitHeaders, RateLimitScope};
pub use invalid::InvalidRequestTracker;

/// Current unix time in milliseconds
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
