//! Retry backoff for 429 and 5xx responses
//!
//! Exponential with a capped exponent and up to 20 % uniform jitter on
//! top of the computed delay.

use rand::Rng;
use std::time::Duration;

/// 429 retries: base 125 ms, capped at 1.5 s before jitter
const BACKOFF_429_BASE_MS: u64 = 125;
const BACKOFF_429_CAP_MS: u64 = 1_500;

/// 5xx retries: base 200 ms, capped at 3 s before jitter
const BACKOFF_5XX_BASE_MS: u64 = 200;
const BACKOFF_5XX_CAP_MS: u64 = 3_000;

/// Exponent saturates after this many retries
const MAX_EXPONENT: u32 = 5;

fn backoff(base_ms: u64, cap_ms: u64, retries: u32) -> Duration {
    let exponent = retries.min(MAX_EXPONENT);
    let delay = base_ms
        .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX))
        .min(cap_ms);
    let jitter = if delay == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=delay / 5)
    };
    Duration::from_millis(delay + jitter)
}

/// Delay before retrying a 429
#[must_use]
pub fn backoff_429(retries: u32) -> Duration {
    backoff(BACKOFF_429_BASE_MS, BACKOFF_429_CAP_MS, retries)
}

/// Delay before retrying a 5xx
#[must_use]
pub fn backoff_5xx(retries: u32) -> Duration {
    backoff(BACKOFF_5XX_BASE_MS, BACKOFF_5XX_CAP_MS, retries)
}
