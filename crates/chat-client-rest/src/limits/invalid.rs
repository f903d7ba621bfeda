//! Invalid-request circuit breaker
//!
//! The service bans clients that keep producing 401/403/429 responses.
//! A process-wide counter over a ten-minute window drives escalating
//! cooldowns well before the server-side threshold.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Counter roll-over window
const WINDOW_MS: i64 = 10 * 60 * 1_000;

/// Escalating cooldown tiers, checked highest first
const COOLDOWN_TIERS: [(u64, u64); 3] = [(9_000, 5_000), (5_000, 1_500), (2_500, 500)];

#[derive(Debug)]
struct Window {
    count: u64,
    reset_at_ms: i64,
}

/// Process-wide invalid-request counter
///
/// All clients in the process share the server's tolerance, so the
/// counter is deliberately a singleton (see [`InvalidRequestTracker::global`]).
#[derive(Debug)]
pub struct InvalidRequestTracker {
    window: Mutex<Window>,
}

static GLOBAL_TRACKER: OnceLock<InvalidRequestTracker> = OnceLock::new();

impl InvalidRequestTracker {
    fn new() -> Self {
        Self {
            window: Mutex::new(Window {
                count: 0,
                reset_at_ms: 0,
            }),
        }
    }

    /// The process-wide tracker instance
    pub fn global() -> &'static Self {
        GLOBAL_TRACKER.get_or_init(Self::new)
    }

    /// Record one invalid request, returning the count in this window
    pub fn record(&self, now_ms: i64) -> u64 {
        let mut window = self.window.lock().expect("invalid counter poisoned");
        if now_ms >= window.reset_at_ms {
            window.count = 0;
            window.reset_at_ms = now_ms + WINDOW_MS;
        }
        window.count += 1;
        window.count
    }

    /// Current count in this window
    #[must_use]
    pub fn count(&self, now_ms: i64) -> u64 {
        let window = self.window.lock().expect("invalid counter poisoned");
        if now_ms >= window.reset_at_ms {
            0
        } else {
            window.count
        }
    }

    /// Milliseconds until the window rolls over
    #[must_use]
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        let window = self.window.lock().expect("invalid counter poisoned");
        (window.reset_at_ms - now_ms).max(0)
    }

    /// Circuit-breaker cooldown for the given count, if any tier applies
    #[must_use]
    pub fn cooldown(count: u64) -> Option<Duration> {
        COOLDOWN_TIERS
            .iter()
            .find(|(threshold, _)| count >= *threshold)
            .map(|(_, sleep_ms)| Duration::from_millis(*sleep_ms))
    }

    /// Reset the counter so test runs are deterministic
    #[doc(hidden)]
    pub fn reset_for_tests(&self) {
        let mut window = self.window.lock().expect("invalid counter poisoned");
        window.count = 0;
        window.reset_at_ms = 0;
    }
}
