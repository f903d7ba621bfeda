//! Reconnection backoff
//!
//! Full-jitter exponential backoff: `delay = random(0, min(cap, base * 2^attempt))`.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff calculator with full jitter
#[derive(Debug)]
pub(crate) struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    /// Compute the next delay and advance the attempt counter
    pub(crate) fn next_delay(&mut self) -> Duration {
        let exp = self
            .base_ms
            .saturating_mul(1u64.checked_shl(self.attempt).unwrap_or(u64::MAX));
        let capped = exp.min(self.max_ms);
        let jittered = if capped == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=capped)
        };
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(jittered)
    }

    /// Reset after a successful handshake
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delay_bounded_by_base() {
        let mut b = Backoff::new(1000, 60_000);
        for _ in 0..50 {
            b.reset();
            assert!(b.next_delay() <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let mut b = Backoff::new(1000, 5000);
        for _ in 0..20 {
            assert!(b.next_delay() <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_reset_restarts_growth() {
        let mut b = Backoff::new(1000, 60_000);
        for _ in 0..5 {
            let _ = b.next_delay();
        }
        assert_eq!(b.attempt, 5);
        b.reset();
        assert_eq!(b.attempt, 0);
    }

    #[test]
    fn test_zero_base_is_zero_delay() {
        let mut b = Backoff::new(0, 0);
        assert_eq!(b.next_delay(), Duration::ZERO);
    }
}
