//! Global rate-limit accounting
//!
//! One counter per client covering every non-webhook request, refreshed
//! over a one-second window. Concurrent requests that must wait for the
//! window share a single sleeper future, so N waiters arm exactly one
//! timer.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::Mutex;
use std::time::Duration;

/// Length of the global accounting window
const GLOBAL_WINDOW_MS: i64 = 1_000;

#[derive(Debug)]
struct Counters {
    remaining: i64,
    reset_at_ms: i64,
}

/// Client-wide global rate-limit state
pub struct GlobalState {
    limit: u32,
    counters: Mutex<Counters>,
    /// The coalesced delay future shared by concurrent waiters
    delay: Mutex<Option<Shared<BoxFuture<'static, ()>>>>,
}

impl GlobalState {
    /// Create with the configured requests-per-second budget
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            counters: Mutex::new(Counters {
                remaining: i64::from(limit),
                reset_at_ms: 0,
            }),
            delay: Mutex::new(None),
        }
    }

    /// The configured global limit
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Milliseconds a request must wait for the global window, if any
    ///
    /// A request may proceed when budget remains or the window expired.
    #[must_use]
    pub fn active_wait_ms(&self, now_ms: i64) -> Option<i64> {
        let counters = self.counters.lock().expect("global counters poisoned");
        (counters.remaining <= 0 && now_ms < counters.reset_at_ms)
            .then(|| counters.reset_at_ms - now_ms)
    }

    /// Account one request against the window, refreshing it if expired
    pub fn mark_used(&self, now_ms: i64) {
        let mut counters = self.counters.lock().expect("global counters poisoned");
        if counters.reset_at_ms < now_ms {
            counters.reset_at_ms = now_ms + GLOBAL_WINDOW_MS;
            counters.remaining = i64::from(self.limit);
        }
        counters.remaining -= 1;
    }

    /// Exhaust the window until the given moment (global 429)
    pub fn set_limited_until(&self, reset_at_ms: i64) {
        let mut counters = self.counters.lock().expect("global counters poisoned");
        counters.remaining = 0;
        counters.reset_at_ms = counters.reset_at_ms.max(reset_at_ms);
    }

    /// Wait out the global window, sharing one timer across waiters
    pub async fn wait(&self, duration: Duration) {
        let shared = {
            let mut delay = self.delay.lock().expect("global delay poisoned");
            match delay.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let fut = tokio::time::sleep(duration).boxed().shared();
                    *delay = Some(fut.clone());
                    fut
                }
            }
        };
        shared.await;
        // First waiter past the gate clears the slot for the next window.
        self.delay
            .lock()
            .expect("global delay poisoned")
            .take();
    }

    /// Whether a coalesced sleeper is currently armed
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.delay.lock().expect("global delay poisoned").is_some()
    }
}

impl std::fmt::Debug for GlobalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counters = self.counters.lock().expect("global counters poisoned");
        f.debug_struct("GlobalState")
            .field("limit", &self.limit)
            .field("remaining", &counters.remaining)
            .field("reset_at_ms", &counters.reset_at_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state_allows_requests() {
        let global = GlobalState::new(50);
        assert_eq!(global.active_wait_ms(1_000), None);
    }

    #[test]
    fn test_budget_exhaustion_and_window_refresh() {
        let global = GlobalState::new(2);
        let now = 10_000;

        global.mark_used(now);
        global.mark_used(now);
        assert_eq!(global.active_wait_ms(now), Some(GLOBAL_WINDOW_MS));
        assert_eq!(global.active_wait_ms(now + 400), Some(600));

        // Window expired: budget refreshes on next use.
        assert_eq!(global.active_wait_ms(now + GLOBAL_WINDOW_MS), None);
        global.mark_used(now + GLOBAL_WINDOW_MS + 1);
        assert_eq!(global.active_wait_ms(now + GLOBAL_WINDOW_MS + 1), None);
    }

    #[test]
    fn test_set_limited_until() {
        let global = GlobalState::new(50);
        global.set_limited_until(20_000);
        assert_eq!(global.active_wait_ms(18_000), Some(2_000));
        assert_eq!(global.active_wait_ms(20_000), None);
    }

    #[test]
    fn test_set_limited_never_shortens_window() {
        let global = GlobalState::new(50);
        global.set_limited_until(20_000);
        global.set_limited_until(15_000);
        assert_eq!(global.active_wait_ms(19_999), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_share_one_timer() {
        let global = std::sync::Arc::new(GlobalState::new(50));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let global = global.clone();
            tasks.push(tokio::spawn(async move {
                global.wait(Duration::from_millis(2_000)).await;
            }));
        }

        // Let every waiter reach the shared future.
        tokio::task::yield_now().await;
        assert!(global.is_sleeping());

        tokio::time::advance(Duration::from_millis(2_000)).await;
        for task in tasks {
            task.await.unwrap();
        }
        assert!(!global.is_sleeping());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_waiter_joins_existing_timer() {
        let global = std::sync::Arc::new(GlobalState::new(50));

        let first = {
            let global = global.clone();
            tokio::spawn(async move { global.wait(Duration::from_millis(1_000)).await })
        };
        tokio::task::yield_now().await;

        // A waiter arriving mid-window rides the same sleeper; both wake
        // when the original window ends.
        tokio::time::advance(Duration::from_millis(400)).await;
        let second = {
            let global = global.clone();
            tokio::spawn(async move { global.wait(Duration::from_millis(600)).await })
        };
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(600)).await;
        first.await.unwrap();
        second.await.unwrap();
    }
}
