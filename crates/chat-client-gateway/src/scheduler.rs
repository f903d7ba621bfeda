//! Priority send scheduler
//!
//! Paces outbound gateway frames to at most `capacity` sends per sliding
//! `window_ms` with a token bucket, preferring important frames
//! (heartbeat, identify, resume, voice state) without starving normal
//! traffic.
//!
//! The scheduler is a synchronous state machine; the shard driver pumps
//! it and arms a single wakeup timer whenever work remains but no token
//! is available.

use crate::queue::RingQueue;
use chat_client_common::SchedulerConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Token-bucket scheduler with a two-class priority queue
#[derive(Debug)]
pub struct SendScheduler<T> {
    tokens: f64,
    capacity: u32,
    window_ms: u64,
    important_burst: u32,
    important: RingQueue<T>,
    normal: RingQueue<T>,
    important_streak: u32,
    last_refill: Instant,
}

impl<T> SendScheduler<T> {
    /// Create a scheduler with a full token bucket
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            tokens: f64::from(config.capacity),
            capacity: config.capacity,
            window_ms: config.window_ms.max(1),
            important_burst: config.important_burst,
            important: RingQueue::new(),
            normal: RingQueue::new(),
            important_streak: 0,
            last_refill: Instant::now(),
        }
    }

    /// Tokens regenerated per millisecond
    fn rate_per_ms(&self) -> f64 {
        f64::from(self.capacity) / self.window_ms as f64
    }

    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_secs_f64() * 1000.0;
        self.tokens = (self.tokens + elapsed_ms * self.rate_per_ms()).min(f64::from(self.capacity));
        self.last_refill = now;
    }

    /// Queue a frame for dispatch
    ///
    /// Important frames go to the front of the important queue so that
    /// critical frames precede earlier-queued normal traffic; normal
    /// frames append to the back of the normal queue.
    pub fn enqueue(&mut self, frame: T, important: bool) {
        if important {
            self.important.push_front(frame);
        } else {
            self.normal.push_back(frame);
        }
    }

    /// Take the next frame eligible for dispatch, consuming one token
    ///
    /// Returns `None` when both queues are empty or no whole token is
    /// available; in the latter case [`Self::wakeup_after`] gives the
    /// delay until the next token.
    pub fn next_frame(&mut self, now: Instant) -> Option<T> {
        self.refill(now);
        if self.tokens < 1.0 {
            return None;
        }

        let frame = match (self.important.is_empty(), self.normal.is_empty()) {
            (true, true) => return None,
            (false, true) => self.important.pop_front(),
            (true, false) => {
                self.important_streak = 0;
                self.normal.pop_front()
            }
            (false, false) => {
                if self.important_streak < self.important_burst {
                    self.important_streak += 1;
                    self.important.pop_front()
                } else {
                    self.important_streak = 0;
                    self.normal.pop_front()
                }
            }
        };

        self.tokens -= 1.0;
        frame
    }

    /// Delay until the next whole token, when work is pending
    ///
    /// Returns `None` when the queues are empty or a token is already
    /// available (the caller should pump again instead of sleeping).
    #[must_use]
    pub fn wakeup_after(&self, _now: Instant) -> Option<Duration> {
        if self.is_empty() || self.tokens >= 1.0 {
            return None;
        }
        let ms = ((1.0 - self.tokens) / self.rate_per_ms()).ceil();
        Some(Duration::from_millis(ms as u64))
    }

    /// Number of queued frames across both classes
    #[must_use]
    pub fn len(&self) -> usize {
        self.important.len() + self.normal.len()
    }

    /// Check whether any frame is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.important.is_empty() && self.normal.is_empty()
    }

    /// Drop all queued frames and restore the full token budget
    pub fn clear(&mut self) {
        self.important.clear();
        self.normal.clear();
        self.tokens = f64::from(self.capacity);
        self.important_streak = 0;
        self.last_refill = Instant::now();
    }
}
