//! REST informational events
//!
//! The pipeline reports request lifecycle and rate-limit activity on a
//! broadcast channel, mirroring the gateway's event surface.

use tokio::sync::broadcast;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Details of an active rate limit about to be waited out
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// How long the request will wait, in milliseconds
    pub timeout_ms: i64,
    /// The limit of the constraining window
    pub limit: u32,
    pub method: String,
    pub path: String,
    pub route: String,
    /// True when the global limiter is the constraint
    pub global: bool,
}

/// Events the REST pipeline reports
#[derive(Debug, Clone)]
pub enum RestEvent {
    /// A request hit an active rate limit and is about to wait
    RateLimit(RateLimitInfo),
    /// A request is about to go out
    ApiRequest {
        method: String,
        path: String,
        route: String,
        retries: u32,
    },
    /// A response arrived
    ApiResponse {
        method: String,
        path: String,
        route: String,
        status: u16,
    },
    /// The invalid-request counter crossed a warning interval
    InvalidRequestWarning { count: u64, remaining_ms: i64 },
}

/// Multi-subscriber event channel for the REST pipeline
#[derive(Debug, Clone)]
pub struct RestEvents {
    tx: broadcast::Sender<RestEvent>,
}

impl RestEvents {
    /// Create an event channel
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RestEvent> {
        self.tx.subscribe()
    }

    /// Check whether anyone is listening
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: RestEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for RestEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let events = RestEvents::new();
        let mut rx = events.subscribe();

        events.emit(RestEvent::ApiRequest {
            method: "GET".to_string(),
            path: "/users/@me".to_string(),
            route: "/users/@me".to_string(),
            retries: 0,
        });

        match rx.recv().await.unwrap() {
            RestEvent::ApiRequest { method, retries, .. } => {
                assert_eq!(method, "GET");
                assert_eq!(retries, 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let events = RestEvents::new();
        assert!(!events.has_subscribers());
        events.emit(RestEvent::InvalidRequestWarning {
            count: 2500,
            remaining_ms: 1000,
        });
    }
}
