//! Shard event surface
//!
//! Events are fanned out on a broadcast channel. Emission is fire-and-
//! forget; a send with no subscribers is not an error. Expensive debug
//! strings are only built when someone is listening.

use crate::protocol::GatewayFrame;
use std::collections::HashSet;
use tokio::sync::broadcast;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Terminal close details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    /// False when the close was synthesized (zombie, missing close frame)
    /// or the socket errored out
    pub was_clean: bool,
}

/// Events a shard reports to the application
#[derive(Debug, Clone)]
pub enum ShardEvent {
    /// Session established; guild availability may still be pending
    Ready,
    /// Session resumed with the event backlog replayed
    Resumed,
    /// Every expected guild arrived, or the guild wait timed out with
    /// these ids still missing
    AllReady { unavailable: Option<HashSet<String>> },
    /// The server rejected the session
    InvalidSession { resumable: bool },
    /// The connection reached a terminal close
    Close(CloseEvent),
    /// The shard was destroyed and will not reconnect
    Destroyed,
    /// A decoded inbound frame, in receive order
    Raw(GatewayFrame),
    /// A dispatch event forwarded to the application
    Dispatch {
        event: String,
        data: serde_json::Value,
        sequence: i64,
    },
    /// Diagnostic message
    Debug(String),
    /// Transport or protocol error; the shard keeps running
    Error { shard_id: u32, message: String },
}

/// Multi-subscriber event channel for one shard
#[derive(Debug, Clone)]
pub struct ShardEvents {
    tx: broadcast::Sender<ShardEvent>,
}

impl ShardEvents {
    /// Create an event channel
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ShardEvent> {
        self.tx.subscribe()
    }

    /// Check whether anyone is listening
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: ShardEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit a debug message, building the string only when subscribed
    pub fn debug(&self, build: impl FnOnce() -> String) {
        if self.has_subscribers() {
            self.emit(ShardEvent::Debug(build()));
        }
    }
}

impl Default for ShardEvents {
    fn default() -> Self {
        Self::new()
    }
}
