//! Gateway error types

use crate::shard::MAX_FRAME_BYTES;

/// Errors surfaced by the gateway shard
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Payload encode/decode error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Outbound frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte cap")]
    FrameTooLarge(usize),

    #[error("Inflater error: {0}")]
    Inflate(String),

    #[error("Connection closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    #[error("Session invalidated by the server")]
    InvalidSession,

    #[error("Shard is not running")]
    NotRunning,

    #[error("Shard was destroyed")]
    Destroyed,
}
