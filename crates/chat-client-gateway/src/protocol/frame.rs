//! Gateway frame format
//!
//! All gateway traffic uses the `{op, d, s, t}` shape; `s` and `t` are
//! only present on dispatch frames.

use super::{HelloPayload, OpCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single gateway frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    /// Operation code
    pub op: OpCode,

    /// Event data payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,

    /// Sequence number (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<i64>,

    /// Event type (only for op=0 Dispatch)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    fn send(op: OpCode, d: Value) -> Self {
        Self {
            op,
            d: Some(d),
            s: None,
            t: None,
        }
    }

    // === Outbound frames ===

    /// Create a Heartbeat frame (op=1) carrying the last received sequence
    #[must_use]
    pub fn heartbeat(sequence: Option<i64>) -> Self {
        Self::send(OpCode::Heartbeat, sequence.map_or(Value::Null, Value::from))
    }

    /// Create a QoS Heartbeat frame (op=40)
    #[must_use]
    pub fn qos_heartbeat(sequence: Option<i64>, active: bool) -> Self {
        Self::send(
            OpCode::QosHeartbeat,
            serde_json::json!({
                "seq": sequence,
                "qos": { "ver": 1, "active": active, "reasons": [] },
            }),
        )
    }

    /// Create an Identify frame (op=2)
    #[must_use]
    pub fn identify(token: &str, properties: Value, intents: u64, presence: Option<Value>) -> Self {
        let mut d = serde_json::json!({
            "token": token,
            "properties": properties,
            "intents": intents,
            "compress": false,
        });
        if let Some(presence) = presence {
            d["presence"] = presence;
        }
        Self::send(OpCode::Identify, d)
    }

    /// Create a Resume frame (op=6)
    #[must_use]
    pub fn resume(token: &str, session_id: &str, sequence: i64) -> Self {
        Self::send(
            OpCode::Resume,
            serde_json::json!({
                "token": token,
                "session_id": session_id,
                "seq": sequence,
            }),
        )
    }

    /// Create a Presence Update frame (op=3)
    #[must_use]
    pub fn presence_update(presence: Value) -> Self {
        Self::send(OpCode::PresenceUpdate, presence)
    }

    /// Create a Voice State Update frame (op=4)
    #[must_use]
    pub fn voice_state_update(voice_state: Value) -> Self {
        Self::send(OpCode::VoiceStateUpdate, voice_state)
    }

    /// Create a bulk guild-subscription frame (op=37)
    ///
    /// `subscriptions` maps guild ids to their subscription descriptors.
    #[must_use]
    pub fn guild_subscriptions_bulk(subscriptions: Map<String, Value>) -> Self {
        Self::send(
            OpCode::GuildSubscriptionsBulk,
            serde_json::json!({ "subscriptions": subscriptions }),
        )
    }

    // === Inbound parsing ===

    /// Try to parse as a Hello payload (op=10)
    pub fn as_hello(&self) -> Option<HelloPayload> {
        if self.op != OpCode::Hello {
            return None;
        }
        self.d.as_ref().and_then(|d| serde_json::from_value(d.clone()).ok())
    }

    /// Try to parse the resumable flag of an Invalid Session (op=9)
    pub fn as_invalid_session(&self) -> Option<bool> {
        if self.op != OpCode::InvalidSession {
            return None;
        }
        Some(self.d.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    /// Check if this is a dispatch frame carrying the given event type
    #[must_use]
    pub fn is_dispatch(&self, event_type: &str) -> bool {
        self.op == OpCode::Dispatch && self.t.as_deref() == Some(event_type)
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl std::fmt::Display for GatewayFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(t) = &self.t {
            write!(f, "GatewayFrame(op={}, t={}", self.op, t)?;
            if let Some(s) = self.s {
                write!(f, ", s={s}")?;
            }
            write!(f, ")")
        } else {
            write!(f, "GatewayFrame(op={})", self.op)
        }
    }
}
