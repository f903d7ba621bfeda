//! Gateway operation codes
//!
//! Defines the WebSocket gateway op codes the client sends and receives.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Gateway operation codes
///
/// Op codes define the type of message being sent or received over the
/// WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Server dispatches an event (receive only)
    Dispatch = 0,
    /// Heartbeat - keep connection alive (send/receive)
    Heartbeat = 1,
    /// Identify - authenticate session (send only)
    Identify = 2,
    /// Presence Update - update online status (send only)
    PresenceUpdate = 3,
    /// Voice State Update - join/leave/move voice (send only)
    VoiceStateUpdate = 4,
    /// Resume - resume dropped connection (send only)
    Resume = 6,
    /// Reconnect - server requests client reconnect (receive only)
    Reconnect = 7,
    /// Invalid Session - session is invalid (receive only)
    InvalidSession = 9,
    /// Hello - sent on connect (receive only)
    Hello = 10,
    /// Heartbeat ACK - heartbeat acknowledged (receive only)
    HeartbeatAck = 11,
    /// DM Update (send only)
    DmUpdate = 13,
    /// Bulk guild subscriptions after session start (send only)
    GuildSubscriptionsBulk = 37,
    /// Report the time-spent session id (send only)
    UpdateTimeSpentSessionId = 39,
    /// Heartbeat carrying QoS metadata (send only)
    QosHeartbeat = 40,
}

impl OpCode {
    /// Create an `OpCode` from a raw integer value
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Dispatch),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Identify),
            3 => Some(Self::PresenceUpdate),
            4 => Some(Self::VoiceStateUpdate),
            6 => Some(Self::Resume),
            7 => Some(Self::Reconnect),
            9 => Some(Self::InvalidSession),
            10 => Some(Self::Hello),
            11 => Some(Self::HeartbeatAck),
            13 => Some(Self::DmUpdate),
            37 => Some(Self::GuildSubscriptionsBulk),
            39 => Some(Self::UpdateTimeSpentSessionId),
            40 => Some(Self::QosHeartbeat),
            _ => None,
        }
    }

    /// Get the raw integer value
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this op code can be sent by the client
    #[must_use]
    pub const fn is_send_op(self) -> bool {
        matches!(
            self,
            Self::Heartbeat
                | Self::Identify
                | Self::PresenceUpdate
                | Self::VoiceStateUpdate
                | Self::Resume
                | Self::DmUpdate
                | Self::GuildSubscriptionsBulk
                | Self::UpdateTimeSpentSessionId
                | Self::QosHeartbeat
        )
    }

    /// Check if this op code can be received from the server
    #[must_use]
    pub const fn is_receive_op(self) -> bool {
        matches!(
            self,
            Self::Dispatch
                | Self::Heartbeat
                | Self::Reconnect
                | Self::InvalidSession
                | Self::Hello
                | Self::HeartbeatAck
        )
    }

    /// Get the name of this op code
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "Dispatch",
            Self::Heartbeat => "Heartbeat",
            Self::Identify => "Identify",
            Self::PresenceUpdate => "PresenceUpdate",
            Self::VoiceStateUpdate => "VoiceStateUpdate",
            Self::Resume => "Resume",
            Self::Reconnect => "Reconnect",
            Self::InvalidSession => "InvalidSession",
            Self::Hello => "Hello",
            Self::HeartbeatAck => "HeartbeatAck",
            Self::DmUpdate => "DmUpdate",
            Self::GuildSubscriptionsBulk => "GuildSubscriptionsBulk",
            Self::UpdateTimeSpentSessionId => "UpdateTimeSpentSessionId",
            Self::QosHeartbeat => "QosHeartbeat",
        }
    }
}

impl Serialize for OpCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for OpCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        Self::from_u8(value).ok_or_else(|| serde::de::Error::custom(format!("invalid op code: {value}")))
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u8())
    }
}
