//! Inbound payload structures
//!
//! Only the payloads the shard itself needs are typed; dispatch event
//! bodies are forwarded to the application as opaque JSON.

use serde::Deserialize;

/// Hello payload (op=10)
#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// READY event data (t="READY")
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    /// Session id used for RESUME
    pub session_id: String,
    /// Preferred gateway URL for resuming
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// Guilds on this session; their GUILD_CREATEs are expected to follow
    #[serde(default)]
    pub guilds: Vec<ReadyGuild>,
}

/// A guild reference inside the READY payload
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyGuild {
    pub id: String,
    #[serde(default)]
    pub unavailable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_payload() {
        let hello: HelloPayload =
            serde_json::from_str(r#"{"heartbeat_interval":41250}"#).unwrap();
        assert_eq!(hello.heartbeat_interval, 41_250);
    }

    #[test]
    fn test_ready_payload() {
        let ready: ReadyPayload = serde_json::from_value(serde_json::json!({
            "session_id": "abc",
            "resume_gateway_url": "wss://gateway-resume.example",
            "guilds": [
                {"id": "111", "unavailable": true},
                {"id": "222"},
            ],
            "user": {"id": "999"},
        }))
        .unwrap();

        assert_eq!(ready.session_id, "abc");
        assert_eq!(
            ready.resume_gateway_url.as_deref(),
            Some("wss://gateway-resume.example")
        );
        assert_eq!(ready.guilds.len(), 2);
        assert!(ready.guilds[0].unavailable);
        assert!(!ready.guilds[1].unavailable);
    }

    #[test]
    fn test_ready_payload_minimal() {
        let ready: ReadyPayload =
            serde_json::from_value(serde_json::json!({"session_id": "s"})).unwrap();
        assert!(ready.guilds.is_empty());
        assert!(ready.resume_gateway_url.is_none());
    }
}
