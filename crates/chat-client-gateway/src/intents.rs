//! Gateway intents
//!
//! Bitmask declaring which event groups the session subscribes to,
//! sent in IDENTIFY.

use bitflags::bitflags;

bitflags! {
    /// Gateway intent flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct GatewayIntents: u64 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MODERATION = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

impl GatewayIntents {
    /// Default subscription set for a freshly configured client
    #[must_use]
    pub fn default_set() -> Self {
        Self::GUILDS | Self::GUILD_MESSAGES | Self::DIRECT_MESSAGES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_bits() {
        let intents = GatewayIntents::default_set();
        assert!(intents.contains(GatewayIntents::GUILDS));
        assert!(intents.contains(GatewayIntents::GUILD_MESSAGES));
        assert!(intents.contains(GatewayIntents::DIRECT_MESSAGES));
        assert!(!intents.contains(GatewayIntents::GUILD_PRESENCES));
        assert_eq!(intents.bits(), 1 | 512 | 4096);
    }

    #[test]
    fn test_bits_roundtrip() {
        let intents = GatewayIntents::from_bits_truncate(4609);
        assert_eq!(intents, GatewayIntents::default_set());
    }
}
