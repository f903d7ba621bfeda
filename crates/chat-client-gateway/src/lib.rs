//! # chat-client-gateway
//!
//! Client side of the real-time gateway: shard lifecycle, outbound send
//! scheduling, session resumption, and inbound framing.

pub mod error;
pub mod events;
pub mod inflate;
pub mod intents;
pub mod protocol;
pub mod queue;
pub mod scheduler;
pub mod shard;
pub mod subscriptions;

pub use error::GatewayError;
pub use events::{CloseEvent, ShardEvent, ShardEvents};
pub use intents::GatewayIntents;
pub use shard::{ConnectionState, DestroyOptions, Shard};
