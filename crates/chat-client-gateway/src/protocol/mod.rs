//! Gateway wire protocol
//!
//! Opcode-tagged `{op, d, s, t}` frames exchanged over the WebSocket.

mod close_codes;
mod frame;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use frame::GatewayFrame;
pub use opcodes::OpCode;
pub use payloads::{HelloPayload, ReadyGuild, ReadyPayload};
