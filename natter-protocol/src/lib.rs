//! natter-protocol: Wire-level definitions for the natter chat server
//!
//! This crate defines the newline-delimited text framing shared by the
//! server and its clients, the inbound command grammar, and the exact
//! rendered lines the server emits.

pub mod codec;
pub mod command;
pub mod messages;

// Re-export main types at crate root
pub use codec::{CodecError, LineCodec, DEFAULT_MAX_LINE_BYTES};
pub use command::{Command, CommandError};
pub use messages::Envelope;
