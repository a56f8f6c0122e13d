//! Palaver wire protocol.
//!
//! The protocol is newline-delimited UTF-8 JSON over a persistent byte
//! stream: each line is one object, either a client command (`{"command":
//! "JOIN", ...}`) or a server response (`{"response": "JOIN_OK", ...}`).
//! Text framing keeps the wire format self-describing and debuggable with
//! nothing more than a raw TCP client.
//!
//! This crate is pure data: envelope types, their encoding, and the decode
//! error taxonomy. It performs no I/O and has no opinion about transports.
//!
//! # Invariants
//!
//! - Each command name maps to exactly one [`Command`] variant and each
//!   response name to exactly one [`Response`] variant (enforced by match
//!   exhaustiveness in the decoders).
//! - Encoding a value and decoding the produced line yields an equivalent
//!   value.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod errors;
mod response;

pub use command::Command;
pub use errors::{ProtocolError, Result};
pub use response::{Response, RoomMessage};

/// Maximum accepted length of a single wire line, in bytes.
///
/// A peer that sends a longer line is violating the protocol and should be
/// disconnected rather than buffered without bound.
pub const MAX_LINE_BYTES: usize = 64 * 1024;
