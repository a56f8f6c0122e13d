//! Client commands.
//!
//! Commands arrive as one JSON object per line with a `command` tag naming
//! the operation. Decoding is two-stage: the tag is inspected first so an
//! unknown name and a known name with bad arguments produce distinct
//! errors, then the full object is decoded into the matching variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// All commands a client can issue.
///
/// The `command` tag is the SCREAMING_SNAKE_CASE variant name, so adding a
/// variant automatically extends the accepted tag set; [`Command::decode`]
/// lists the known names explicitly and must be kept in sync (the decoder
/// test covers every variant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Create an account in the credential store.
    Register {
        /// Account name to create.
        username: String,
        /// Account password.
        password: String,
    },

    /// Authenticate this connection.
    Login {
        /// Account name.
        username: String,
        /// Account password.
        password: String,
    },

    /// Join a room, creating it if absent. Replies with the room history.
    Join {
        /// Room name.
        room: String,
    },

    /// Leave a previously joined room.
    Leave {
        /// Room name.
        room: String,
    },

    /// Broadcast a message to a joined room.
    Chat {
        /// Room name.
        room: String,
        /// Message text.
        message: String,
    },

    /// Send a private message to a connected user.
    Whisper {
        /// Recipient username.
        target: String,
        /// Message text.
        message: String,
    },

    /// List currently connected users.
    List,

    /// List existing rooms.
    Rooms,

    /// Force-disconnect a user (administrators only).
    Kick {
        /// Username to disconnect.
        target: String,
    },

    /// Delete a room (administrators only).
    DeleteRoom {
        /// Room name to delete.
        room: String,
    },
}

/// Command names accepted on the wire.
const KNOWN_COMMANDS: &[&str] = &[
    "REGISTER",
    "LOGIN",
    "JOIN",
    "LEAVE",
    "CHAT",
    "WHISPER",
    "LIST",
    "ROOMS",
    "KICK",
    "DELETE_ROOM",
];

impl Command {
    /// Decode one wire line into a command.
    pub fn decode(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

        let name = value
            .get("command")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingCommand)?
            .to_owned();

        if !KNOWN_COMMANDS.contains(&name.as_str()) {
            return Err(ProtocolError::UnknownCommand(name));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidArguments {
            command: name,
            reason: e.to_string(),
        })
    }

    /// Encode this command as one wire line (without the trailing newline).
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Wire name of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "REGISTER",
            Self::Login { .. } => "LOGIN",
            Self::Join { .. } => "JOIN",
            Self::Leave { .. } => "LEAVE",
            Self::Chat { .. } => "CHAT",
            Self::Whisper { .. } => "WHISPER",
            Self::List => "LIST",
            Self::Rooms => "ROOMS",
            Self::Kick { .. } => "KICK",
            Self::DeleteRoom { .. } => "DELETE_ROOM",
        }
    }
}
