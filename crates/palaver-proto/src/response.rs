//! Server responses and pushes.
//!
//! Every command is answered by exactly one direct response (a `*_OK`
//! variant or [`Response::Error`]). The remaining variants are pushes:
//! messages a session receives because of something another session did
//! (room broadcast, whisper, kick). Both kinds share the envelope so a
//! client can decode every inbound line the same way.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// One entry of a room's retained history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessage {
    /// Username of the sender.
    pub from: String,
    /// Message text.
    pub text: String,
}

/// All lines the server can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    /// Account created.
    RegisterOk,

    /// Connection authenticated.
    LoginOk,

    /// Joined a room; carries the room's retained history, oldest first.
    JoinOk {
        /// Room that was joined.
        room: String,
        /// Retained history, most recent last.
        history: Vec<RoomMessage>,
    },

    /// Left a room.
    LeaveOk {
        /// Room that was left.
        room: String,
    },

    /// Broadcast accepted. The sender does not receive its own echo; this
    /// reply is the only confirmation.
    ChatOk {
        /// Room the message was broadcast to.
        room: String,
    },

    /// Private message delivered to the target's queue.
    WhisperOk,

    /// Connected users.
    ListOk {
        /// Usernames of live authenticated sessions, sorted.
        users: Vec<String>,
    },

    /// Existing rooms.
    RoomsOk {
        /// Room names, sorted.
        rooms: Vec<String>,
    },

    /// Target user was disconnected.
    KickOk,

    /// Room was deleted.
    DeleteRoomOk {
        /// Room that was deleted.
        room: String,
    },

    /// Push: a room member broadcast a message.
    Message {
        /// Room the message belongs to.
        room: String,
        /// Sender username.
        from: String,
        /// Message text.
        text: String,
    },

    /// Push: a private message from another user.
    Whisper {
        /// Sender username.
        from: String,
        /// Message text.
        text: String,
    },

    /// Push: this session is being disconnected by an administrator.
    Kicked {
        /// Human-readable reason.
        reason: String,
    },

    /// The command failed; the connection stays open.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

impl Response {
    /// Encode this response as one wire line (without the trailing newline).
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode one wire line into a response.
    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
    }

    /// Build an error response from anything printable.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_tag_and_fields() {
        let line = Response::JoinOk {
            room: "general".into(),
            history: vec![RoomMessage { from: "alice".into(), text: "hi".into() }],
        }
        .encode()
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["response"], "JOIN_OK");
        assert_eq!(value["room"], "general");
        assert_eq!(value["history"][0]["from"], "alice");
    }

    #[test]
    fn push_and_reply_share_the_envelope() {
        let push = Response::Message {
            room: "general".into(),
            from: "alice".into(),
            text: "hi".into(),
        };
        let decoded = Response::decode(&push.encode().unwrap()).unwrap();
        assert_eq!(decoded, push);

        let reply = Response::error("not authenticated");
        let decoded = Response::decode(&reply.encode().unwrap()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn multi_word_tags_are_screaming_snake_case() {
        let line = Response::DeleteRoomOk { room: "general".into() }.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["response"], "DELETE_ROOM_OK");
    }
}
