//! Protocol error taxonomy.
//!
//! Decode failures are classified so the server can answer with a precise
//! `ERROR` message while keeping the connection open. Only oversized frames
//! are connection-fatal; that decision belongs to the transport layer and is
//! represented here as its own variant.

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding or encoding wire lines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The line is not a valid JSON object.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The object has no string `command` field.
    #[error("missing command field")]
    MissingCommand,

    /// The `command` name is not part of the protocol.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command name is known but its arguments do not match the
    /// command's contract (missing or mistyped fields).
    #[error("invalid arguments for {command}: {reason}")]
    InvalidArguments {
        /// Command whose arguments failed to decode.
        command: String,
        /// Decoder failure description.
        reason: String,
    },

    /// The line exceeds [`crate::MAX_LINE_BYTES`].
    #[error("frame of {0} bytes exceeds the line limit")]
    OversizedFrame(usize),

    /// The line is not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// A value could not be serialized to a wire line.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}
