//! Server error types.
//!
//! These cover startup and transport failures only. Per-command failures
//! are not errors at this level: the dispatcher converts them to `ERROR`
//! responses, and a transport failure on one connection is handled by that
//! connection's cleanup without surfacing here.

/// Errors that can occur while starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid configuration (unparseable bind address and similar).
    /// Fatal; fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Socket-level failure (bind, accept).
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}
