//! Error types for the chat service
//!
//! Framing errors, session errors and application-level errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::message::Command;
use crate::protocol::MAX_FRAME_PAYLOAD;

/// Wire codec errors
///
/// Any of these is fatal to the connection it occurred on.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Declared payload length is non-positive or above the frame budget
    #[error("invalid frame length {0} (expected 1..={MAX_FRAME_PAYLOAD})")]
    InvalidLength(i32),

    /// Outgoing payload does not fit in one frame
    #[error("payload of {0} bytes exceeds the {MAX_FRAME_PAYLOAD}-byte frame limit")]
    FrameTooLarge(usize),

    /// Payload serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session send/receive errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Framing or transport failure
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Session was already closed or marked disconnected
    #[error("session closed")]
    Closed,
}

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (send an ERROR message to the client).
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Session failure (fatal)
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// First message was not an auth request (fatal)
    #[error("authentication required")]
    AuthRequired,

    /// Peer closed before the exchange completed (fatal)
    #[error("connection closed")]
    ConnectionClosed,

    /// Empty username in auth request
    #[error("username cannot be empty")]
    UsernameEmpty,

    /// Username already registered
    #[error("username '{0}' is taken")]
    UsernameTaken(String),

    /// `/pm` without both target and text
    #[error("malformed private message")]
    PrivateMessageUsage,

    /// `/pm` addressed to the sender
    #[error("private message to self")]
    PrivateMessageToSelf,

    /// Slash command not in the command table
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Relayed message would not fit in one frame
    #[error("message of {0} bytes is too long to relay")]
    MessageTooLong(usize),

    /// Command tag the server does not accept from clients
    #[error("unsupported command: {0}")]
    UnsupportedCommand(Command),
}

impl AppError {
    /// Whether this error ends the connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Io(_) | AppError::Session(_) | AppError::AuthRequired | AppError::ConnectionClosed
        )
    }
}

impl From<CodecError> for AppError {
    fn from(err: CodecError) -> Self {
        AppError::Session(SessionError::Codec(err))
    }
}
