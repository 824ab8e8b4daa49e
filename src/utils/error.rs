//! The `error` module defines the error types used within the `chatroom` application.
//!
//! Frame-level errors (`MalformedEnvelope`, `IncompleteEnvelope`,
//! `ProtocolViolation`) leave the connection usable: the offending frame is
//! dropped and the next one is read. Everything else ends the connection it
//! happened on, but never the server loop.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The payload was not valid UTF-8 JSON.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The payload parsed but a required key was missing or null.
    #[error("incomplete envelope: missing `{0}`")]
    IncompleteEnvelope(&'static str),

    /// The peer closed the stream, possibly in the middle of a frame.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Well-formed envelope carrying something the protocol does not define
    /// (unknown `type` discriminant, unknown service command).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("not connected")]
    NotConnected,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ChatError {
    /// Whether the connection that produced this error can keep being read.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ChatError::MalformedEnvelope(_)
                | ChatError::IncompleteEnvelope(_)
                | ChatError::ProtocolViolation(_)
        )
    }
}
