//! Error type shared by the core modules.

use thiserror::Error;

/// Errors raised by the core data model and algorithms.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hex key: {0}")]
    InvalidHexKey(String),

    #[error("invalid relay url: {0}")]
    InvalidRelayUrl(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("expected event kind {expected}, got {got}")]
    UnexpectedKind { expected: u16, got: u16 },

    #[error("unknown signer command: {0}")]
    UnknownCommand(String),

    #[error("invalid relay message: {0}")]
    Message(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Core result type.
pub type Result<T> = core::result::Result<T, Error>;
