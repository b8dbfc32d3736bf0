//! Runtime error types

use thiserror::Error;

/// Runtime error type
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The hashing pool was shut down
    #[error("hashing pool is closed")]
    PoolClosed,

    /// A blocking hash task panicked or was cancelled
    #[error("hash task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Stream read failure while hashing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// No response from the remote signer in time
    #[error("signer request {0} timed out")]
    SignerTimeout(String),

    /// The signer transport went away before answering
    #[error("signer disconnected before answering request {0}")]
    SignerDisconnected(String),

    /// The signer answered with an error
    #[error("signer rejected request {id}: {message}")]
    SignerRejected { id: String, message: String },

    #[error(transparent)]
    Core(#[from] beacon_core::Error),
}

/// Runtime result type
pub type Result<T> = std::result::Result<T, RuntimeError>;
