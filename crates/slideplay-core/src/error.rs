//! Error types for Slideplay Core
//!
//! Only programmer-error class conditions are errors. Policy denial, silent
//! stalls and supersession are ordinary [`PlayOutcome`](crate::PlayOutcome)
//! values and never surface here.

use thiserror::Error;

/// Result type alias for arbitration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Arbitration error types
#[derive(Error, Debug)]
pub enum Error {
    // Request errors
    #[error("Invalid session key: {0}")]
    InvalidKey(String),

    #[error("Unknown playback scope: {0}")]
    UnknownScope(String),

    // Source errors
    #[error("No playable source for {key}")]
    NoSource { key: String },

    #[error("Stream engine error: {0}")]
    StreamEngine(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// Returns true if the caller can retry after fixing inputs at runtime
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NoSource { .. } | Error::StreamEngine(_))
    }

    /// Returns the error code for logs and UI diagnostics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidKey(_) => "INVALID_KEY",
            Error::UnknownScope(_) => "UNKNOWN_SCOPE",
            Error::NoSource { .. } => "NO_SOURCE",
            Error::StreamEngine(_) => "STREAM_ENGINE",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "CONFIG_PARSE",
            Error::Io(_) => "IO",
        }
    }
}
