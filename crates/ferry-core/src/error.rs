//! Error types for Ferry.
//!
//! This module provides a unified error type for all Ferry operations.
//! The variants follow the failure taxonomy of the upload protocol: some
//! failures are retried by the supervisor, others end the current operation.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for Ferry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Ferry.
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level transport failure (connection lost mid-stream, refused, ...)
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-success HTTP status
    #[error("upload rejected with HTTP status {0}")]
    HttpStatus(u16),

    /// The durable store could not be reached
    #[error("durable store unavailable: {0}")]
    StoreUnavailable(String),

    /// The platform refused to register the recovery trigger
    #[error("recovery trigger registration rejected: {0}")]
    RegistrationRejected(String),

    /// The context behind a handle has already stopped
    #[error("context terminated")]
    ContextTerminated,

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// File not found
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns whether this error is recoverable (can be retried).
    ///
    /// Network failures are resumed from the durable store and rejected
    /// trigger registrations are retried with a fixed backoff. Everything
    /// else ends the operation that produced it.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RegistrationRejected(_))
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Network(_) => Some(
                "The transfer was saved and will be resumed in the background.\n\
                 You can also resume it manually:\n\
                   ferry resume",
            ),
            Self::HttpStatus(_) => Some(
                "The server refused the upload. Check the endpoint with:\n\
                   ferry config",
            ),
            Self::StoreUnavailable(_) => Some(
                "Check that the store directory is writable.\n\
                 Its location is shown by:\n\
                   ferry config",
            ),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
