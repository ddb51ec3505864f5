//! Error types for instance coordination.
//!
//! Only a small subset of these errors ever reaches the embedding application:
//! the listener and the follower notifier swallow channel and protocol errors
//! after logging them. `LockUnavailable` is the one condition that surfaces as
//! a startup failure.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the instance guard.
#[derive(Debug, Error)]
pub enum InstanceError {
    // Election errors
    #[error("Lock unavailable at {path:?}: {message}")]
    LockUnavailable {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Channel errors
    #[error("Failed to bind activation channel {endpoint}: {message}")]
    ChannelBind {
        endpoint: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Leader unreachable at {endpoint}: {message}")]
    LeaderUnreachable { endpoint: String, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    // Protocol errors
    #[error("Empty command")]
    EmptyCommand,

    #[error("Command is not valid UTF-8")]
    InvalidUtf8,

    #[error("Command of {len} bytes exceeds maximum {max}")]
    CommandTooLong { len: usize, max: usize },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for instance guard operations.
pub type Result<T> = std::result::Result<T, InstanceError>;

impl From<std::io::Error> for InstanceError {
    fn from(err: std::io::Error) -> Self {
        InstanceError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl InstanceError {
    /// Create a lock error with path context.
    pub fn lock_unavailable(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        InstanceError::LockUnavailable {
            message: err.to_string(),
            path: path.into(),
            source: Some(err),
        }
    }

    /// Create a channel bind error for an endpoint.
    pub fn channel_bind(err: std::io::Error, endpoint: impl ToString) -> Self {
        InstanceError::ChannelBind {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Check if this error was caused by malformed input on the activation channel.
    ///
    /// Protocol errors are ignored silently by the listener; everything else
    /// is a transport failure worth a warning.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            InstanceError::EmptyCommand
                | InstanceError::InvalidUtf8
                | InstanceError::CommandTooLong { .. }
                | InstanceError::UnknownCommand(_)
        )
    }
}
