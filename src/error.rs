//! Error types and handling for the burst buffer staging layer

use thiserror::Error;

/// Result type alias for staging operations
pub type Result<T> = std::result::Result<T, CdbbError>;

/// Main error type for the staging layer
#[derive(Error, Debug)]
pub enum CdbbError {
    /// I/O errors from drain-file and payload-source operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Transport-level failure
    #[error("Transport error: {message}")]
    Transport {
        /// Error message describing the transport issue
        message: String,
    },

    /// The transport was torn down while a receive or barrier was blocked;
    /// role loops treat this as the end of the job, not a fault
    #[error("Transport channel closed")]
    ChannelClosed,

    /// A wire payload failed to decode
    #[error("Invalid message: {reason}")]
    InvalidMessage {
        /// Reason why the message is invalid
        reason: String,
    },

    /// A chunk can never fit the staging ring
    #[error("Chunk of {requested} bytes exceeds staging capacity of {capacity} bytes")]
    Capacity {
        /// Size of the offending chunk
        requested: u64,
        /// Capacity of the staging ring
        capacity: u64,
    },

    /// Generic error for unexpected conditions.
    /// This error should be used for situations that are not expected to
    /// happen in a correctly functioning system, such as a logic error.
    #[error("Unexpected error: {message}")]
    Unexpected {
        /// Error message describing the unexpected condition
        message: String,
    },
}

impl CdbbError {
    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new message validation error
    pub fn invalid_message(reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Create a new unexpected error
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Check if this error marks a clean transport teardown rather
    /// than a fault
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::ChannelClosed)
    }

    /// Check if this error is fatal for the rank that hit it
    pub fn is_fatal(&self) -> bool {
        !self.is_disconnect()
    }
}
