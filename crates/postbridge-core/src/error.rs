//! Error types for postbridge.
//!
//! Every failure a caller can observe goes through [`BridgeError`]. Errors that
//! happen while serving a peer's request never escape the dispatch path; they
//! are rendered with [`BridgeError::to_wire_message`] and sent back as the
//! `error` field of a response payload.

use thiserror::Error;

/// Main error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    // Registration errors
    #[error("Service named \"{name}\" has already been registered")]
    AlreadyRegistered { name: String },

    #[error("Invalid service definition: {message}")]
    InvalidService { message: String },

    // Invocation errors
    #[error("\"{method}\" is not a function")]
    MethodNotFound { method: String },

    #[error("Invalid arguments for \"{method}\": {message}")]
    InvalidArguments { method: String, message: String },

    /// Failure reported by the peer. The message is the peer's error string,
    /// unchanged.
    #[error("{message}")]
    Remote { message: String },

    // Channel errors
    #[error("Channel closed")]
    ChannelClosed,

    #[error("Too many pending calls (limit {limit})")]
    TooManyPendingCalls { limit: usize },

    #[error("Correlation ids exhausted")]
    CorrelationIdsExhausted,

    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Operation was cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl BridgeError {
    /// Shorthand for a remote failure carrying `message`.
    pub fn remote(message: impl Into<String>) -> Self {
        BridgeError::Remote {
            message: message.into(),
        }
    }

    /// The string placed in a response's `error` field.
    ///
    /// Stack traces and source chains are not carried across the boundary;
    /// only the top-level message is.
    pub fn to_wire_message(&self) -> String {
        self.to_string()
    }

    /// Whether the error means the channel is gone and no further calls can
    /// succeed on it.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, BridgeError::ChannelClosed)
    }
}
