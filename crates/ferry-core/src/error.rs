//! Error types for the ferry broker.
//!
//! `FerryError` covers failures inside the broker itself (configuration,
//! encoding, delivery). `HandlerError` is what the externally supplied
//! invoke and subscription handlers report; its message becomes the `reason`
//! of the error envelope sent back to the caller.

use thiserror::Error;

/// Main error type for the broker.
#[derive(Debug, Error)]
pub enum FerryError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Codec error: {message}")]
    Codec { message: String },

    // Protocol errors
    #[error("Invalid envelope: {message}")]
    InvalidEnvelope { message: String },

    // Delivery errors
    #[error("Endpoint closed: {endpoint}")]
    EndpointClosed { endpoint: String },

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, FerryError>;

impl From<serde_json::Error> for FerryError {
    fn from(err: serde_json::Error) -> Self {
        FerryError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl FerryError {
    /// Create a codec error from anything printable.
    pub fn codec(message: impl Into<String>) -> Self {
        FerryError::Codec {
            message: message.into(),
        }
    }
}

/// Failure reported by an invoke or subscription handler.
///
/// The message is surfaced verbatim as the `reason` of the response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
