//! Error types for the TCP host.

use ferry_core::FerryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame size {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Invalid UTF-8 in frame")]
    InvalidUtf8,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document error: {message}")]
    Document { message: String },

    #[error(transparent)]
    Broker(#[from] FerryError),
}

pub type Result<T> = std::result::Result<T, HostError>;
