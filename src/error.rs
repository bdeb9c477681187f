//! Error types for the Notegate service.

use thiserror::Error;

/// Main error type for Notegate operations.
#[derive(Error, Debug)]
pub enum NotegateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors, including failures to bind or serve the listener
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Notegate operations.
pub type Result<T> = std::result::Result<T, NotegateError>;
