//! Error types for Floodgate.

use thiserror::Error;

/// Main error type for Floodgate operations.
///
/// Admission outcomes are never errors; these cover startup and serving.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised while layering configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
