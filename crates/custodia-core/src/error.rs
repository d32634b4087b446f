//! Error types for `Custodia` core library.

use thiserror::Error;

/// Result type alias using `Custodia` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `Custodia` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tracing subscriber could not be installed
    #[error("Tracing initialisation failed: {0}")]
    Tracing(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
