//! Message validation errors.

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Message has no @type")]
    MissingType,

    #[error("Wrong message type: expected {expected}, got {actual}")]
    WrongType {
        expected: &'static str,
        actual: String,
    },

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} is not valid hex: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),
}
