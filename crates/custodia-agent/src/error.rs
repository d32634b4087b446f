//! Agent error types.

use std::time::Duration;

use custodia_crypto::{CryptoError, EnvelopeError};
use custodia_proto::ValidationError;

use crate::pipeline::PipelineError;
use crate::record::ProtocolStateError;
use crate::storage::DatabaseError;
use crate::transport::TransportError;

/// Coarse category of an [`AgentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ProtocolState,
    Crypto,
    Correlation,
    Timeout,
    Transport,
    Validation,
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    ProtocolState(#[from] ProtocolStateError),

    #[error("{record_type} record {record_id} was abandoned")]
    Abandoned {
        record_type: &'static str,
        record_id: String,
    },

    #[error("Public key for context {0} has not been obtained")]
    KeyUnavailable(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Envelope(EnvelopeError),

    #[error("Unsupported pack algorithm {0} for this exchange")]
    UnsupportedAlgorithm(String),

    #[error("Sender key does not match the agent key")]
    KeyMismatch,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] ValidationError),

    #[error("No handler for message type {0}")]
    UnhandledMessageType(String),

    #[error("No {record_type} record with id {record_id}")]
    RecordNotFound {
        record_type: &'static str,
        record_id: String,
    },

    #[error("Timed out after {after:?} waiting for record {record_id}")]
    Timeout { record_id: String, after: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Storage error: {0}")]
    Storage(DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] custodia_core::Error),
}

impl AgentError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ProtocolState(_) | Self::Abandoned { .. } | Self::KeyUnavailable(_) => {
                ErrorKind::ProtocolState
            }
            Self::Crypto(_) | Self::UnsupportedAlgorithm(_) => ErrorKind::Crypto,
            Self::Envelope(EnvelopeError::RecipientNotFound(_))
            | Self::KeyMismatch
            | Self::RecordNotFound { .. } => ErrorKind::Correlation,
            Self::Envelope(_) => ErrorKind::Crypto,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transport(_) | Self::Pipeline(_) => ErrorKind::Transport,
            Self::InvalidRequest(_)
            | Self::InvalidResponse(_)
            | Self::InvalidMessage(_)
            | Self::UnhandledMessageType(_)
            | Self::Config(_) => ErrorKind::Validation,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn not_found(record_type: &'static str, record_id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            record_type,
            record_id: record_id.into(),
        }
    }
}

impl From<EnvelopeError> for AgentError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Crypto(inner) => Self::Crypto(inner),
            other => Self::Envelope(other),
        }
    }
}

impl From<DatabaseError> for AgentError {
    fn from(e: DatabaseError) -> Self {
        Self::Storage(e)
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_grouped() {
        assert_eq!(
            AgentError::from(EnvelopeError::RecipientNotFound("kid".into())).kind(),
            ErrorKind::Correlation
        );
        assert_eq!(
            AgentError::from(EnvelopeError::Crypto(CryptoError::DecryptionFailed("x".into())))
                .kind(),
            ErrorKind::Crypto
        );
        assert_eq!(
            AgentError::from(DatabaseError::Query("boom".into())).kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            AgentError::Timeout {
                record_id: "r".into(),
                after: Duration::from_secs(1)
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            AgentError::from(ValidationError::MissingType).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn key_mismatch_describes_the_sender() {
        assert_eq!(
            AgentError::KeyMismatch.to_string(),
            "Sender key does not match the agent key"
        );
        assert_eq!(AgentError::KeyMismatch.kind(), ErrorKind::Correlation);
    }
}
