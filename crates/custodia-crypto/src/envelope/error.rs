use crate::error::CryptoError;

/// Errors from building or opening an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Unsupported pack algorithm: {0}")]
    UnsupportedPackAlgorithm(String),

    #[error("No recipient entry for kid {0}")]
    RecipientNotFound(String),

    #[error("Recipient header has a sender but no iv")]
    MissingIv,

    #[error("Recipient header has an iv but no sender")]
    UnexpectedIv,

    #[error("Authcrypt envelope without a recoverable sender key")]
    SenderKeyRequired,

    #[error("A sender key is required to pack with an external CEK")]
    MissingSenderKey,

    #[error("At least one recipient key is required")]
    NoRecipients,

    #[error("Malformed envelope: {0}")]
    MalformedHeader(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
