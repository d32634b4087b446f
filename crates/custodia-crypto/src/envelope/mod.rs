//! DIDComm v1 encrypted envelope (JWE-like).
//!
//! ```text
//! EncryptedMessage { protected, iv, ciphertext, tag }      all base64url
//!   protected = b64url(JSON ProtectedHeader)               also the AEAD AAD
//!   ProtectedHeader { enc, typ, alg, recipients[] }
//!   Recipient { encrypted_key, header { kid, sender?, iv? } }
//! ```
//!
//! `sender` and `iv` appear together (Authcrypt) or not at all (Anoncrypt).

mod codec;
mod error;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::{Deserialize, Serialize};

pub use codec::{UnpackedMessage, pack, pack_with_external_cek, unpack, unpack_with_external_cek};
pub use error::EnvelopeError;

/// Content encryption identifier written into every protected header.
pub const ENC_XCHACHA20POLY1305_IETF: &str = "xchacha20poly1305_ietf";
/// JWM envelope type.
pub const TYP_JWM: &str = "JWM/1.0";

/// Base64url without padding on encode; accepts padded input on decode.
pub const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub(crate) fn b64url_decode(field: &str, value: &str) -> Result<Vec<u8>, EnvelopeError> {
    BASE64_URL
        .decode(value)
        .map_err(|e| EnvelopeError::MalformedHeader(format!("{field} is not base64url: {e}")))
}

/// Key-wrap framing of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackAlgorithm {
    /// Sender authenticated via ECDH with the sender's key.
    Authcrypt,
    /// Sender not identified.
    Anoncrypt,
}

impl PackAlgorithm {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Authcrypt => "Authcrypt",
            Self::Anoncrypt => "Anoncrypt",
        }
    }

    pub fn parse(alg: &str) -> Result<Self, EnvelopeError> {
        match alg {
            "Authcrypt" => Ok(Self::Authcrypt),
            "Anoncrypt" => Ok(Self::Anoncrypt),
            other => Err(EnvelopeError::UnsupportedPackAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for PackAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub protected: String,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

impl EncryptedMessage {
    /// Decode the base64url `protected` field.
    pub fn protected_header(&self) -> Result<ProtectedHeader, EnvelopeError> {
        let bytes = b64url_decode("protected", &self.protected)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| EnvelopeError::MalformedHeader(format!("protected header: {e}")))
    }
}

/// Header bound into the AEAD tag as additional authenticated data.
///
/// `alg` stays a string so unknown algorithms parse and are rejected with
/// [`EnvelopeError::UnsupportedPackAlgorithm`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    pub enc: String,
    pub typ: String,
    pub alg: String,
    pub recipients: Vec<Recipient>,
}

impl ProtectedHeader {
    pub fn new(alg: PackAlgorithm, recipients: Vec<Recipient>) -> Self {
        Self {
            enc: ENC_XCHACHA20POLY1305_IETF.to_string(),
            typ: TYP_JWM.to_string(),
            alg: alg.as_str().to_string(),
            recipients,
        }
    }

    pub fn algorithm(&self) -> Result<PackAlgorithm, EnvelopeError> {
        PackAlgorithm::parse(&self.alg)
    }

    /// Base64url of the header JSON. Field order is fixed by the struct.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| EnvelopeError::MalformedHeader(format!("protected header: {e}")))?;
        Ok(BASE64_URL.encode(json))
    }

    /// The recipient entry addressed to `kid` (exact string match).
    pub fn recipient(&self, kid: &str) -> Result<&Recipient, EnvelopeError> {
        self.recipients
            .iter()
            .find(|r| r.header.kid == kid)
            .ok_or_else(|| EnvelopeError::RecipientNotFound(kid.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub encrypted_key: String,
    pub header: RecipientHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientHeader {
    /// Base58 Ed25519 public key of the recipient.
    pub kid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
}

/// Decoded Authcrypt material of a recipient entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthcryptMaterial {
    pub encrypted_sender: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl Recipient {
    pub fn encrypted_key_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        b64url_decode("encrypted_key", &self.encrypted_key)
    }

    /// Enforce the sender/iv pairing and decode it when present.
    pub fn authcrypt_material(&self) -> Result<Option<AuthcryptMaterial>, EnvelopeError> {
        match (&self.header.sender, &self.header.iv) {
            (Some(sender), Some(iv)) => Ok(Some(AuthcryptMaterial {
                encrypted_sender: b64url_decode("sender", sender)?,
                nonce: b64url_decode("iv", iv)?,
            })),
            (Some(_), None) => Err(EnvelopeError::MissingIv),
            (None, Some(_)) => Err(EnvelopeError::UnexpectedIv),
            (None, None) => Ok(None),
        }
    }
}
