//! `Custodia` Crypto Library
//!
//! Key primitives and the DIDComm v1 envelope codec used by a device whose
//! private key is held by a remote custodian.
//!
//! ## Crypto primitives
//!
//! - **Keys**: Ed25519 identity keys, converted to X25519 for ECDH
//! - **Boxes**: `crypto_box` sealed boxes (anonymous) and authenticated boxes
//! - **Body encryption**: XChaCha20-Poly1305 with detached tag, one CEK per message
//!
//! The envelope codec splits key wrapping from body encryption so a
//! custodian can wrap or unwrap a CEK without ever seeing the payload.

pub mod aead;
pub mod ecdh;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod keystore;

pub use aead::{AeadOutput, ContentEncryptionKey, NONCE_SIZE};
pub use envelope::{
    EncryptedMessage, EnvelopeError, PackAlgorithm, ProtectedHeader, Recipient, RecipientHeader,
    UnpackedMessage, pack, pack_with_external_cek, unpack, unpack_with_external_cek,
};
pub use error::CryptoError;
pub use keys::{Key, KeyPair, KeyType, fingerprint_of};
pub use keystore::{KeyStore, LocalKeyStore};
