//! XChaCha20-Poly1305 body encryption with detached tags.
//!
//! Envelope bodies use `xchacha20poly1305_ietf`: a 32-byte content
//! encryption key (CEK), a 24-byte random nonce, and a 16-byte tag carried
//! separately from the ciphertext.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Tag, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const TAG_SIZE: usize = 16;

/// A single-use content encryption key and the body nonce bound to it.
///
/// Encrypting consumes the key, so one CEK never authors two bodies.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentEncryptionKey {
    key: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
}

impl std::fmt::Debug for ContentEncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentEncryptionKey")
            .field("key", &"[REDACTED]")
            .field("nonce", &hex::encode(self.nonce))
            .finish()
    }
}

/// Output of a detached AEAD encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeadOutput {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

impl ContentEncryptionKey {
    /// Fresh random key and nonce.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut nonce);
        Self { key, nonce }
    }

    pub fn from_parts(key: &[u8], nonce: &[u8]) -> Result<Self, CryptoError> {
        let key = <[u8; KEY_SIZE]>::try_from(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: key.len(),
        })?;
        let nonce =
            <[u8; NONCE_SIZE]>::try_from(nonce).map_err(|_| CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: nonce.len(),
            })?;
        Ok(Self { key, nonce })
    }

    /// Raw key bytes. Only the custodian wrap request should see these.
    pub const fn key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub const fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Encrypt `plaintext` bound to `aad`, consuming the key.
    pub fn encrypt(self, plaintext: &[u8], aad: &[u8]) -> Result<AeadOutput, CryptoError> {
        let (ciphertext, tag) = encrypt_detached(&self.key, &self.nonce, plaintext, aad)?;
        Ok(AeadOutput {
            ciphertext,
            nonce: self.nonce,
            tag,
        })
    }
}

fn cipher(key: &[u8]) -> Result<XChaCha20Poly1305, CryptoError> {
    XChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: KEY_SIZE,
        actual: key.len(),
    })
}

fn check_nonce(nonce: &[u8]) -> Result<&XNonce, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    Ok(XNonce::from_slice(nonce))
}

/// Encrypt with an explicit key and nonce, returning ciphertext and tag.
pub fn encrypt_detached(
    key: &[u8],
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE]), CryptoError> {
    let cipher = cipher(key)?;
    let nonce = check_nonce(nonce)?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(nonce, aad, &mut buffer)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let mut detached = [0u8; TAG_SIZE];
    detached.copy_from_slice(tag.as_slice());
    Ok((buffer, detached))
}

/// Decrypt and authenticate. Fails with `DecryptionFailed` on any tag mismatch.
pub fn decrypt_detached(
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher(key)?;
    let nonce = check_nonce(nonce)?;
    if tag.len() != TAG_SIZE {
        return Err(CryptoError::DecryptionFailed(format!(
            "tag must be {TAG_SIZE} bytes, got {}",
            tag.len()
        )));
    }
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(nonce, aad, &mut buffer, Tag::from_slice(tag))
        .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".into()))?;
    Ok(buffer)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_with_same_aad() {
        let cek = ContentEncryptionKey::generate();
        let key = *cek.key_bytes();
        let out = cek.encrypt(b"{\"hello\":\"world\"}", b"protected").unwrap();

        let plain = decrypt_detached(&key, &out.nonce, &out.ciphertext, &out.tag, b"protected").unwrap();
        assert_eq!(plain, b"{\"hello\":\"world\"}");
    }

    #[test]
    fn ciphertext_has_no_embedded_tag() {
        let out = ContentEncryptionKey::generate().encrypt(&[0u8; 40], b"").unwrap();
        assert_eq!(out.ciphertext.len(), 40);
    }

    #[test]
    fn wrong_aad_fails() {
        let cek = ContentEncryptionKey::generate();
        let key = *cek.key_bytes();
        let out = cek.encrypt(b"payload", b"aad-1").unwrap();
        let err = decrypt_detached(&key, &out.nonce, &out.ciphertext, &out.tag, b"aad-2").unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed(_)));
    }

    #[test]
    fn flipped_tag_fails() {
        let cek = ContentEncryptionKey::generate();
        let key = *cek.key_bytes();
        let mut out = cek.encrypt(b"payload", b"").unwrap();
        out.tag[0] ^= 0x01;
        assert!(decrypt_detached(&key, &out.nonce, &out.ciphertext, &out.tag, b"").is_err());
    }

    #[test]
    fn from_parts_validates_lengths() {
        assert!(matches!(
            ContentEncryptionKey::from_parts(&[0u8; 16], &[0u8; NONCE_SIZE]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
        assert!(matches!(
            ContentEncryptionKey::from_parts(&[0u8; 32], &[0u8; 12]),
            Err(CryptoError::InvalidNonceLength { expected: 24, actual: 12 })
        ));
    }

    #[test]
    fn short_tag_is_rejected_without_panicking() {
        let key = [0u8; KEY_SIZE];
        let nonce = [0u8; NONCE_SIZE];
        assert!(decrypt_detached(&key, &nonce, b"x", &[0u8; 3], b"").is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let debug = format!("{:?}", ContentEncryptionKey::generate());
        assert!(debug.contains("REDACTED"));
    }
}
