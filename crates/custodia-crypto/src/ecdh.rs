//! ECDH boxes over X25519 (`crypto_box`, libsodium compatible).
//!
//! - `seal` / `seal_open`: anonymous sealed box, the sender is not identified
//! - `box_encrypt` / `box_open`: authenticated XSalsa20-Poly1305 box between
//!   two static keys with an explicit 24-byte nonce

use crypto_box::aead::Aead;
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::CryptoError;

pub const BOX_NONCE_SIZE: usize = 24;

/// Random nonce for an authenticated box.
pub fn random_nonce() -> [u8; BOX_NONCE_SIZE] {
    let mut nonce = [0u8; BOX_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Anonymously seal `message` to an X25519 public key.
pub fn seal(recipient: &[u8; 32], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    PublicKey::from(*recipient)
        .seal(&mut OsRng, message)
        .map_err(|e| CryptoError::EncryptionFailed(format!("sealed box: {e}")))
}

/// Open a sealed box with the recipient's X25519 secret.
pub fn seal_open(recipient_secret: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    SecretKey::from(*recipient_secret)
        .unseal(ciphertext)
        .map_err(|_| CryptoError::BoxOpenFailed("sealed box could not be opened".into()))
}

fn box_nonce(nonce: &[u8]) -> Result<&GenericArray<u8, crypto_box::aead::consts::U24>, CryptoError> {
    if nonce.len() != BOX_NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: BOX_NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    Ok(GenericArray::from_slice(nonce))
}

/// Authenticated box from `sender_secret` to `recipient`.
pub fn box_encrypt(
    recipient: &[u8; 32],
    sender_secret: &[u8; 32],
    nonce: &[u8],
    message: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let salsa = SalsaBox::new(&PublicKey::from(*recipient), &SecretKey::from(*sender_secret));
    salsa
        .encrypt(box_nonce(nonce)?, message)
        .map_err(|e| CryptoError::EncryptionFailed(format!("crypto box: {e}")))
}

/// Open an authenticated box sent by `sender` to the holder of `recipient_secret`.
pub fn box_open(
    sender: &[u8; 32],
    recipient_secret: &[u8; 32],
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let salsa = SalsaBox::new(&PublicKey::from(*sender), &SecretKey::from(*recipient_secret));
    salsa
        .decrypt(box_nonce(nonce)?, ciphertext)
        .map_err(|_| CryptoError::BoxOpenFailed("authenticated box could not be opened".into()))
}
