//! Key store: per-operation CEKs plus ECDH/AEAD primitives.
//!
//! On a device the store only ever holds content encryption keys, each
//! scoped to one protocol record. A custodian additionally registers its
//! Ed25519 key pairs so the ECDH operations can run against them.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::aead::{self, AeadOutput, ContentEncryptionKey};
use crate::ecdh;
use crate::error::CryptoError;
use crate::keys::{Key, KeyPair};

/// Operations a key store exposes to the protocol services.
pub trait KeyStore: Send + Sync {
    /// Generate a CEK bound to `correlation_id` and keep it until taken.
    fn create_cek(&self, correlation_id: &str) -> Result<ContentEncryptionKey, CryptoError>;

    /// Remove and return the CEK bound to `correlation_id`.
    fn take_cek(&self, correlation_id: &str) -> Result<ContentEncryptionKey, CryptoError>;

    /// Drop a CEK without using it. Unknown ids are ignored.
    fn discard_cek(&self, correlation_id: &str);

    /// Anonymously seal `message` to `recipient`.
    fn ecdh_seal(&self, recipient: &Key, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        ecdh::seal(&recipient.to_x25519()?, message)
    }

    /// Authenticated box from a locally held `sender` key to `recipient`.
    fn ecdh_box(
        &self,
        recipient: &Key,
        sender: &Key,
        nonce: &[u8],
        message: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Open an authenticated box addressed to a locally held `recipient` key.
    /// Without `sender` the ciphertext is treated as a sealed box.
    fn ecdh_open(
        &self,
        recipient: &Key,
        sender: Option<&Key>,
        nonce: Option<&[u8]>,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Sign with a locally held key.
    fn sign(&self, signer: &Key, message: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn aead_encrypt(
        &self,
        cek: ContentEncryptionKey,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<AeadOutput, CryptoError> {
        cek.encrypt(plaintext, aad)
    }

    fn aead_decrypt(
        &self,
        key: &[u8],
        nonce: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        aead::decrypt_detached(key, nonce, ciphertext, tag, aad)
    }
}

/// In-process key store.
#[derive(Debug, Default)]
pub struct LocalKeyStore {
    ceks: Mutex<HashMap<String, ContentEncryptionKey>>,
    key_pairs: Mutex<HashMap<String, KeyPair>>,
}

impl LocalKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a key pair available for ECDH and signing, keyed by its base58 id.
    pub fn insert_key_pair(&self, key_pair: KeyPair) -> Key {
        let public = key_pair.public_key();
        self.key_pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(public.public_key_base58(), key_pair);
        public
    }

    pub fn pending_ceks(&self) -> usize {
        self.ceks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn key_pair(&self, key: &Key) -> Result<KeyPair, CryptoError> {
        let kid = key.public_key_base58();
        self.key_pairs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kid)
            .cloned()
            .ok_or(CryptoError::KeyNotFound(kid))
    }
}

impl KeyStore for LocalKeyStore {
    fn create_cek(&self, correlation_id: &str) -> Result<ContentEncryptionKey, CryptoError> {
        let cek = ContentEncryptionKey::generate();
        self.ceks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(correlation_id.to_string(), cek.clone());
        debug!(correlation_id, "CEK created");
        Ok(cek)
    }

    fn take_cek(&self, correlation_id: &str) -> Result<ContentEncryptionKey, CryptoError> {
        self.ceks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(correlation_id)
            .ok_or_else(|| CryptoError::CekNotFound(correlation_id.to_string()))
    }

    fn discard_cek(&self, correlation_id: &str) {
        if self
            .ceks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(correlation_id)
            .is_some()
        {
            debug!(correlation_id, "CEK discarded");
        }
    }

    fn ecdh_box(
        &self,
        recipient: &Key,
        sender: &Key,
        nonce: &[u8],
        message: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let sender = self.key_pair(sender)?;
        ecdh::box_encrypt(
            &recipient.to_x25519()?,
            &sender.to_x25519_secret(),
            nonce,
            message,
        )
    }

    fn ecdh_open(
        &self,
        recipient: &Key,
        sender: Option<&Key>,
        nonce: Option<&[u8]>,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let recipient = self.key_pair(recipient)?;
        let secret = recipient.to_x25519_secret();
        match (sender, nonce) {
            (Some(sender), Some(nonce)) => {
                ecdh::box_open(&sender.to_x25519()?, &secret, nonce, ciphertext)
            }
            (None, None) => ecdh::seal_open(&secret, ciphertext),
            _ => Err(CryptoError::BoxOpenFailed(
                "sender and nonce must be given together".into(),
            )),
        }
    }

    fn sign(&self, signer: &Key, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.key_pair(signer)?.sign(message).to_vec())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cek_is_scoped_to_one_correlation_id() {
        let store = LocalKeyStore::new();
        let a = store.create_cek("record-a").unwrap();
        let b = store.create_cek("record-b").unwrap();
        assert_ne!(a.key_bytes(), b.key_bytes());

        let taken = store.take_cek("record-a").unwrap();
        assert_eq!(taken.key_bytes(), a.key_bytes());
        assert_eq!(taken.nonce(), a.nonce());
        assert_eq!(store.pending_ceks(), 1);
    }

    #[test]
    fn cek_can_only_be_taken_once() {
        let store = LocalKeyStore::new();
        store.create_cek("record-a").unwrap();
        store.take_cek("record-a").unwrap();
        assert!(matches!(
            store.take_cek("record-a"),
            Err(CryptoError::CekNotFound(id)) if id == "record-a"
        ));
    }

    #[test]
    fn discard_drops_cek() {
        let store = LocalKeyStore::new();
        store.create_cek("record-a").unwrap();
        store.discard_cek("record-a");
        store.discard_cek("never-created");
        assert_eq!(store.pending_ceks(), 0);
    }

    #[test]
    fn box_then_open_through_store() {
        let store = LocalKeyStore::new();
        let sender = store.insert_key_pair(KeyPair::generate());
        let recipient = store.insert_key_pair(KeyPair::generate());
        let nonce = ecdh::random_nonce();

        let boxed = store.ecdh_box(&recipient, &sender, &nonce, b"cek").unwrap();
        let opened = store
            .ecdh_open(&recipient, Some(&sender), Some(&nonce), &boxed)
            .unwrap();
        assert_eq!(opened, b"cek");
    }

    #[test]
    fn seal_then_open_through_store() {
        let store = LocalKeyStore::new();
        let recipient = store.insert_key_pair(KeyPair::generate());
        let sealed = store.ecdh_seal(&recipient, b"cek").unwrap();
        assert_eq!(store.ecdh_open(&recipient, None, None, &sealed).unwrap(), b"cek");
    }

    #[test]
    fn unknown_key_is_reported() {
        let store = LocalKeyStore::new();
        let stranger = KeyPair::generate().public_key();
        assert!(matches!(
            store.sign(&stranger, b"data"),
            Err(CryptoError::KeyNotFound(_))
        ));
    }

    #[test]
    fn aead_defaults_roundtrip() {
        let store = LocalKeyStore::new();
        let cek = store.create_cek("record-a").unwrap();
        let key = *cek.key_bytes();
        let out = store.aead_encrypt(cek, b"body", b"aad").unwrap();
        let plain = store
            .aead_decrypt(&key, &out.nonce, &out.ciphertext, &out.tag, b"aad")
            .unwrap();
        assert_eq!(plain, b"body");
    }
}
