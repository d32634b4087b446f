//! Ed25519 identity keys.
//!
//! A [`Key`] is a public key as it travels through envelopes and wire
//! messages (base58 `kid`, hex on the custodian topics). A [`KeyPair`] holds
//! the signing seed and only exists where private-key operations are
//! allowed: the custodian, or a test harness standing in for one.

use std::path::Path;

use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::envelope::BASE64_URL;
use crate::error::CryptoError;

/// Multicodec prefix for an Ed25519 public key (`0xed` as unsigned varint).
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Ed25519,
    X25519,
}

/// A public key of a known type.
///
/// The bytes are not validated on construction; anything the custodian
/// returns is kept as-is and only checked when a curve operation needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    public_key: Vec<u8>,
    key_type: KeyType,
}

impl Key {
    pub fn from_public_key(public_key: impl Into<Vec<u8>>, key_type: KeyType) -> Self {
        Self {
            public_key: public_key.into(),
            key_type,
        }
    }

    pub fn ed25519(public_key: impl Into<Vec<u8>>) -> Self {
        Self::from_public_key(public_key, KeyType::Ed25519)
    }

    pub fn from_public_key_base58(encoded: &str, key_type: KeyType) -> Result<Self, CryptoError> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| CryptoError::Encoding(format!("invalid base58 key: {e}")))?;
        Ok(Self::from_public_key(bytes, key_type))
    }

    pub fn from_public_key_hex(encoded: &str, key_type: KeyType) -> Result<Self, CryptoError> {
        let bytes = hex::decode(encoded)
            .map_err(|e| CryptoError::Encoding(format!("invalid hex key: {e}")))?;
        Ok(Self::from_public_key(bytes, key_type))
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub const fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Base58 form, used as the recipient `kid` in envelope headers.
    pub fn public_key_base58(&self) -> String {
        bs58::encode(&self.public_key).into_string()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.public_key)
    }

    fn public_key_array(&self) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
        <[u8; PUBLIC_KEY_SIZE]>::try_from(self.public_key.as_slice()).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: self.public_key.len(),
            }
        })
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        if self.key_type != KeyType::Ed25519 {
            return Err(CryptoError::KeyConversion(format!(
                "{:?} key cannot verify signatures",
                self.key_type
            )));
        }
        VerifyingKey::from_bytes(&self.public_key_array()?)
            .map_err(|e| CryptoError::KeyConversion(e.to_string()))
    }

    /// The X25519 (Montgomery) form of this key for ECDH.
    pub fn to_x25519(&self) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
        match self.key_type {
            KeyType::X25519 => self.public_key_array(),
            KeyType::Ed25519 => Ok(self.verifying_key()?.to_montgomery().to_bytes()),
        }
    }

    /// `did:key` identifier (`z` + base58btc of the multicodec-prefixed key).
    pub fn did_key(&self) -> String {
        let mut prefixed = Vec::with_capacity(ED25519_MULTICODEC.len() + self.public_key.len());
        prefixed.extend_from_slice(&ED25519_MULTICODEC);
        prefixed.extend_from_slice(&self.public_key);
        format!("did:key:z{}", bs58::encode(prefixed).into_string())
    }

    /// Public JWK (`OKP`/`Ed25519`) as embedded in a JWS protected header.
    pub fn to_jwk(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": BASE64_URL.encode(&self.public_key),
        })
    }

    /// Verify a detached Ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let bytes = <[u8; SIGNATURE_SIZE]>::try_from(signature).map_err(|_| {
            CryptoError::InvalidSignature(format!(
                "expected {SIGNATURE_SIZE} bytes, got {}",
                signature.len()
            ))
        })?;
        self.verifying_key()?
            .verify(message, &Signature::from_bytes(&bytes))
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

/// An Ed25519 signing key pair.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key().public_key_base58())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct from a raw 32-byte seed.
    pub fn from_seed(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut seed = <[u8; 32]>::try_from(bytes).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing })
    }

    pub fn public_key(&self) -> Key {
        Key::ed25519(self.signing.verifying_key().to_bytes().to_vec())
    }

    /// The seed. Handle with care.
    pub fn seed_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    /// X25519 secret scalar derived from the seed, matching libsodium's
    /// `crypto_sign_ed25519_sk_to_curve25519`.
    pub fn to_x25519_secret(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_scalar_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }

    /// Save the seed to a file with restrictive permissions.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        let dir = path.parent().ok_or_else(|| {
            CryptoError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no parent directory",
            ))
        })?;
        std::fs::create_dir_all(dir)?;

        let seed = self.seed_bytes();
        std::fs::write(path, seed.as_slice())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Load a key pair from a file containing the 32-byte seed.
    ///
    /// On Unix, the file must be owner-only (0600).
    pub fn load_from_file(path: &Path) -> Result<Self, CryptoError> {
        use std::io::Read;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
            if mode != 0o600 {
                return Err(CryptoError::IoError(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("Key file has insecure permissions: {mode:o} (expected 600)"),
                )));
            }
        }

        let mut file = std::fs::File::open(path)?;
        let mut buf = Zeroizing::new([0u8; 32]);
        file.read_exact(buf.as_mut_slice())?;
        Self::from_seed(buf.as_slice())
    }

    /// Load from file, or generate a new key pair and save it.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            let kp = Self::generate();
            kp.save_to_file(path)?;
            Ok(kp)
        }
    }
}

/// Compute a colon-separated hex SHA-256 fingerprint of raw public key bytes.
pub fn fingerprint_of(pubkey_bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(pubkey_bytes);
    hash.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base58_roundtrip_preserves_bytes() {
        let kp = KeyPair::generate();
        let key = kp.public_key();
        let decoded = Key::from_public_key_base58(&key.public_key_base58(), KeyType::Ed25519).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn short_hex_key_is_kept_verbatim() {
        let key = Key::from_public_key_hex("abcd", KeyType::Ed25519).unwrap();
        assert_eq!(key.public_key(), &[0xab, 0xcd]);
        assert_eq!(key.key_type(), KeyType::Ed25519);
    }

    #[test]
    fn short_key_cannot_convert_to_x25519() {
        let key = Key::ed25519(vec![0xab, 0xcd]);
        assert!(matches!(
            key.to_x25519(),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 2 })
        ));
    }

    #[test]
    fn invalid_hex_is_an_encoding_error() {
        assert!(matches!(
            Key::from_public_key_hex("zz", KeyType::Ed25519),
            Err(CryptoError::Encoding(_))
        ));
    }

    #[test]
    fn x25519_conversion_matches_secret_side() {
        let kp = KeyPair::generate();
        let public_x = kp.public_key().to_x25519().unwrap();
        let secret_x = crypto_box::SecretKey::from(*kp.to_x25519_secret());
        assert_eq!(secret_x.public_key().as_bytes(), &public_x);
    }

    #[test]
    fn signature_verifies_and_rejects_tampering() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"header.payload");
        kp.public_key().verify(b"header.payload", &sig).unwrap();
        assert!(matches!(
            kp.public_key().verify(b"header.payloaD", &sig),
            Err(CryptoError::InvalidSignature(_))
        ));
    }

    #[test]
    fn did_key_uses_multibase_z_prefix() {
        let kp = KeyPair::from_seed(&[7u8; 32]).unwrap();
        let did = kp.public_key().did_key();
        assert!(did.starts_with("did:key:z6Mk"), "unexpected did: {did}");
    }

    #[test]
    fn jwk_carries_base64url_x() {
        let key = Key::ed25519(vec![0u8; 32]);
        let jwk = key.to_jwk();
        assert_eq!(jwk["kty"], "OKP");
        assert_eq!(jwk["crv"], "Ed25519");
        assert_eq!(jwk["x"], "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
    }

    #[test]
    fn debug_redacts_secret() {
        let kp = KeyPair::generate();
        let debug = format!("{kp:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains(&hex::encode(*kp.seed_bytes())));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custodian.key");
        let kp = KeyPair::generate();
        kp.save_to_file(&path).unwrap();

        let loaded = KeyPair::load_from_file(&path).unwrap();
        assert_eq!(loaded.public_key(), kp.public_key());
    }

    #[test]
    fn load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("custodian.key");
        let first = KeyPair::load_or_generate(&path).unwrap();
        let second = KeyPair::load_or_generate(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[cfg(unix)]
    #[test]
    fn load_rejects_world_readable_file() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custodian.key");
        std::fs::write(&path, [1u8; 32]).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(KeyPair::load_from_file(&path).is_err());
    }

    #[test]
    fn fingerprint_is_colon_separated_sha256() {
        let fp = fingerprint_of(&[0u8; 32]);
        assert_eq!(fp.split(':').count(), 32);
    }
}
