//! Pack and unpack, whole or split across a custodian.
//!
//! `pack`/`unpack` do everything locally with a private key. The
//! `*_with_external_cek` pair only performs the body half: the CEK was
//! wrapped or unwrapped by whoever holds the private key.

use base64::Engine as _;
use serde_json::Value;
use tracing::debug;

use super::{
    BASE64_URL, EncryptedMessage, EnvelopeError, PackAlgorithm, ProtectedHeader, Recipient,
    RecipientHeader, b64url_decode,
};
use crate::aead::{self, ContentEncryptionKey};
use crate::ecdh;
use crate::error::CryptoError;
use crate::keys::{Key, KeyPair, KeyType, PUBLIC_KEY_SIZE};

/// Result of a successful unpack.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedMessage {
    pub plaintext: Value,
    pub sender_key: Option<Key>,
    pub recipient_key: Key,
}

fn encrypt_body(
    cek: ContentEncryptionKey,
    header: &ProtectedHeader,
    payload: &Value,
) -> Result<EncryptedMessage, EnvelopeError> {
    let protected = header.encode()?;
    let plaintext = serde_json::to_vec(payload).map_err(CryptoError::from)?;
    let out = cek.encrypt(&plaintext, protected.as_bytes())?;
    Ok(EncryptedMessage {
        protected,
        iv: BASE64_URL.encode(out.nonce),
        ciphertext: BASE64_URL.encode(&out.ciphertext),
        tag: BASE64_URL.encode(out.tag),
    })
}

/// Pack `payload` for every recipient key.
///
/// With a `sender` the envelope is Authcrypt: the sender's public key is
/// sealed to each recipient and the CEK is boxed under recipient/sender
/// ECDH. Without one the CEK is sealed directly (Anoncrypt).
pub fn pack(
    payload: &Value,
    recipient_keys: &[Key],
    sender: Option<&KeyPair>,
) -> Result<EncryptedMessage, EnvelopeError> {
    if recipient_keys.is_empty() {
        return Err(EnvelopeError::NoRecipients);
    }
    let cek = ContentEncryptionKey::generate();
    let sender_secret = sender.map(KeyPair::to_x25519_secret);
    let sender_public = sender.map(KeyPair::public_key);

    let mut recipients = Vec::with_capacity(recipient_keys.len());
    for recipient_key in recipient_keys {
        let recipient_x = recipient_key.to_x25519()?;
        let kid = recipient_key.public_key_base58();

        let entry = match (&sender_secret, &sender_public) {
            (Some(secret), Some(public)) => {
                let encrypted_sender = ecdh::seal(&recipient_x, public.public_key())?;
                let nonce = ecdh::random_nonce();
                let encrypted_key =
                    ecdh::box_encrypt(&recipient_x, secret, &nonce, cek.key_bytes())?;
                Recipient {
                    encrypted_key: BASE64_URL.encode(encrypted_key),
                    header: RecipientHeader {
                        kid,
                        sender: Some(BASE64_URL.encode(encrypted_sender)),
                        iv: Some(BASE64_URL.encode(nonce)),
                    },
                }
            }
            _ => Recipient {
                encrypted_key: BASE64_URL.encode(ecdh::seal(&recipient_x, cek.key_bytes())?),
                header: RecipientHeader {
                    kid,
                    sender: None,
                    iv: None,
                },
            },
        };
        recipients.push(entry);
    }

    let alg = if sender.is_some() {
        PackAlgorithm::Authcrypt
    } else {
        PackAlgorithm::Anoncrypt
    };
    debug!(%alg, recipients = recipients.len(), "Packing envelope");
    encrypt_body(cek, &ProtectedHeader::new(alg, recipients), payload)
}

/// Sender keys are sealed as the raw 32-byte public key; envelopes from
/// older packers carry the base58 text instead.
fn decode_sender_key(opened: &[u8]) -> Result<Key, EnvelopeError> {
    if opened.len() == PUBLIC_KEY_SIZE {
        return Ok(Key::ed25519(opened.to_vec()));
    }
    let text = std::str::from_utf8(opened)
        .map_err(|_| EnvelopeError::MalformedHeader("sealed sender is not a key".into()))?;
    Ok(Key::from_public_key_base58(text, KeyType::Ed25519)?)
}

/// Unpack an envelope addressed to `recipient`.
pub fn unpack(
    message: &EncryptedMessage,
    recipient: &KeyPair,
) -> Result<UnpackedMessage, EnvelopeError> {
    let header = message.protected_header()?;
    let alg = header.algorithm()?;
    let recipient_key = recipient.public_key();
    let entry = header.recipient(&recipient_key.public_key_base58())?;
    let authcrypt = entry.authcrypt_material()?;
    let encrypted_key = entry.encrypted_key_bytes()?;
    let recipient_secret = recipient.to_x25519_secret();

    let (cek, sender_key) = match authcrypt {
        Some(material) => {
            let opened = ecdh::seal_open(&recipient_secret, &material.encrypted_sender)?;
            let sender_key = decode_sender_key(&opened)?;
            let sender_x = sender_key.to_x25519()?;
            let cek = ecdh::box_open(&sender_x, &recipient_secret, &material.nonce, &encrypted_key)?;
            (cek, Some(sender_key))
        }
        None => (ecdh::seal_open(&recipient_secret, &encrypted_key)?, None),
    };

    if alg == PackAlgorithm::Authcrypt && sender_key.is_none() {
        return Err(EnvelopeError::SenderKeyRequired);
    }

    let plaintext = unpack_with_external_cek(message, &cek)?;
    Ok(UnpackedMessage {
        plaintext,
        sender_key,
        recipient_key,
    })
}

/// Authcrypt-pack with a CEK whose wrap (`wrapped_cek` under `cek_nonce`)
/// was produced by the sender's custodian.
///
/// Only the sealed sender field and the AEAD body are computed here.
pub fn pack_with_external_cek(
    cek: ContentEncryptionKey,
    cek_nonce: &[u8],
    wrapped_cek: &[u8],
    payload: &Value,
    recipient_key: &Key,
    sender_key: Option<&Key>,
) -> Result<EncryptedMessage, EnvelopeError> {
    let sender_key = sender_key.ok_or(EnvelopeError::MissingSenderKey)?;
    let recipient_x = recipient_key.to_x25519()?;
    let encrypted_sender = ecdh::seal(&recipient_x, sender_key.public_key())?;

    let recipient = Recipient {
        encrypted_key: BASE64_URL.encode(wrapped_cek),
        header: RecipientHeader {
            kid: recipient_key.public_key_base58(),
            sender: Some(BASE64_URL.encode(encrypted_sender)),
            iv: Some(BASE64_URL.encode(cek_nonce)),
        },
    };
    debug!(kid = %recipient.header.kid, "Packing envelope with external CEK");
    encrypt_body(
        cek,
        &ProtectedHeader::new(PackAlgorithm::Authcrypt, vec![recipient]),
        payload,
    )
}

/// Decrypt the body with a CEK unwrapped elsewhere. Recipient and sender
/// headers are not consulted.
pub fn unpack_with_external_cek(
    message: &EncryptedMessage,
    cek: &[u8],
) -> Result<Value, EnvelopeError> {
    let nonce = b64url_decode("iv", &message.iv)?;
    let ciphertext = b64url_decode("ciphertext", &message.ciphertext)?;
    let tag = b64url_decode("tag", &message.tag)?;
    let plaintext = aead::decrypt_detached(
        cek,
        &nonce,
        &ciphertext,
        &tag,
        message.protected.as_bytes(),
    )?;
    serde_json::from_slice(&plaintext).map_err(|e| {
        CryptoError::DecryptionFailed(format!("payload is not JSON: {e}")).into()
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flip_first_byte(field: &str) -> String {
        let mut bytes = BASE64_URL.decode(field).unwrap();
        bytes[0] ^= 0x01;
        BASE64_URL.encode(bytes)
    }

    #[test]
    fn authcrypt_roundtrip_recovers_sender() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let payload = json!({"@type": "https://didcomm.org/basicmessage/1.0/message", "content": "hi"});

        let packed = pack(&payload, &[recipient.public_key()], Some(&sender)).unwrap();
        let unpacked = unpack(&packed, &recipient).unwrap();

        assert_eq!(unpacked.plaintext, payload);
        assert_eq!(unpacked.sender_key, Some(sender.public_key()));
        assert_eq!(unpacked.recipient_key, recipient.public_key());
        assert_eq!(packed.protected_header().unwrap().alg, "Authcrypt");
    }

    #[test]
    fn anoncrypt_roundtrip_has_no_sender() {
        let recipient = KeyPair::generate();
        let payload = json!({"hello": "world"});

        let packed = pack(&payload, &[recipient.public_key()], None).unwrap();
        let header = packed.protected_header().unwrap();
        assert_eq!(header.alg, "Anoncrypt");
        assert!(header.recipients[0].header.sender.is_none());
        assert!(header.recipients[0].header.iv.is_none());

        let unpacked = unpack(&packed, &recipient).unwrap();
        assert_eq!(unpacked.plaintext, payload);
        assert_eq!(unpacked.sender_key, None);
    }

    #[test]
    fn every_recipient_can_unpack() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let payload = json!({"n": 1});

        let packed = pack(&payload, &[alice.public_key(), bob.public_key()], None).unwrap();
        assert_eq!(unpack(&packed, &alice).unwrap().plaintext, payload);
        assert_eq!(unpack(&packed, &bob).unwrap().plaintext, payload);
    }

    #[test]
    fn stranger_is_not_a_recipient() {
        let packed = pack(&json!({}), &[KeyPair::generate().public_key()], None).unwrap();
        assert!(matches!(
            unpack(&packed, &KeyPair::generate()),
            Err(EnvelopeError::RecipientNotFound(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_or_tag_fails_decryption() {
        let recipient = KeyPair::generate();
        let packed = pack(&json!({"a": "b"}), &[recipient.public_key()], None).unwrap();

        let mut bad_ct = packed.clone();
        bad_ct.ciphertext = flip_first_byte(&packed.ciphertext);
        assert!(matches!(
            unpack(&bad_ct, &recipient),
            Err(EnvelopeError::Crypto(CryptoError::DecryptionFailed(_)))
        ));

        let mut bad_tag = packed.clone();
        bad_tag.tag = flip_first_byte(&packed.tag);
        assert!(matches!(
            unpack(&bad_tag, &recipient),
            Err(EnvelopeError::Crypto(CryptoError::DecryptionFailed(_)))
        ));
    }

    #[test]
    fn re_encoded_protected_header_breaks_aad() {
        let recipient = KeyPair::generate();
        let packed = pack(&json!({"a": "b"}), &[recipient.public_key()], None).unwrap();

        // Same header semantics, different bytes.
        let mut json = BASE64_URL.decode(&packed.protected).unwrap();
        json.push(b' ');
        let mut tampered = packed.clone();
        tampered.protected = BASE64_URL.encode(json);

        assert!(matches!(
            unpack(&tampered, &recipient),
            Err(EnvelopeError::Crypto(CryptoError::DecryptionFailed(_)))
        ));
    }

    #[test]
    fn unsupported_algorithm_is_rejected_before_key_work() {
        let recipient = KeyPair::generate();
        let packed = pack(&json!({}), &[recipient.public_key()], None).unwrap();
        let mut header = packed.protected_header().unwrap();
        header.alg = "ECDH-ES".into();
        let mut forged = packed.clone();
        forged.protected = header.encode().unwrap();

        assert!(matches!(
            unpack(&forged, &recipient),
            Err(EnvelopeError::UnsupportedPackAlgorithm(_))
        ));
    }

    #[test]
    fn lone_sender_or_iv_violates_header_invariant() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let packed = pack(&json!({}), &[recipient.public_key()], Some(&sender)).unwrap();

        let mut header = packed.protected_header().unwrap();
        header.recipients[0].header.iv = None;
        let mut missing_iv = packed.clone();
        missing_iv.protected = header.encode().unwrap();
        assert!(matches!(unpack(&missing_iv, &recipient), Err(EnvelopeError::MissingIv)));

        let anon = pack(&json!({}), &[recipient.public_key()], None).unwrap();
        let mut header = anon.protected_header().unwrap();
        header.recipients[0].header.iv = Some(BASE64_URL.encode([0u8; 24]));
        let mut unexpected_iv = anon.clone();
        unexpected_iv.protected = header.encode().unwrap();
        assert!(matches!(unpack(&unexpected_iv, &recipient), Err(EnvelopeError::UnexpectedIv)));
    }

    #[test]
    fn authcrypt_label_without_sender_requires_sender_key() {
        let recipient = KeyPair::generate();
        let anon = pack(&json!({}), &[recipient.public_key()], None).unwrap();
        let mut header = anon.protected_header().unwrap();
        header.alg = "Authcrypt".into();
        let mut relabelled = anon.clone();
        relabelled.protected = header.encode().unwrap();

        assert!(matches!(
            unpack(&relabelled, &recipient),
            Err(EnvelopeError::SenderKeyRequired)
        ));
    }

    #[test]
    fn legacy_base58_sealed_sender_is_accepted() {
        let sender = KeyPair::generate();
        let opened = sender.public_key().public_key_base58().into_bytes();
        assert_eq!(decode_sender_key(&opened).unwrap(), sender.public_key());
    }

    #[test]
    fn external_cek_pack_matches_local_unpack() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let payload = json!({"hello": "world"});

        // Custodian side: box the CEK under sender/recipient ECDH.
        let cek = ContentEncryptionKey::generate();
        let nonce = ecdh::random_nonce();
        let wrapped = ecdh::box_encrypt(
            &recipient.public_key().to_x25519().unwrap(),
            &sender.to_x25519_secret(),
            &nonce,
            cek.key_bytes(),
        )
        .unwrap();

        let packed = pack_with_external_cek(
            cek,
            &nonce,
            &wrapped,
            &payload,
            &recipient.public_key(),
            Some(&sender.public_key()),
        )
        .unwrap();

        let header = packed.protected_header().unwrap();
        assert_eq!(header.alg, "Authcrypt");
        assert_eq!(header.recipients.len(), 1);
        assert_eq!(header.recipients[0].header.kid, recipient.public_key().public_key_base58());

        let unpacked = unpack(&packed, &recipient).unwrap();
        assert_eq!(unpacked.plaintext, payload);
        assert_eq!(unpacked.sender_key, Some(sender.public_key()));
    }

    #[test]
    fn external_cek_pack_requires_sender() {
        let recipient = KeyPair::generate();
        let err = pack_with_external_cek(
            ContentEncryptionKey::generate(),
            &[0u8; 24],
            b"wrapped",
            &json!({}),
            &recipient.public_key(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EnvelopeError::MissingSenderKey));
    }

    #[test]
    fn external_cek_unpack_decrypts_body_only() {
        let recipient = KeyPair::generate();
        let packed = pack(&json!({"k": "v"}), &[recipient.public_key()], None).unwrap();
        let header = packed.protected_header().unwrap();
        let wrapped = header.recipients[0].encrypted_key_bytes().unwrap();
        let cek = ecdh::seal_open(&recipient.to_x25519_secret(), &wrapped).unwrap();

        assert_eq!(unpack_with_external_cek(&packed, &cek).unwrap(), json!({"k": "v"}));
        assert!(unpack_with_external_cek(&packed, &[0u8; 32]).is_err());
    }

    #[test]
    fn invalid_recipient_key_fails_conversion() {
        let err = pack(&json!({}), &[Key::ed25519(vec![1, 2, 3])], None).unwrap_err();
        assert!(matches!(err, EnvelopeError::Crypto(CryptoError::InvalidKeyLength { .. })));
    }
}
