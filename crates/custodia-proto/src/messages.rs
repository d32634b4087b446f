//! Request/response message shapes.
//!
//! Messages are plain structs. [`ProtocolMessage::validate`] is the single
//! check applied at the deserialization boundary: the `@type` matches,
//! required fields are present, and hex fields decode.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::types;

/// Common behaviour of every wire message.
pub trait ProtocolMessage: Serialize + DeserializeOwned + Send + Sync {
    const MESSAGE_TYPE: &'static str;

    fn id(&self) -> &str;

    fn message_type(&self) -> &str;

    /// Field-level checks beyond the type tag.
    fn validate_fields(&self) -> Result<(), ValidationError>;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.message_type() != Self::MESSAGE_TYPE {
            return Err(ValidationError::WrongType {
                expected: Self::MESSAGE_TYPE,
                actual: self.message_type().to_string(),
            });
        }
        check::text("@id", self.id())?;
        self.validate_fields()
    }

    fn to_value(&self) -> Result<Value, ValidationError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Read the `@type` tag of an undecoded message.
pub fn message_type_of(value: &Value) -> Option<&str> {
    value.get("@type").and_then(Value::as_str)
}

/// Decode and validate a message of a known type.
pub fn parse_message<M: ProtocolMessage>(value: Value) -> Result<M, ValidationError> {
    let actual = message_type_of(&value).ok_or(ValidationError::MissingType)?;
    if actual != M::MESSAGE_TYPE {
        return Err(ValidationError::WrongType {
            expected: M::MESSAGE_TYPE,
            actual: actual.to_string(),
        });
    }
    let message: M = serde_json::from_value(value)?;
    message.validate()?;
    Ok(message)
}

mod check {
    use crate::error::ValidationError;

    pub fn text(field: &'static str, value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field));
        }
        Ok(())
    }

    pub fn hex(field: &'static str, value: &str) -> Result<(), ValidationError> {
        text(field, value)?;
        opt_hex(field, value)
    }

    /// Empty is allowed; anything else must be hex.
    pub fn opt_hex(field: &'static str, value: &str) -> Result<(), ValidationError> {
        ::hex::decode(value)
            .map(drop)
            .map_err(|e| ValidationError::InvalidHex {
                field,
                reason: e.to_string(),
            })
    }
}

macro_rules! wire_message {
    (
        $(#[$meta:meta])*
        $name:ident => $uri:path {
            $( $field:ident : $rule:ident ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase", default)]
        pub struct $name {
            #[serde(rename = "@type")]
            pub message_type: String,
            #[serde(rename = "@id")]
            pub id: String,
            $( pub $field: String, )*
        }

        impl $name {
            /// New message with a fresh `@id`.
            pub fn new($( $field: impl Into<String> ),*) -> Self {
                Self {
                    message_type: $uri.to_string(),
                    id: uuid::Uuid::new_v4().to_string(),
                    $( $field: $field.into(), )*
                }
            }

            #[must_use]
            pub fn with_id(mut self, id: impl Into<String>) -> Self {
                self.id = id.into();
                self
            }
        }

        impl ProtocolMessage for $name {
            const MESSAGE_TYPE: &'static str = $uri;

            fn id(&self) -> &str {
                &self.id
            }

            fn message_type(&self) -> &str {
                &self.message_type
            }

            fn validate_fields(&self) -> Result<(), ValidationError> {
                $( check::$rule(stringify!($field), &self.$field)?; )*
                Ok(())
            }
        }
    };
}

wire_message! {
    /// Ask the custodian for the device's public key.
    PubKeyRequest => types::PUB_KEY_REQUEST {
        context_id: text,
    }
}

wire_message! {
    /// The device's Ed25519 public key, hex encoded.
    PubKeyResponse => types::PUB_KEY_RESPONSE {
        context_id: text,
        public_key: hex,
    }
}

wire_message! {
    /// Unwrap an Anoncrypt CEK. `nonce` is empty for sealed-box wraps.
    CekRequest => types::CEK_REQUEST {
        encrypted_key: hex,
        data_id: text,
        nonce: opt_hex,
    }
}

wire_message! {
    CekResponse => types::CEK_RESPONSE {
        payload_key: hex,
        data_id: text,
        sender_key: opt_hex,
    }
}

wire_message! {
    /// Wrap a locally generated CEK for `recipient_key`.
    DistributedPackRequest => types::DISTRIBUTED_PACK_REQUEST {
        cek: hex,
        recipient_key: hex,
        data_id: text,
    }
}

wire_message! {
    DistributedPackResponse => types::DISTRIBUTED_PACK_RESPONSE {
        encrypted_cek: hex,
        nonce: hex,
        data_id: text,
    }
}

wire_message! {
    /// Unwrap an Authcrypt CEK and reveal the sealed sender.
    DistributedUnpackRequest => types::DISTRIBUTED_UNPACK_REQUEST {
        encrypted_key: hex,
        sender_key: hex,
        data_id: text,
        nonce: hex,
    }
}

wire_message! {
    DistributedUnpackResponse => types::DISTRIBUTED_UNPACK_RESPONSE {
        payload_key: hex,
        data_id: text,
        sender_key: hex,
    }
}

wire_message! {
    /// Sign `data` (`protected.payload`, both base64url).
    SignatureExchangeRequest => types::SIGNATURE_EXCHANGE_REQUEST {
        label: text,
        data: text,
        data_id: text,
    }
}

wire_message! {
    /// Detached Ed25519 signature over the request's `data`, hex encoded.
    SignatureExchangeResponse => types::SIGNATURE_EXCHANGE_RESPONSE {
        data: hex,
        data_id: text,
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_camel_case_and_at_fields() {
        let msg = DistributedPackRequest::new("00ff", "abcd", "record-1").with_id("msg-1");
        assert_eq!(
            msg.to_value().unwrap(),
            json!({
                "@type": "https://didcomm.org/distribuited_pack/1.0/request",
                "@id": "msg-1",
                "cek": "00ff",
                "recipientKey": "abcd",
                "dataId": "record-1",
            })
        );
    }

    #[test]
    fn parse_accepts_valid_response() {
        let value = json!({
            "@type": types::PUB_KEY_RESPONSE,
            "@id": "m-1",
            "contextId": "ctx-1",
            "publicKey": "abcd",
        });
        let msg: PubKeyResponse = parse_message(value).unwrap();
        assert_eq!(msg.context_id, "ctx-1");
        assert_eq!(msg.public_key, "abcd");
    }

    #[test]
    fn missing_field_is_reported_by_name() {
        let value = json!({"@type": types::PUB_KEY_RESPONSE, "@id": "m-1", "contextId": "ctx-1"});
        assert!(matches!(
            parse_message::<PubKeyResponse>(value),
            Err(ValidationError::MissingField("public_key"))
        ));
    }

    #[test]
    fn non_hex_field_is_rejected() {
        let value = json!({
            "@type": types::SIGNATURE_EXCHANGE_RESPONSE,
            "@id": "m-1",
            "data": "not-hex",
            "dataId": "r-1",
        });
        assert!(matches!(
            parse_message::<SignatureExchangeResponse>(value),
            Err(ValidationError::InvalidHex { field: "data", .. })
        ));
    }

    #[test]
    fn wrong_type_is_rejected_before_decoding() {
        let value = json!({"@type": types::CEK_RESPONSE, "@id": "m-1"});
        assert!(matches!(
            parse_message::<PubKeyResponse>(value),
            Err(ValidationError::WrongType { .. })
        ));
        assert!(matches!(
            parse_message::<PubKeyResponse>(json!({"@id": "m-1"})),
            Err(ValidationError::MissingType)
        ));
    }

    #[test]
    fn cek_request_allows_empty_nonce() {
        let msg = CekRequest::new("0a0b", "record-1", "");
        msg.validate().unwrap();
    }

    #[test]
    fn constructors_generate_distinct_ids() {
        let a = PubKeyRequest::new("ctx");
        let b = PubKeyRequest::new("ctx");
        assert_ne!(a.id, b.id);
        assert_eq!(a.message_type, PubKeyRequest::MESSAGE_TYPE);
    }
}
