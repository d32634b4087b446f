use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use custodia_crypto::envelope::BASE64_URL;
use custodia_crypto::{CryptoError, Key, KeyType};
use custodia_proto::{
    ProtocolMessage, SignatureExchangeRequest, SignatureExchangeResponse, parse_message,
};
use serde_json::{Value, json};

use super::record::{CONNECTION_ID_TAG, SignatureExchangeRecord, SignatureExchangeState};
use crate::error::{AgentError, Result};
use crate::protocols::pubkey::PubKeyService;
use crate::protocols::{RecordLifecycle, ServiceContext, decode_hex};
use crate::record::{ExchangeRole, generate_record_id};
use crate::storage::Tags;
use crate::transport::{HandlerOutcome, MessageHandler};

/// Attachment slot the signed DID document goes into.
pub const DID_DOC_ATTACHMENT: &str = "did_doc~attach";

const JWS_ALG: &str = "EdDSA";

/// A connection message with its DID document signed.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedMessage {
    pub record_id: String,
    pub message: Value,
    pub connection_id: String,
    pub parent_id: String,
}

impl SignedMessage {
    fn from_record(record: SignatureExchangeRecord, message: Value) -> Self {
        Self {
            record_id: record.id,
            message,
            connection_id: record.connection_id,
            parent_id: record.parent_id,
        }
    }
}

/// Gets DID documents signed by the custodian-held device key.
#[derive(Clone)]
pub struct SignatureExchangeService {
    ctx: ServiceContext,
    pubkey: PubKeyService,
    records: Arc<RecordLifecycle<SignatureExchangeRecord>>,
}

impl std::fmt::Debug for SignatureExchangeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureExchangeService").finish_non_exhaustive()
    }
}

fn encode_json(value: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(|e| AgentError::InvalidRequest(e.to_string()))?;
    Ok(BASE64_URL.encode(bytes))
}

impl SignatureExchangeService {
    pub fn new(ctx: ServiceContext, pubkey: PubKeyService) -> Self {
        let records = Arc::new(ctx.lifecycle());
        Self {
            ctx,
            pubkey,
            records,
        }
    }

    /// Ask the custodian to sign `did_doc` for the connection `message`.
    pub async fn request_signature(
        &self,
        message: Value,
        did_doc: &Value,
        connection_id: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Result<SignatureExchangeRecord> {
        if !message.is_object() {
            return Err(AgentError::InvalidRequest(
                "connection message must be a JSON object".into(),
            ));
        }
        let own_key = self.pubkey.get_public_key().await?;
        let protected = encode_json(&json!({"alg": JWS_ALG, "jwk": own_key.to_jwk()}))?;
        let payload = encode_json(did_doc)?;

        let mut record = SignatureExchangeRecord {
            id: generate_record_id(),
            state: SignatureExchangeState::Start,
            role: ExchangeRole::Requester,
            message,
            connection_id: connection_id.into(),
            parent_id: parent_id.into(),
            protected,
            payload,
            signer_key_base58: own_key.public_key_base58(),
            signed_message: None,
        };
        self.records.create(&record).await?;
        self.records
            .transition(&mut record, SignatureExchangeState::RequestSent)
            .await?;

        let request = SignatureExchangeRequest::new(
            self.ctx.agent.label.clone(),
            record.signing_input(),
            record.id.clone(),
        );
        let sent = self.ctx.sender.send(&request).await.map_err(AgentError::from);
        self.records.abandon_on_error(&mut record, sent).await?;
        Ok(record)
    }

    /// Assemble the general JWS and attach it to a copy of the message.
    fn attach_signature(record: &SignatureExchangeRecord, signature_hex: &str) -> Result<Value> {
        let signature = decode_hex("data", signature_hex)?;
        let signer = Key::from_public_key_base58(&record.signer_key_base58, KeyType::Ed25519)?;
        if signer.verifying_key().is_ok() {
            signer.verify(record.signing_input().as_bytes(), &signature)?;
        }

        let did_doc = BASE64_URL
            .decode(&record.payload)
            .map_err(|e| CryptoError::Encoding(format!("JWS payload: {e}")))?;
        let jws = json!({
            "protected": record.protected,
            "signature": BASE64_URL.encode(&signature),
            "header": {"kid": signer.did_key()},
            "payload": record.payload,
        });
        let attachment = json!({
            "@id": uuid::Uuid::new_v4().to_string(),
            "mime-type": "application/json",
            "data": {
                "base64": STANDARD.encode(did_doc),
                "jws": jws,
            },
        });

        let mut message = record.message.clone();
        let fields = message.as_object_mut().ok_or_else(|| {
            AgentError::InvalidRequest("connection message is not an object".into())
        })?;
        fields.insert(DID_DOC_ATTACHMENT.to_string(), attachment);
        let thread = fields.entry("~thread").or_insert_with(|| json!({}));
        if let Some(thread) = thread.as_object_mut() {
            thread.insert("pthid".to_string(), Value::String(record.parent_id.clone()));
        }
        Ok(message)
    }

    pub async fn process_response(
        &self,
        response: SignatureExchangeResponse,
    ) -> Result<SignedMessage> {
        response
            .validate()
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        let (_claim, mut record) = self.records.claim_response(&response.data_id).await?;

        let signed = Self::attach_signature(&record, &response.data);
        let message = self.records.abandon_on_error(&mut record, signed).await?;

        record.signed_message = Some(message.clone());
        if let Err(e) = self
            .records
            .transition(&mut record, SignatureExchangeState::Completed)
            .await
        {
            record.signed_message = None;
            return Err(e);
        }
        Ok(SignedMessage::from_record(record, message))
    }

    /// Signature exchanges started for `connection_id`, oldest first.
    pub async fn find_by_connection_id(
        &self,
        connection_id: &str,
    ) -> Result<Vec<SignatureExchangeRecord>> {
        self.records
            .find(&Tags::from([(
                CONNECTION_ID_TAG.to_string(),
                connection_id.to_string(),
            )]))
            .await
    }

    /// Wait for `record_id` to be signed.
    pub async fn return_when_signed(
        &self,
        record_id: &str,
        timeout: Option<Duration>,
    ) -> Result<SignedMessage> {
        let record = self
            .records
            .wait_for_completion(record_id, self.ctx.timeout_or_default(timeout))
            .await?;
        let message = record
            .signed_message
            .clone()
            .ok_or_else(|| AgentError::InvalidResponse("completed without signature".into()))?;
        Ok(SignedMessage::from_record(record, message))
    }
}

#[async_trait]
impl MessageHandler for SignatureExchangeService {
    fn message_type(&self) -> &'static str {
        SignatureExchangeResponse::MESSAGE_TYPE
    }

    async fn handle(&self, message: Value) -> Result<HandlerOutcome> {
        let response: SignatureExchangeResponse = parse_message(message)?;
        Ok(HandlerOutcome::SignedMessage(
            self.process_response(response).await?,
        ))
    }
}
