use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use custodia_crypto::{EncryptedMessage, PackAlgorithm, unpack_with_external_cek};
use custodia_proto::{CekRequest, CekResponse, ProtocolMessage, parse_message};
use serde_json::Value;

use super::record::{CekRecord, CekState};
use crate::error::{AgentError, Result};
use crate::protocols::pubkey::PubKeyService;
use crate::protocols::{RecordLifecycle, ServiceContext, decode_hex};
use crate::record::{ExchangeRole, ProtocolRecord, generate_record_id};
use crate::transport::{HandlerOutcome, MessageHandler};

/// Decrypts Anoncrypt envelopes with a custodian-unwrapped CEK.
#[derive(Clone)]
pub struct CekExchangeService {
    ctx: ServiceContext,
    pubkey: PubKeyService,
    records: Arc<RecordLifecycle<CekRecord>>,
}

impl std::fmt::Debug for CekExchangeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CekExchangeService").finish_non_exhaustive()
    }
}

impl CekExchangeService {
    pub fn new(ctx: ServiceContext, pubkey: PubKeyService) -> Self {
        let records = Arc::new(ctx.lifecycle());
        Self {
            ctx,
            pubkey,
            records,
        }
    }

    /// Send the wrapped CEK addressed to this device to the custodian.
    ///
    /// Only Anoncrypt envelopes are accepted: on this path the caller, not
    /// the custodian, must know who the sender is.
    pub async fn request_cek(&self, message: EncryptedMessage) -> Result<CekRecord> {
        let header = message.protected_header()?;
        let own_key = self.pubkey.get_public_key().await?;
        let entry = header.recipient(&own_key.public_key_base58())?;
        let alg = header.algorithm()?;
        if alg != PackAlgorithm::Anoncrypt {
            return Err(AgentError::UnsupportedAlgorithm(alg.to_string()));
        }
        if entry.authcrypt_material()?.is_some() {
            return Err(AgentError::UnsupportedAlgorithm(
                "Anoncrypt recipient carrying a sender".into(),
            ));
        }
        let encrypted_key = entry.encrypted_key_bytes()?;

        let mut record = CekRecord {
            id: generate_record_id(),
            state: CekState::Start,
            role: ExchangeRole::Requester,
            message,
            plaintext: None,
        };
        self.records.create(&record).await?;
        self.records
            .transition(&mut record, CekState::RequestSent)
            .await?;

        let request = CekRequest::new(hex::encode(encrypted_key), record.id.clone(), "");
        let sent = self.ctx.sender.send(&request).await.map_err(AgentError::from);
        self.records.abandon_on_error(&mut record, sent).await?;
        Ok(record)
    }

    /// Decrypt the stored envelope with the returned CEK.
    pub async fn process_response(&self, response: CekResponse) -> Result<CekRecord> {
        response
            .validate()
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        let (_claim, mut record) = self.records.claim_response(&response.data_id).await?;

        let decrypted = decode_hex("payloadKey", &response.payload_key).and_then(|cek| {
            unpack_with_external_cek(&record.message, &cek).map_err(AgentError::from)
        });
        let plaintext = self.records.abandon_on_error(&mut record, decrypted).await?;

        record.plaintext = Some(plaintext);
        if let Err(e) = self.records.transition(&mut record, CekState::Completed).await {
            record.plaintext = None;
            return Err(e);
        }
        Ok(record)
    }

    /// Request the CEK and wait for the decrypted payload.
    pub async fn decrypt_with_custodian(
        &self,
        message: EncryptedMessage,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let record = self.request_cek(message).await?;
        let record = self
            .records
            .wait_for_completion(&record.id, self.ctx.timeout_or_default(timeout))
            .await?;
        record
            .plaintext
            .ok_or_else(|| AgentError::InvalidResponse("completed without plaintext".into()))
    }
}

#[async_trait]
impl MessageHandler for CekExchangeService {
    fn message_type(&self) -> &'static str {
        CekResponse::MESSAGE_TYPE
    }

    async fn handle(&self, message: Value) -> Result<HandlerOutcome> {
        let response: CekResponse = parse_message(message)?;
        let record = self.process_response(response).await?;
        Ok(HandlerOutcome::Decrypted {
            record_id: record.id().to_string(),
            plaintext: record.plaintext.unwrap_or(Value::Null),
        })
    }
}
