use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use custodia_crypto::{EncryptedMessage, EnvelopeError, Key, KeyType, unpack_with_external_cek};
use custodia_proto::{
    DistributedUnpackRequest, DistributedUnpackResponse, ProtocolMessage, parse_message,
};
use serde_json::Value;

use super::record::{DistributedUnpackRecord, DistributedUnpackState};
use crate::error::{AgentError, Result};
use crate::pipeline::{DecryptedMessageContext, InboundPipeline};
use crate::protocols::pubkey::PubKeyService;
use crate::protocols::{RecordLifecycle, ServiceContext, decode_hex};
use crate::record::{ExchangeRole, ProtocolRecord, generate_record_id};
use crate::transport::{HandlerOutcome, MessageHandler};

/// Decrypts Authcrypt envelopes and forwards them to the inbound pipeline.
#[derive(Clone)]
pub struct DistributedUnpackService {
    ctx: ServiceContext,
    pubkey: PubKeyService,
    pipeline: Arc<dyn InboundPipeline>,
    records: Arc<RecordLifecycle<DistributedUnpackRecord>>,
}

impl std::fmt::Debug for DistributedUnpackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedUnpackService").finish_non_exhaustive()
    }
}

impl DistributedUnpackService {
    pub fn new(
        ctx: ServiceContext,
        pubkey: PubKeyService,
        pipeline: Arc<dyn InboundPipeline>,
    ) -> Self {
        let records = Arc::new(ctx.lifecycle());
        Self {
            ctx,
            pubkey,
            pipeline,
            records,
        }
    }

    /// Send the wrapped CEK, sealed sender and nonce to the custodian.
    pub async fn request_unpack(
        &self,
        message: EncryptedMessage,
    ) -> Result<DistributedUnpackRecord> {
        let header = message.protected_header()?;
        header.algorithm()?;

        let own_key = self.pubkey.get_public_key().await?;
        let kid = own_key.public_key_base58();
        let entry = header.recipient(&kid)?;
        let material = entry
            .authcrypt_material()?
            .ok_or(EnvelopeError::MissingIv)?;
        let encrypted_key = entry.encrypted_key_bytes()?;

        let mut record = DistributedUnpackRecord {
            id: generate_record_id(),
            state: DistributedUnpackState::Start,
            role: ExchangeRole::Requester,
            message,
            recipient_key_base58: kid,
            sender_key: None,
        };
        self.records.create(&record).await?;
        self.records
            .transition(&mut record, DistributedUnpackState::RequestSent)
            .await?;

        let request = DistributedUnpackRequest::new(
            hex::encode(encrypted_key),
            hex::encode(material.encrypted_sender),
            record.id.clone(),
            hex::encode(material.nonce),
        );
        let sent = self.ctx.sender.send(&request).await.map_err(AgentError::from);
        self.records.abandon_on_error(&mut record, sent).await?;
        Ok(record)
    }

    fn decrypt(
        record: &DistributedUnpackRecord,
        response: &DistributedUnpackResponse,
    ) -> Result<DecryptedMessageContext> {
        let cek = decode_hex("payloadKey", &response.payload_key)?;
        let sender_key = Key::from_public_key_hex(&response.sender_key, KeyType::Ed25519)?;
        let recipient_key =
            Key::from_public_key_base58(&record.recipient_key_base58, KeyType::Ed25519)?;
        let plaintext = unpack_with_external_cek(&record.message, &cek)?;
        Ok(DecryptedMessageContext {
            plaintext,
            sender_key: Some(sender_key),
            recipient_key,
        })
    }

    /// Decrypt, complete the record, then hand the message to the pipeline.
    pub async fn process_response(
        &self,
        response: DistributedUnpackResponse,
    ) -> Result<DistributedUnpackRecord> {
        response
            .validate()
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        let (_claim, mut record) = self.records.claim_response(&response.data_id).await?;

        let decrypted = Self::decrypt(&record, &response);
        let decrypted = self.records.abandon_on_error(&mut record, decrypted).await?;

        record.sender_key = Some(response.sender_key);
        if let Err(e) = self
            .records
            .transition(&mut record, DistributedUnpackState::Completed)
            .await
        {
            record.sender_key = None;
            return Err(e);
        }

        self.pipeline.receive(decrypted).await?;
        Ok(record)
    }

    /// Request an unpack and wait until the record completes.
    pub async fn unpack_with_custodian(
        &self,
        message: EncryptedMessage,
        timeout: Option<Duration>,
    ) -> Result<DistributedUnpackRecord> {
        let record = self.request_unpack(message).await?;
        self.records
            .wait_for_completion(&record.id, self.ctx.timeout_or_default(timeout))
            .await
    }
}

#[async_trait]
impl MessageHandler for DistributedUnpackService {
    fn message_type(&self) -> &'static str {
        DistributedUnpackResponse::MESSAGE_TYPE
    }

    async fn handle(&self, message: Value) -> Result<HandlerOutcome> {
        let response: DistributedUnpackResponse = parse_message(message)?;
        let record = self.process_response(response).await?;
        Ok(HandlerOutcome::Completed {
            record_type: DistributedUnpackRecord::RECORD_TYPE,
            record_id: record.id,
        })
    }
}
