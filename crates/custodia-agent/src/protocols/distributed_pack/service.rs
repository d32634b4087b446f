use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use custodia_crypto::{EncryptedMessage, Key, KeyType, pack_with_external_cek};
use custodia_proto::{
    DistributedPackRequest, DistributedPackResponse, ProtocolMessage, parse_message,
};
use serde_json::Value;
use tracing::{debug, warn};

use super::record::{DistributedPackRecord, DistributedPackState};
use crate::error::{AgentError, Result};
use crate::protocols::pubkey::PubKeyService;
use crate::protocols::{RecordLifecycle, ServiceContext, decode_hex};
use crate::record::{ExchangeRole, ProtocolRecord, generate_record_id};
use crate::transport::{HandlerOutcome, MessageHandler};

/// What the caller wants packed and where it goes afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedPackParams {
    /// Only the first key is wrapped for.
    pub recipient_keys: Vec<Key>,
    /// Must be the device's own key.
    pub sender_key: Key,
    pub payload: Value,
    pub endpoint: String,
    pub service_id: String,
    pub connection_id: Option<String>,
}

/// A packed envelope and its destination.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedOutbound {
    pub record_id: String,
    pub message: EncryptedMessage,
    pub endpoint: String,
    pub service_id: String,
    pub connection_id: Option<String>,
}

impl PackedOutbound {
    fn from_record(record: &DistributedPackRecord, message: EncryptedMessage) -> Self {
        Self {
            record_id: record.id.clone(),
            message,
            endpoint: record.endpoint.clone(),
            service_id: record.service_id.clone(),
            connection_id: record.connection_id.clone(),
        }
    }
}

/// Authcrypt packing with a custodian-wrapped CEK.
#[derive(Clone)]
pub struct DistributedPackService {
    ctx: ServiceContext,
    pubkey: PubKeyService,
    records: Arc<RecordLifecycle<DistributedPackRecord>>,
}

impl std::fmt::Debug for DistributedPackService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedPackService").finish_non_exhaustive()
    }
}

impl DistributedPackService {
    pub fn new(ctx: ServiceContext, pubkey: PubKeyService) -> Self {
        let records = Arc::new(ctx.lifecycle());
        Self {
            ctx,
            pubkey,
            records,
        }
    }

    /// Generate a CEK for a new record and ask the custodian to wrap it.
    pub async fn request_pack(
        &self,
        params: DistributedPackParams,
    ) -> Result<DistributedPackRecord> {
        let own_key = self.pubkey.get_public_key().await?;
        if params.sender_key != own_key {
            return Err(AgentError::KeyMismatch);
        }
        let Some(recipient) = params.recipient_keys.first() else {
            return Err(AgentError::InvalidRequest("no recipient keys".into()));
        };
        if params.recipient_keys.len() > 1 {
            warn!(
                recipients = params.recipient_keys.len(),
                "Distributed pack wraps for the first recipient only"
            );
        }

        let mut record = DistributedPackRecord {
            id: generate_record_id(),
            state: DistributedPackState::Start,
            role: ExchangeRole::Requester,
            payload: params.payload,
            recipient_key_base58: recipient.public_key_base58(),
            sender_key_base58: params.sender_key.public_key_base58(),
            endpoint: params.endpoint,
            service_id: params.service_id,
            connection_id: params.connection_id,
            packed: None,
        };
        let cek = self.ctx.key_store.create_cek(&record.id)?;
        let request = DistributedPackRequest::new(
            hex::encode(cek.key_bytes()),
            recipient.public_key_hex(),
            record.id.clone(),
        );
        drop(cek);

        let started = match self.records.create(&record).await {
            Ok(()) => {
                self.records
                    .transition(&mut record, DistributedPackState::RequestSent)
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = started {
            self.ctx.key_store.discard_cek(&record.id);
            return Err(e);
        }

        let sent = self.ctx.sender.send(&request).await.map_err(AgentError::from);
        if sent.is_err() {
            self.ctx.key_store.discard_cek(&record.id);
        }
        self.records.abandon_on_error(&mut record, sent).await?;
        Ok(record)
    }

    fn pack(
        &self,
        record: &DistributedPackRecord,
        response: &DistributedPackResponse,
    ) -> Result<EncryptedMessage> {
        let cek = self.ctx.key_store.take_cek(&record.id)?;
        let wrapped_cek = decode_hex("encryptedCek", &response.encrypted_cek)?;
        let nonce = decode_hex("nonce", &response.nonce)?;
        let recipient =
            Key::from_public_key_base58(&record.recipient_key_base58, KeyType::Ed25519)?;
        let sender = Key::from_public_key_base58(&record.sender_key_base58, KeyType::Ed25519)?;
        Ok(pack_with_external_cek(
            cek,
            &nonce,
            &wrapped_cek,
            &record.payload,
            &recipient,
            Some(&sender),
        )?)
    }

    /// Build the final envelope from the custodian's wrap.
    pub async fn process_response(
        &self,
        response: DistributedPackResponse,
    ) -> Result<PackedOutbound> {
        response
            .validate()
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        let (_claim, mut record) = self.records.claim_response(&response.data_id).await?;

        let packed = self.pack(&record, &response);
        let message = self.records.abandon_on_error(&mut record, packed).await?;

        record.packed = Some(message.clone());
        if let Err(e) = self
            .records
            .transition(&mut record, DistributedPackState::Completed)
            .await
        {
            record.packed = None;
            return Err(e);
        }
        Ok(PackedOutbound::from_record(&record, message))
    }

    /// Request a pack and wait for the envelope.
    pub async fn pack_with_custodian(
        &self,
        params: DistributedPackParams,
        timeout: Option<Duration>,
    ) -> Result<PackedOutbound> {
        let record = self.request_pack(params).await?;
        let waited = self
            .records
            .wait_for_completion(&record.id, self.ctx.timeout_or_default(timeout))
            .await;
        let record = match waited {
            Ok(record) => record,
            Err(e) => {
                // A late response for this record can no longer be packed.
                self.ctx.key_store.discard_cek(&record.id);
                return Err(e);
            }
        };
        let message = record
            .packed
            .clone()
            .ok_or_else(|| AgentError::InvalidResponse("completed without envelope".into()))?;
        Ok(PackedOutbound::from_record(&record, message))
    }
}

#[async_trait]
impl MessageHandler for DistributedPackService {
    fn message_type(&self) -> &'static str {
        DistributedPackResponse::MESSAGE_TYPE
    }

    async fn handle(&self, message: Value) -> Result<HandlerOutcome> {
        let response: DistributedPackResponse = parse_message(message)?;
        let outbound = self.process_response(response).await?;
        debug!(
            record_type = DistributedPackRecord::RECORD_TYPE,
            record_id = %outbound.record_id,
            endpoint = %outbound.endpoint,
            "Envelope packed"
        );
        Ok(HandlerOutcome::OutboundPackage(outbound))
    }
}
