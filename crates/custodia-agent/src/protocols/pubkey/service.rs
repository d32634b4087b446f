use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use custodia_crypto::{Key, KeyType};
use custodia_proto::{ProtocolMessage, PubKeyRequest, PubKeyResponse, parse_message};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::record::{CONTEXT_ID_TAG, PubKeyRecord, PubKeyState};
use crate::error::{AgentError, Result};
use crate::protocols::{RecordLifecycle, ServiceContext};
use crate::record::ProtocolRecord;
use crate::storage::Tags;
use crate::transport::{HandlerOutcome, MessageHandler};

/// Obtains and caches the device public key for the agent's context.
#[derive(Clone)]
pub struct PubKeyService {
    ctx: ServiceContext,
    records: Arc<RecordLifecycle<PubKeyRecord>>,
    /// Held across delete-then-create so concurrent requests leave one record.
    replacing: Arc<Mutex<()>>,
}

impl std::fmt::Debug for PubKeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubKeyService")
            .field("context_id", &self.ctx.agent.context_id)
            .finish_non_exhaustive()
    }
}

impl PubKeyService {
    pub fn new(ctx: ServiceContext) -> Self {
        let records = Arc::new(ctx.lifecycle());
        Self {
            ctx,
            records,
            replacing: Arc::new(Mutex::new(())),
        }
    }

    fn context_query(context_id: &str) -> Tags {
        Tags::from([(CONTEXT_ID_TAG.to_string(), context_id.to_string())])
    }

    async fn record_for_context(&self, context_id: &str) -> Result<Option<PubKeyRecord>> {
        Ok(self
            .records
            .repository()
            .find_single_by_query(&Self::context_query(context_id))
            .await?)
    }

    /// Ask the custodian for the device key.
    ///
    /// Any earlier record for the context is deleted first: a context has
    /// at most one live public key.
    pub async fn request_public_key(&self) -> Result<PubKeyRecord> {
        let context_id = &self.ctx.agent.context_id;
        let replacing = self.replacing.lock().await;
        for prior in self.records.find(&Self::context_query(context_id)).await? {
            debug!(record_id = %prior.id, context_id = %context_id, "Replacing public key record");
            self.records.delete(&prior.id).await?;
        }

        let mut record = PubKeyRecord::new_requester(context_id);
        self.records.create(&record).await?;
        self.records
            .transition(&mut record, PubKeyState::RequestSent)
            .await?;
        drop(replacing);

        let request = PubKeyRequest::new(context_id.clone());
        let sent = self.ctx.sender.send(&request).await.map_err(AgentError::from);
        self.records.abandon_on_error(&mut record, sent).await?;
        Ok(record)
    }

    /// Complete the pending record for the response's context.
    pub async fn process_response(&self, response: PubKeyResponse) -> Result<PubKeyRecord> {
        response
            .validate()
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;

        let pending = self
            .record_for_context(&response.context_id)
            .await?
            .ok_or_else(|| {
                AgentError::InvalidResponse(format!(
                    "no public key record for context {}",
                    response.context_id
                ))
            })?;
        let (_claim, mut record) = self.records.claim_response(&pending.id).await?;

        record.public_key = Some(response.public_key);
        let completed = self
            .records
            .transition(&mut record, PubKeyState::Completed)
            .await;
        if completed.is_err() {
            record.public_key = None;
        }
        completed?;
        Ok(record)
    }

    fn key_of(record: &PubKeyRecord) -> Result<Option<Key>> {
        if record.state != PubKeyState::Completed {
            return Ok(None);
        }
        record
            .public_key
            .as_deref()
            .map(|hex| Key::from_public_key_hex(hex, KeyType::Ed25519).map_err(AgentError::from))
            .transpose()
    }

    /// The obtained key, if the context's exchange has completed.
    pub async fn find_public_key(&self) -> Result<Option<Key>> {
        match self.record_for_context(&self.ctx.agent.context_id).await? {
            Some(record) => Self::key_of(&record),
            None => Ok(None),
        }
    }

    pub async fn get_public_key(&self) -> Result<Key> {
        self.find_public_key()
            .await?
            .ok_or_else(|| AgentError::KeyUnavailable(self.ctx.agent.context_id.clone()))
    }

    /// Wait for the context's pending exchange to complete.
    pub async fn return_when_is_obtained(&self, timeout: Option<Duration>) -> Result<Key> {
        let context_id = &self.ctx.agent.context_id;
        let record = self
            .record_for_context(context_id)
            .await?
            .ok_or_else(|| AgentError::KeyUnavailable(context_id.clone()))?;

        let record = self
            .records
            .wait_for_completion(&record.id, self.ctx.timeout_or_default(timeout))
            .await?;
        Self::key_of(&record)?.ok_or_else(|| AgentError::KeyUnavailable(context_id.clone()))
    }

    pub async fn request_and_wait(&self, timeout: Option<Duration>) -> Result<Key> {
        self.request_public_key().await?;
        self.return_when_is_obtained(timeout).await
    }
}

#[async_trait]
impl MessageHandler for PubKeyService {
    fn message_type(&self) -> &'static str {
        PubKeyResponse::MESSAGE_TYPE
    }

    async fn handle(&self, message: Value) -> Result<HandlerOutcome> {
        let response: PubKeyResponse = parse_message(message)?;
        let record = self.process_response(response).await?;
        Ok(HandlerOutcome::Completed {
            record_type: PubKeyRecord::RECORD_TYPE,
            record_id: record.id,
        })
    }
}
