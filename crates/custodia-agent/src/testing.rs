//! In-process custodian and broker for tests.
//!
//! [`MockCustodian`] answers every request type with a real Ed25519 key
//! pair, so flows driven through it exercise the actual cryptography.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use custodia_crypto::{Key, KeyPair, KeyStore, KeyType, LocalKeyStore, ecdh};
use custodia_proto::{
    CekRequest, CekResponse, DistributedPackRequest, DistributedPackResponse,
    DistributedUnpackRequest, DistributedUnpackResponse, ProtocolMessage, PubKeyRequest,
    PubKeyResponse, SignatureExchangeRequest, SignatureExchangeResponse, ValidationError,
    message_type_of, parse_message, types,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::protocols::decode_hex;
use crate::transport::{Broker, HandlerOutcome, TransportError};

/// Holds a device key and performs the custodian half of every exchange.
#[derive(Debug)]
pub struct MockCustodian {
    key_store: LocalKeyStore,
    key: Key,
}

impl Default for MockCustodian {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCustodian {
    pub fn new() -> Self {
        Self::from_key_pair(KeyPair::generate())
    }

    pub fn from_key_pair(key_pair: KeyPair) -> Self {
        let key_store = LocalKeyStore::new();
        let key = key_store.insert_key_pair(key_pair);
        Self { key_store, key }
    }

    /// The device public key this custodian holds.
    pub const fn public_key(&self) -> &Key {
        &self.key
    }

    /// Answer one request message.
    pub fn respond(&self, request: &Value) -> Result<Value> {
        let message_type = message_type_of(request).ok_or(ValidationError::MissingType)?;
        debug!(message_type, "Custodian handling request");

        let response = match message_type {
            types::PUB_KEY_REQUEST => {
                let req: PubKeyRequest = parse_message(request.clone())?;
                PubKeyResponse::new(req.context_id, self.key.public_key_hex()).to_value()?
            }
            types::CEK_REQUEST => {
                let req: CekRequest = parse_message(request.clone())?;
                let wrapped = decode_hex("encryptedKey", &req.encrypted_key)?;
                let cek = self.key_store.ecdh_open(&self.key, None, None, &wrapped)?;
                CekResponse::new(hex::encode(cek), req.data_id, "").to_value()?
            }
            types::DISTRIBUTED_PACK_REQUEST => {
                let req: DistributedPackRequest = parse_message(request.clone())?;
                let cek = decode_hex("cek", &req.cek)?;
                let recipient = Key::from_public_key_hex(&req.recipient_key, KeyType::Ed25519)?;
                let nonce = ecdh::random_nonce();
                let wrapped = self.key_store.ecdh_box(&recipient, &self.key, &nonce, &cek)?;
                DistributedPackResponse::new(hex::encode(wrapped), hex::encode(nonce), req.data_id)
                    .to_value()?
            }
            types::DISTRIBUTED_UNPACK_REQUEST => {
                let req: DistributedUnpackRequest = parse_message(request.clone())?;
                let sealed_sender = decode_hex("senderKey", &req.sender_key)?;
                let sender =
                    Key::ed25519(self.key_store.ecdh_open(&self.key, None, None, &sealed_sender)?);
                let nonce = decode_hex("nonce", &req.nonce)?;
                let wrapped = decode_hex("encryptedKey", &req.encrypted_key)?;
                let cek = self
                    .key_store
                    .ecdh_open(&self.key, Some(&sender), Some(&nonce), &wrapped)?;
                DistributedUnpackResponse::new(
                    hex::encode(cek),
                    req.data_id,
                    sender.public_key_hex(),
                )
                .to_value()?
            }
            types::SIGNATURE_EXCHANGE_REQUEST => {
                let req: SignatureExchangeRequest = parse_message(request.clone())?;
                let signature = self.key_store.sign(&self.key, req.data.as_bytes())?;
                SignatureExchangeResponse::new(hex::encode(signature), req.data_id).to_value()?
            }
            other => return Err(AgentError::UnhandledMessageType(other.to_string())),
        };
        Ok(response)
    }

    /// [`respond`](Self::respond) on raw broker bytes.
    pub fn respond_bytes(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let request: Value = serde_json::from_slice(payload).map_err(ValidationError::from)?;
        let response = self.respond(&request)?;
        serde_json::to_vec(&response).map_err(|e| ValidationError::from(e).into())
    }
}

/// One captured publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

/// Broker that keeps every publish in memory.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    published: Mutex<Vec<PublishedMessage>>,
    forward: Option<mpsc::UnboundedSender<PublishedMessage>>,
    failing: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker that also forwards every publish to the returned receiver.
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<PublishedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = Self {
            forward: Some(tx),
            ..Self::default()
        };
        (broker, rx)
    }

    /// Make subsequent publishes fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_published(&self) -> Option<PublishedMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> std::result::Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "broker unavailable".into(),
            });
        }
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload,
        };
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        if let Some(tx) = &self.forward {
            let _ = tx.send(message);
        }
        Ok(())
    }
}

/// Answer every forwarded request with `custodian` and feed the response to
/// `agent`. Outcomes are reported on the returned channel.
pub fn spawn_custodian(
    agent: Agent,
    custodian: Arc<MockCustodian>,
    mut requests: mpsc::UnboundedReceiver<PublishedMessage>,
) -> (JoinHandle<()>, mpsc::UnboundedReceiver<Result<HandlerOutcome>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let outcome = match custodian.respond_bytes(&request.payload) {
                Ok(response) => agent.receive(&response).await,
                Err(e) => {
                    warn!(topic = %request.topic, error = %e, "Custodian rejected request");
                    Err(e)
                }
            };
            if tx.send(outcome).is_err() {
                debug!("Outcome receiver dropped");
            }
        }
    });
    (handle, rx)
}
