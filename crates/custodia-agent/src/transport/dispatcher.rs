//! Routes inbound custodian responses to their protocol handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use custodia_proto::{ValidationError, message_type_of};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::protocols::distributed_pack::PackedOutbound;
use crate::protocols::signature_exchange::SignedMessage;

/// What handling an inbound message produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// The record completed; nothing is returned to the caller.
    Completed {
        record_type: &'static str,
        record_id: String,
    },
    /// An envelope ready to be sent to the recipient's endpoint.
    OutboundPackage(PackedOutbound),
    /// A connection message carrying the signed DID document.
    SignedMessage(SignedMessage),
    /// Plaintext recovered for the original caller.
    Decrypted { record_id: String, plaintext: Value },
}

/// A protocol service's response handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The `@type` this handler accepts.
    fn message_type(&self) -> &'static str;

    async fn handle(&self, message: Value) -> Result<HandlerOutcome>;
}

/// Registry of handlers keyed by message type URI.
#[derive(Default, Clone)]
pub struct InboundDispatcher {
    handlers: HashMap<&'static str, Arc<dyn MessageHandler>>,
}

impl std::fmt::Debug for InboundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("InboundDispatcher")
            .field("message_types", &types)
            .finish()
    }
}

impl InboundDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        let message_type = handler.message_type();
        if self.handlers.insert(message_type, handler).is_some() {
            warn!(message_type, "Replaced message handler");
        }
    }

    pub fn message_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Decode `payload`, find the handler for its `@type` and run it.
    pub async fn dispatch(&self, payload: &[u8]) -> Result<HandlerOutcome> {
        let value: Value = serde_json::from_slice(payload).map_err(ValidationError::from)?;
        let message_type = message_type_of(&value)
            .ok_or(ValidationError::MissingType)?
            .to_string();

        let Some(handler) = self.handlers.get(message_type.as_str()) else {
            warn!(message_type = %message_type, "No handler for inbound message");
            return Err(AgentError::UnhandledMessageType(message_type));
        };

        debug!(message_type = %message_type, bytes = payload.len(), "Dispatching inbound message");
        let result = handler.handle(value).await;
        if let Err(e) = &result {
            warn!(message_type = %message_type, error = %e, "Inbound message failed");
        }
        result
    }
}
