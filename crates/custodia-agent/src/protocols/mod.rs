//! The five custodian exchanges.
//!
//! Every service follows the same shape: create a record in `start`, move
//! it to `request-sent` and publish the request, then complete it when the
//! custodian's response comes back through the [`InboundDispatcher`].
//!
//! [`InboundDispatcher`]: crate::transport::InboundDispatcher

pub mod cek_exchange;
pub mod distributed_pack;
pub mod distributed_unpack;
mod lifecycle;
pub mod pubkey;
pub mod signature_exchange;

use std::sync::Arc;
use std::time::Duration;

use custodia_crypto::KeyStore;

use crate::context::AgentContext;
use crate::events::EventBus;
use crate::storage::RecordDatabase;
use crate::transport::MessageSender;

pub(crate) use lifecycle::RecordLifecycle;

/// Collaborators every protocol service is built from.
#[derive(Clone)]
pub struct ServiceContext {
    pub agent: AgentContext,
    pub database: RecordDatabase,
    pub events: EventBus,
    pub sender: MessageSender,
    pub key_store: Arc<dyn KeyStore>,
    /// Bound used when a caller waits without giving one.
    pub completion_timeout: Duration,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("agent", &self.agent)
            .field("completion_timeout", &self.completion_timeout)
            .finish_non_exhaustive()
    }
}

impl ServiceContext {
    pub(crate) fn lifecycle<R: crate::record::ProtocolRecord>(&self) -> RecordLifecycle<R> {
        RecordLifecycle::new(
            self.database.clone(),
            self.events.clone(),
            self.agent.context_id.clone(),
        )
    }

    pub(crate) fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.completion_timeout)
    }
}

/// Decode a hex field of a response that already passed validation.
pub(crate) fn decode_hex(field: &str, value: &str) -> crate::error::Result<Vec<u8>> {
    hex::decode(value)
        .map_err(|e| crate::error::AgentError::InvalidResponse(format!("{field}: {e}")))
}
