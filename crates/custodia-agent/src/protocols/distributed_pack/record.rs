use custodia_crypto::EncryptedMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{ExchangeRole, ProtocolRecord, exchange_state};
use crate::storage::Tags;

exchange_state!(
    /// States of a distributed pack.
    DistributedPackState
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedPackRecord {
    pub id: String,
    pub state: DistributedPackState,
    pub role: ExchangeRole,
    /// Plaintext to encrypt once the wrapped CEK is back.
    pub payload: Value,
    pub recipient_key_base58: String,
    pub sender_key_base58: String,
    pub endpoint: String,
    pub service_id: String,
    pub connection_id: Option<String>,
    /// Set on completion.
    pub packed: Option<EncryptedMessage>,
}

impl ProtocolRecord for DistributedPackRecord {
    const RECORD_TYPE: &'static str = "DistributedPackRecord";
    type State = DistributedPackState;

    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> DistributedPackState {
        self.state
    }

    fn set_state(&mut self, state: DistributedPackState) {
        self.state = state;
    }

    fn role(&self) -> ExchangeRole {
        self.role
    }

    fn custom_tags(&self) -> Tags {
        let mut tags = Tags::from([("serviceId".to_string(), self.service_id.clone())]);
        if let Some(connection_id) = &self.connection_id {
            tags.insert("connectionId".into(), connection_id.clone());
        }
        tags
    }
}
