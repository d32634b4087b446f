use custodia_crypto::EncryptedMessage;
use serde::{Deserialize, Serialize};

use crate::record::{ExchangeRole, ProtocolRecord, exchange_state};

exchange_state!(
    /// States of a distributed unpack.
    DistributedUnpackState
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributedUnpackRecord {
    pub id: String,
    pub state: DistributedUnpackState,
    pub role: ExchangeRole,
    pub message: EncryptedMessage,
    /// Base58 key the envelope was addressed to.
    pub recipient_key_base58: String,
    /// Hex, set on completion.
    pub sender_key: Option<String>,
}

impl ProtocolRecord for DistributedUnpackRecord {
    const RECORD_TYPE: &'static str = "DistributedUnpackRecord";
    type State = DistributedUnpackState;

    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> DistributedUnpackState {
        self.state
    }

    fn set_state(&mut self, state: DistributedUnpackState) {
        self.state = state;
    }

    fn role(&self) -> ExchangeRole {
        self.role
    }
}
