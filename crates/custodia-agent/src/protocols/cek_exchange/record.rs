use custodia_crypto::EncryptedMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{ExchangeRole, ProtocolRecord, exchange_state};

exchange_state!(
    /// States of a CEK exchange.
    CekState
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CekRecord {
    pub id: String,
    pub state: CekState,
    pub role: ExchangeRole,
    /// The envelope awaiting its CEK.
    pub message: EncryptedMessage,
    /// Set on completion.
    pub plaintext: Option<Value>,
}

impl ProtocolRecord for CekRecord {
    const RECORD_TYPE: &'static str = "CekRecord";
    type State = CekState;

    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> CekState {
        self.state
    }

    fn set_state(&mut self, state: CekState) {
        self.state = state;
    }

    fn role(&self) -> ExchangeRole {
        self.role
    }
}
