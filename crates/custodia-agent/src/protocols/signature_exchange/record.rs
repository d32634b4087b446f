use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{ExchangeRole, ProtocolRecord, exchange_state};
use crate::storage::Tags;

pub(crate) const CONNECTION_ID_TAG: &str = "connectionId";
pub(crate) const PARENT_ID_TAG: &str = "parentId";

exchange_state!(
    /// States of a signature exchange.
    SignatureExchangeState
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureExchangeRecord {
    pub id: String,
    pub state: SignatureExchangeState,
    pub role: ExchangeRole,
    /// The connection message awaiting its signed DID document.
    pub message: Value,
    /// Connection the signed message is for.
    pub connection_id: String,
    /// Parent thread of the exchange; set as `~thread.pthid` on the signed
    /// message.
    pub parent_id: String,
    /// Base64url JWS protected header.
    pub protected: String,
    /// Base64url JWS payload (the DID document JSON).
    pub payload: String,
    pub signer_key_base58: String,
    /// Set on completion.
    pub signed_message: Option<Value>,
}

impl SignatureExchangeRecord {
    /// The JWS signing input sent to the custodian.
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.protected, self.payload)
    }
}

impl ProtocolRecord for SignatureExchangeRecord {
    const RECORD_TYPE: &'static str = "SignatureExchangeRecord";
    type State = SignatureExchangeState;

    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> SignatureExchangeState {
        self.state
    }

    fn set_state(&mut self, state: SignatureExchangeState) {
        self.state = state;
    }

    fn role(&self) -> ExchangeRole {
        self.role
    }

    fn custom_tags(&self) -> Tags {
        Tags::from([
            (CONNECTION_ID_TAG.to_string(), self.connection_id.clone()),
            (PARENT_ID_TAG.to_string(), self.parent_id.clone()),
        ])
    }
}
