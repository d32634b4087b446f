use serde::{Deserialize, Serialize};

use crate::record::{ExchangeRole, ProtocolRecord, exchange_state};
use crate::storage::Tags;

exchange_state!(
    /// States of a public key exchange.
    PubKeyState
);

pub(crate) const CONTEXT_ID_TAG: &str = "contextId";

/// One public key request for a logical context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubKeyRecord {
    pub id: String,
    pub state: PubKeyState,
    pub role: ExchangeRole,
    pub context_id: String,
    /// Hex, set on completion.
    pub public_key: Option<String>,
}

impl PubKeyRecord {
    pub(crate) fn new_requester(context_id: &str) -> Self {
        Self {
            id: crate::record::generate_record_id(),
            state: PubKeyState::Start,
            role: ExchangeRole::Requester,
            context_id: context_id.to_string(),
            public_key: None,
        }
    }
}

impl ProtocolRecord for PubKeyRecord {
    const RECORD_TYPE: &'static str = "PubKeyRecord";
    type State = PubKeyState;

    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> PubKeyState {
        self.state
    }

    fn set_state(&mut self, state: PubKeyState) {
        self.state = state;
    }

    fn role(&self) -> ExchangeRole {
        self.role
    }

    fn custom_tags(&self) -> Tags {
        Tags::from([(CONTEXT_ID_TAG.to_string(), self.context_id.clone())])
    }
}
