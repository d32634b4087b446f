//! Shared shape of protocol records.
//!
//! Each protocol owns a concrete record type with its own state enum.
//! The trait below is the only thing they share: identity, state, role and
//! the guards that every response handler runs before mutating anything.

use std::fmt::{Debug, Display};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::storage::Tags;

/// Which side of an exchange a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeRole {
    Requester,
    Responder,
}

impl ExchangeRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Responder => "responder",
        }
    }
}

impl Display for ExchangeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol-specific state enum.
pub trait ExchangeState:
    Copy + Eq + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const START: Self;
    const REQUEST_SENT: Self;
    const COMPLETED: Self;
    const ABANDONED: Self;

    fn as_str(&self) -> &'static str;

    /// `Completed` and `Abandoned` accept no further transitions.
    fn is_terminal(&self) -> bool {
        *self == Self::COMPLETED || *self == Self::ABANDONED
    }
}

/// Generates a state enum for one protocol.
macro_rules! exchange_state {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            Start,
            RequestSent,
            RequestReceived,
            ResponseSent,
            ResponseReceived,
            Abandoned,
            Completed,
        }

        impl $crate::record::ExchangeState for $name {
            const START: Self = Self::Start;
            const REQUEST_SENT: Self = Self::RequestSent;
            const COMPLETED: Self = Self::Completed;
            const ABANDONED: Self = Self::Abandoned;

            fn as_str(&self) -> &'static str {
                match self {
                    Self::Start => "start",
                    Self::RequestSent => "request-sent",
                    Self::RequestReceived => "request-received",
                    Self::ResponseSent => "response-sent",
                    Self::ResponseReceived => "response-received",
                    Self::Abandoned => "abandoned",
                    Self::Completed => "completed",
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::record::ExchangeState::as_str(self))
            }
        }
    };
}

pub(crate) use exchange_state;

/// A state or role guard failed. The record is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolStateError {
    #[error("{record_type} record {record_id} is in state {actual}, expected {expected}")]
    InvalidState {
        record_type: &'static str,
        record_id: String,
        expected: String,
        actual: String,
    },

    #[error("{record_type} record {record_id} has role {actual}, expected {expected}")]
    InvalidRole {
        record_type: &'static str,
        record_id: String,
        expected: ExchangeRole,
        actual: ExchangeRole,
    },

    #[error("{record_type} record {record_id} is already processing a response")]
    ResponseInProgress {
        record_type: &'static str,
        record_id: String,
    },

    #[error("{record_type} record {record_id} is already {state}")]
    Terminal {
        record_type: &'static str,
        record_id: String,
        state: String,
    },
}

/// Behaviour shared by every protocol record.
pub trait ProtocolRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Storage discriminator.
    const RECORD_TYPE: &'static str;

    type State: ExchangeState;

    fn id(&self) -> &str;

    fn state(&self) -> Self::State;

    fn set_state(&mut self, state: Self::State);

    fn role(&self) -> ExchangeRole;

    /// Protocol-specific query tags.
    fn custom_tags(&self) -> Tags {
        Tags::new()
    }

    fn tags(&self) -> Tags {
        let mut tags = self.custom_tags();
        tags.insert("id".into(), self.id().to_string());
        tags.insert("state".into(), self.state().as_str().to_string());
        tags.insert("role".into(), self.role().as_str().to_string());
        tags
    }

    fn assert_state(&self, expected: Self::State) -> Result<(), ProtocolStateError> {
        let actual = self.state();
        if actual == expected {
            Ok(())
        } else {
            Err(ProtocolStateError::InvalidState {
                record_type: Self::RECORD_TYPE,
                record_id: self.id().to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    fn assert_role(&self, expected: ExchangeRole) -> Result<(), ProtocolStateError> {
        let actual = self.role();
        if actual == expected {
            Ok(())
        } else {
            Err(ProtocolStateError::InvalidRole {
                record_type: Self::RECORD_TYPE,
                record_id: self.id().to_string(),
                expected,
                actual,
            })
        }
    }

    /// Both guards every response handler runs before touching the record.
    fn assert_awaiting_response(&self) -> Result<(), ProtocolStateError> {
        self.assert_role(ExchangeRole::Requester)?;
        self.assert_state(Self::State::REQUEST_SENT)
    }
}

/// New opaque record id.
pub fn generate_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    exchange_state!(
        /// State enum for the test record.
        DummyState
    );

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct DummyRecord {
        pub id: String,
        pub state: DummyState,
        pub role: ExchangeRole,
        pub label: String,
    }

    impl DummyRecord {
        pub fn new(id: &str, label: &str) -> Self {
            Self {
                id: id.to_string(),
                state: DummyState::Start,
                role: ExchangeRole::Requester,
                label: label.to_string(),
            }
        }
    }

    impl ProtocolRecord for DummyRecord {
        const RECORD_TYPE: &'static str = "DummyRecord";
        type State = DummyState;

        fn id(&self) -> &str {
            &self.id
        }

        fn state(&self) -> DummyState {
            self.state
        }

        fn set_state(&mut self, state: DummyState) {
            self.state = state;
        }

        fn role(&self) -> ExchangeRole {
            self.role
        }

        fn custom_tags(&self) -> Tags {
            Tags::from([("label".to_string(), self.label.clone())])
        }
    }

    #[test]
    fn states_serialize_kebab_case() {
        assert_eq!(
            serde_json::to_string(&DummyState::RequestSent).unwrap(),
            "\"request-sent\""
        );
        assert_eq!(DummyState::ResponseReceived.to_string(), "response-received");
    }

    #[test]
    fn terminal_states() {
        assert!(DummyState::Completed.is_terminal());
        assert!(DummyState::Abandoned.is_terminal());
        assert!(!DummyState::RequestSent.is_terminal());
    }

    #[test]
    fn tags_include_identity_state_and_custom() {
        let tags = DummyRecord::new("r-1", "blue").tags();
        assert_eq!(tags["id"], "r-1");
        assert_eq!(tags["state"], "start");
        assert_eq!(tags["role"], "requester");
        assert_eq!(tags["label"], "blue");
    }

    #[test]
    fn awaiting_response_requires_requester_in_request_sent() {
        let mut record = DummyRecord::new("r-1", "x");
        assert!(matches!(
            record.assert_awaiting_response(),
            Err(ProtocolStateError::InvalidState { .. })
        ));

        record.state = DummyState::RequestSent;
        record.role = ExchangeRole::Responder;
        assert!(matches!(
            record.assert_awaiting_response(),
            Err(ProtocolStateError::InvalidRole { expected: ExchangeRole::Requester, .. })
        ));

        record.role = ExchangeRole::Requester;
        record.assert_awaiting_response().unwrap();
    }
}
