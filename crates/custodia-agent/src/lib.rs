//! `Custodia` agent
//!
//! A device agent that encrypts, decrypts and signs DIDComm messages while
//! its private key stays with a remote custodian. Each operation is a small
//! persisted exchange:
//!
//! - **`PubKey`**: learn the device's own public key
//! - **`CekExchange`**: unwrap an Anoncrypt CEK, decrypt locally
//! - **`DistributedPack`**: wrap a local CEK, encrypt locally
//! - **`DistributedUnpack`**: unwrap an Authcrypt CEK and sender, decrypt locally
//! - **`SignatureExchange`**: sign a DID document for a connection
//!
//! Requests go out through a [`transport::Broker`]; responses come back
//! through [`Agent::receive`].

pub mod agent;
pub mod context;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod protocols;
pub mod record;
pub mod storage;
pub mod transport;
pub mod waiter;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use agent::{Agent, AgentDependencies};
pub use context::AgentContext;
pub use error::{AgentError, ErrorKind, Result};
pub use events::{EventBus, RecordStateChanged};
pub use pipeline::{ChannelPipeline, DecryptedMessageContext, InboundPipeline};
pub use record::{ExchangeRole, ExchangeState, ProtocolRecord, ProtocolStateError};
pub use transport::{Broker, HandlerOutcome, MessageSender, TransportError};
pub use waiter::{CompletionWaiter, WaitError};
