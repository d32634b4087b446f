//! Signature exchange: the custodian signs a DID document for a
//! connection message, the device assembles the JWS.

mod record;
mod service;

pub use record::{SignatureExchangeRecord, SignatureExchangeState};
pub use service::{DID_DOC_ATTACHMENT, SignatureExchangeService, SignedMessage};
