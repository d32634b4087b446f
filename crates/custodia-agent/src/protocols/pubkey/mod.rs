//! Public key exchange: learn the device key the custodian holds.

mod record;
mod service;

pub use record::{PubKeyRecord, PubKeyState};
pub use service::PubKeyService;
