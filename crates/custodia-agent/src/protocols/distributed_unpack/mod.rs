//! Distributed unpack: the custodian unwraps an Authcrypt CEK and reveals
//! the sender, the device decrypts the body and feeds the inbound pipeline.

mod record;
mod service;

pub use record::{DistributedUnpackRecord, DistributedUnpackState};
pub use service::DistributedUnpackService;
