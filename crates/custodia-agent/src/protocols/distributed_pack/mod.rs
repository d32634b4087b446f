//! Distributed pack: the device authors the envelope body, the custodian
//! wraps the CEK under the device key.

mod record;
mod service;

pub use record::{DistributedPackRecord, DistributedPackState};
pub use service::{DistributedPackParams, DistributedPackService, PackedOutbound};
