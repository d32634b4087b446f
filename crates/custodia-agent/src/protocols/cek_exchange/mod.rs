//! CEK exchange: the custodian unwraps an Anoncrypt CEK, the device
//! decrypts the body.

mod record;
mod service;

pub use record::{CekRecord, CekState};
pub use service::CekExchangeService;
