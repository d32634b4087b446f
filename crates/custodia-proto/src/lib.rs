//! Custodia wire protocol
//!
//! Request/response pairs exchanged between a device and its custodian
//! over a topic-based broker:
//! - `pubkey_exchange` to learn the device's own public key
//! - `cek_exchange` to unwrap an Anoncrypt CEK
//! - `distribuited_pack` to wrap a CEK for a recipient
//! - `distribuited_unpack` to unwrap an Authcrypt CEK
//! - `signature_exchange` to sign a DID document
//!
//! Every message is a flat JSON object tagged with `@type` and `@id`.

pub mod error;
pub mod messages;
pub mod topics;
pub mod types;

pub use error::ValidationError;
pub use messages::*;
pub use types::{Direction, Protocol};
