//! Message type URIs.
//!
//! The URIs double as routing keys: the broker topic for a message is
//! derived from its protocol and direction.

// ---------------------------------------------------------------------------
// pubkey_exchange
// ---------------------------------------------------------------------------

/// `pubkey_exchange/1.0/request`
pub const PUB_KEY_REQUEST: &str = "https://didcomm.org/pubkey_exchange/1.0/request";

/// `pubkey_exchange/1.0/response`
pub const PUB_KEY_RESPONSE: &str = "https://didcomm.org/pubkey_exchange/1.0/response";

// ---------------------------------------------------------------------------
// cek_exchange
// ---------------------------------------------------------------------------

/// `cek_exchange/1.0/request`
pub const CEK_REQUEST: &str = "https://didcomm.org/cek_exchange/1.0/request";

/// `cek_exchange/1.0/response`
pub const CEK_RESPONSE: &str = "https://didcomm.org/cek_exchange/1.0/response";

// ---------------------------------------------------------------------------
// distribuited_pack (spelling is part of the deployed protocol id)
// ---------------------------------------------------------------------------

/// `distribuited_pack/1.0/request`
pub const DISTRIBUTED_PACK_REQUEST: &str = "https://didcomm.org/distribuited_pack/1.0/request";

/// `distribuited_pack/1.0/response`
pub const DISTRIBUTED_PACK_RESPONSE: &str = "https://didcomm.org/distribuited_pack/1.0/response";

// ---------------------------------------------------------------------------
// distribuited_unpack
// ---------------------------------------------------------------------------

/// `distribuited_unpack/1.0/request`
pub const DISTRIBUTED_UNPACK_REQUEST: &str = "https://didcomm.org/distribuited_unpack/1.0/request";

/// `distribuited_unpack/1.0/response`
pub const DISTRIBUTED_UNPACK_RESPONSE: &str =
    "https://didcomm.org/distribuited_unpack/1.0/response";

// ---------------------------------------------------------------------------
// signature_exchange
// ---------------------------------------------------------------------------

/// `signature_exchange/1.0/request`
pub const SIGNATURE_EXCHANGE_REQUEST: &str = "https://didcomm.org/signature_exchange/1.0/request";

/// `signature_exchange/1.0/response`
pub const SIGNATURE_EXCHANGE_RESPONSE: &str =
    "https://didcomm.org/signature_exchange/1.0/response";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    PubKey,
    CekExchange,
    DistributedPack,
    DistributedUnpack,
    SignatureExchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl Protocol {
    pub const ALL: [Self; 5] = [
        Self::PubKey,
        Self::CekExchange,
        Self::DistributedPack,
        Self::DistributedUnpack,
        Self::SignatureExchange,
    ];

    /// Topic path segment under the device id.
    pub const fn topic_segment(&self) -> &'static str {
        match self {
            Self::PubKey => "pubKey",
            Self::CekExchange => "cekExchange",
            Self::DistributedPack => "distributedPack",
            Self::DistributedUnpack => "distributedUnpack",
            Self::SignatureExchange => "signatureExchange",
        }
    }

    pub const fn message_type(&self, direction: Direction) -> &'static str {
        match (self, direction) {
            (Self::PubKey, Direction::Request) => PUB_KEY_REQUEST,
            (Self::PubKey, Direction::Response) => PUB_KEY_RESPONSE,
            (Self::CekExchange, Direction::Request) => CEK_REQUEST,
            (Self::CekExchange, Direction::Response) => CEK_RESPONSE,
            (Self::DistributedPack, Direction::Request) => DISTRIBUTED_PACK_REQUEST,
            (Self::DistributedPack, Direction::Response) => DISTRIBUTED_PACK_RESPONSE,
            (Self::DistributedUnpack, Direction::Request) => DISTRIBUTED_UNPACK_REQUEST,
            (Self::DistributedUnpack, Direction::Response) => DISTRIBUTED_UNPACK_RESPONSE,
            (Self::SignatureExchange, Direction::Request) => SIGNATURE_EXCHANGE_REQUEST,
            (Self::SignatureExchange, Direction::Response) => SIGNATURE_EXCHANGE_RESPONSE,
        }
    }

    /// Resolve a message type URI to its protocol and direction.
    pub fn from_message_type(uri: &str) -> Option<(Self, Direction)> {
        Self::ALL.into_iter().find_map(|protocol| {
            [Direction::Request, Direction::Response]
                .into_iter()
                .find(|d| protocol.message_type(*d) == uri)
                .map(|d| (protocol, d))
        })
    }
}
