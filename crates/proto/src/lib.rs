//! Semtech GWMP wire protocol: binary datagram framing and the JSON bodies
//! carried by PUSH_DATA / PULL_RESP / TX_ACK.

use thiserror::Error;

pub mod downlink;
pub mod uplink;
pub mod wire;

pub use downlink::{decode_downlink, PullRespPayload, TxAckError, TxAckPayload, Txpk};
pub use uplink::{Datr, PushPayload, Rxpk, StatusReport};
pub use wire::{Datagram, PacketKind, PROTOCOL_VERSION};

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("datagram too short ({0} bytes)")]
    Truncated(usize),

    #[error("unsupported protocol version {0}")]
    Version(u8),

    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid downlink: {0}")]
    InvalidDownlink(String),
}

/// base64 <-> raw bytes for the `data` field of rxpk/txpk objects.
pub mod serde_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
