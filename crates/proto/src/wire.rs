//! Binary datagram layer: 4-byte preamble, optional gateway EUI, JSON tail.

use bytes::{BufMut, BytesMut};

use lora_fwd_core::Eui64;

use crate::ProtoError;

pub const PROTOCOL_VERSION: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullResp = 0x03,
    PullAck = 0x04,
    TxAck = 0x05,
}

impl PacketKind {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(PacketKind::PushData),
            0x01 => Some(PacketKind::PushAck),
            0x02 => Some(PacketKind::PullData),
            0x03 => Some(PacketKind::PullResp),
            0x04 => Some(PacketKind::PullAck),
            0x05 => Some(PacketKind::TxAck),
            _ => None,
        }
    }
}

/// A parsed datagram, borrowing the JSON tail from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Datagram<'a> {
    PushData { token: u16, gateway: Eui64, json: &'a [u8] },
    PushAck { token: u16 },
    PullData { token: u16, gateway: Eui64 },
    PullResp { token: u16, json: &'a [u8] },
    PullAck { token: u16 },
    TxAck { token: u16, gateway: Eui64, json: &'a [u8] },
}

impl Datagram<'_> {
    pub fn token(&self) -> u16 {
        match *self {
            Datagram::PushData { token, .. }
            | Datagram::PushAck { token }
            | Datagram::PullData { token, .. }
            | Datagram::PullResp { token, .. }
            | Datagram::PullAck { token }
            | Datagram::TxAck { token, .. } => token,
        }
    }
}

fn preamble(token: u16, kind: PacketKind) -> BytesMut {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u16(token);
    buf.put_u8(kind as u8);
    buf
}

pub fn push_data(token: u16, gateway: Eui64, json: &[u8]) -> Vec<u8> {
    let mut buf = preamble(token, PacketKind::PushData);
    buf.put_slice(&gateway.0);
    buf.put_slice(json);
    buf.to_vec()
}

pub fn push_ack(token: u16) -> Vec<u8> {
    preamble(token, PacketKind::PushAck).to_vec()
}

pub fn pull_data(token: u16, gateway: Eui64) -> Vec<u8> {
    let mut buf = preamble(token, PacketKind::PullData);
    buf.put_slice(&gateway.0);
    buf.to_vec()
}

pub fn pull_resp(token: u16, json: &[u8]) -> Vec<u8> {
    let mut buf = preamble(token, PacketKind::PullResp);
    buf.put_slice(json);
    buf.to_vec()
}

pub fn pull_ack(token: u16) -> Vec<u8> {
    preamble(token, PacketKind::PullAck).to_vec()
}

pub fn tx_ack(token: u16, gateway: Eui64, json: &[u8]) -> Vec<u8> {
    let mut buf = preamble(token, PacketKind::TxAck);
    buf.put_slice(&gateway.0);
    buf.put_slice(json);
    buf.to_vec()
}

pub fn parse(buf: &[u8]) -> Result<Datagram<'_>, ProtoError> {
    if buf.len() < 4 {
        return Err(ProtoError::Truncated(buf.len()));
    }
    if buf[0] != PROTOCOL_VERSION {
        return Err(ProtoError::Version(buf[0]));
    }
    let token = u16::from_be_bytes([buf[1], buf[2]]);
    let kind = PacketKind::from_u8(buf[3]).ok_or(ProtoError::UnknownType(buf[3]))?;

    let eui = |buf: &[u8]| -> Result<Eui64, ProtoError> {
        if buf.len() < 12 {
            return Err(ProtoError::Truncated(buf.len()));
        }
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[4..12]);
        Ok(Eui64(id))
    };

    Ok(match kind {
        PacketKind::PushData => {
            Datagram::PushData { token, gateway: eui(buf)?, json: &buf[12..] }
        }
        PacketKind::PushAck => Datagram::PushAck { token },
        PacketKind::PullData => Datagram::PullData { token, gateway: eui(buf)? },
        PacketKind::PullResp => Datagram::PullResp { token, json: &buf[4..] },
        PacketKind::PullAck => Datagram::PullAck { token },
        PacketKind::TxAck => Datagram::TxAck { token, gateway: eui(buf)?, json: &buf[12..] },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EUI: Eui64 = Eui64([0xAA, 0x55, 0x5A, 0, 0, 0, 0, 0x01]);

    #[test]
    fn push_data_round_trip() {
        let json = br#"{"rxpk":[]}"#;
        let buf = push_data(0x1234, EUI, json);
        assert_eq!(buf[0], PROTOCOL_VERSION);
        assert_eq!(&buf[1..3], &[0x12, 0x34]);
        assert_eq!(buf[3], 0x00);

        match parse(&buf).unwrap() {
            Datagram::PushData { token, gateway, json: body } => {
                assert_eq!(token, 0x1234);
                assert_eq!(gateway, EUI);
                assert_eq!(body, json);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ack_frames_are_four_bytes() {
        assert_eq!(push_ack(7).len(), 4);
        assert_eq!(pull_ack(7).len(), 4);
        assert_eq!(parse(&push_ack(7)).unwrap(), Datagram::PushAck { token: 7 });
        assert_eq!(parse(&pull_ack(9)).unwrap(), Datagram::PullAck { token: 9 });
    }

    #[test]
    fn pull_data_carries_gateway_id() {
        let buf = pull_data(0xBEEF, EUI);
        assert_eq!(buf.len(), 12);
        match parse(&buf).unwrap() {
            Datagram::PullData { token, gateway } => {
                assert_eq!(token, 0xBEEF);
                assert_eq!(gateway, EUI);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pull_resp_json_starts_after_preamble() {
        let buf = pull_resp(1, br#"{"txpk":{}}"#);
        match parse(&buf).unwrap() {
            Datagram::PullResp { token: 1, json } => assert_eq!(json, br#"{"txpk":{}}"#),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse(&[]), Err(ProtoError::Truncated(0))));
        assert!(matches!(parse(&[0x01, 0, 0, 0]), Err(ProtoError::Version(1))));
        assert!(matches!(parse(&[0x02, 0, 0, 0x7F]), Err(ProtoError::UnknownType(0x7F))));
        // PUSH_DATA too short to carry an EUI
        assert!(matches!(parse(&[0x02, 0, 0, 0x00, 1, 2]), Err(ProtoError::Truncated(6))));
    }
}
