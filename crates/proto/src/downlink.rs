//! JSON bodies for the downstream direction: `txpk` transmit requests and
//! the `txpk_ack` result reported back through TX_ACK.

use serde::{Deserialize, Serialize};

use lora_fwd_core::{DownlinkRequest, EmissionPolicy, Modulation, TxPacket};

use crate::uplink::Datr;
use crate::{serde_base64, ProtoError};

/// A transmit request as sent by the server in a PULL_RESP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Txpk {
    /// Send immediately, ignoring tmst/tmms.
    #[serde(default)]
    pub imme: bool,
    /// Emission tick of the concentrator counter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmst: Option<u32>,
    /// Emission time as milliseconds since the GPS epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmms: Option<u64>,
    pub freq: f64,
    #[serde(default)]
    pub rfch: u8,
    #[serde(default = "default_power")]
    pub powe: i8,
    pub modu: String,
    pub datr: Datr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codr: Option<String>,
    #[serde(default)]
    pub ipol: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prea: Option<u16>,
    pub size: u16,
    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncrc: Option<bool>,
}

fn default_power() -> i8 {
    14
}

/// Body of a PULL_RESP datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRespPayload {
    pub txpk: Txpk,
}

/// Decode a PULL_RESP JSON body into a transmit instruction.
pub fn decode_downlink(json: &[u8]) -> Result<DownlinkRequest, ProtoError> {
    let payload: PullRespPayload = serde_json::from_slice(json)?;
    let txpk = payload.txpk;

    let datarate = txpk
        .datr
        .to_datarate()
        .map_err(ProtoError::InvalidDownlink)?;
    match (datarate.modulation(), txpk.modu.as_str()) {
        (Modulation::Lora, "LORA") | (Modulation::Fsk, "FSK") => {}
        (_, other) => {
            return Err(ProtoError::InvalidDownlink(format!(
                "modulation {other:?} does not match datr"
            )))
        }
    }

    if txpk.size as usize != txpk.data.len() {
        return Err(ProtoError::InvalidDownlink(format!(
            "size field {} does not match decoded payload length {}",
            txpk.size,
            txpk.data.len()
        )));
    }

    let emission = if txpk.imme {
        EmissionPolicy::Immediate
    } else if let Some(tmst) = txpk.tmst {
        EmissionPolicy::AtCount(tmst)
    } else if let Some(tmms) = txpk.tmms {
        EmissionPolicy::AtGpsMillis(tmms)
    } else {
        return Err(ProtoError::InvalidDownlink("no emission time given".into()));
    };

    let coderate = match txpk.codr {
        Some(ref s) => Some(s.parse().map_err(ProtoError::InvalidDownlink)?),
        None => None,
    };

    Ok(DownlinkRequest {
        emission,
        packet: TxPacket {
            freq_hz: (txpk.freq * 1e6).round() as u32,
            rf_chain: txpk.rfch,
            power_dbm: txpk.powe,
            datarate,
            coderate,
            invert_polarity: txpk.ipol,
            preamble: txpk.prea,
            no_crc: txpk.ncrc.unwrap_or(false),
            payload: txpk.data,
        },
    })
}

/// Result of a downlink request, reported in the TX_ACK JSON body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxAckError {
    None,
    TooLate,
    TooEarly,
    CollisionPacket,
    CollisionBeacon,
    TxFreq,
    TxPower,
    GpsUnlocked,
}

impl TxAckError {
    pub fn as_str(self) -> &'static str {
        match self {
            TxAckError::None => "NONE",
            TxAckError::TooLate => "TOO_LATE",
            TxAckError::TooEarly => "TOO_EARLY",
            TxAckError::CollisionPacket => "COLLISION_PACKET",
            TxAckError::CollisionBeacon => "COLLISION_BEACON",
            TxAckError::TxFreq => "TX_FREQ",
            TxAckError::TxPower => "TX_POWER",
            TxAckError::GpsUnlocked => "GPS_UNLOCKED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxAckPayload {
    pub txpk_ack: TxpkAck,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxpkAck {
    pub error: String,
}

impl TxAckPayload {
    pub fn new(error: TxAckError) -> Self {
        TxAckPayload { txpk_ack: TxpkAck { error: error.as_str().to_string() } }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lora_fwd_core::{Bandwidth, CodeRate, DataRate};

    const TXPK_JSON: &str = r#"{"txpk":{
        "imme":false,
        "tmst":3512348611,
        "freq":869.525,
        "rfch":0,
        "powe":27,
        "modu":"LORA",
        "datr":"SF9BW125",
        "codr":"4/5",
        "ipol":true,
        "size":3,
        "data":"SGkh"
    }}"#;

    #[test]
    fn decodes_timestamped_lora_downlink() {
        let req = decode_downlink(TXPK_JSON.as_bytes()).unwrap();
        assert_eq!(req.emission, EmissionPolicy::AtCount(3_512_348_611));

        let pkt = &req.packet;
        assert_eq!(pkt.freq_hz, 869_525_000);
        assert_eq!(pkt.power_dbm, 27);
        assert_eq!(pkt.datarate, DataRate::Lora { sf: 9, bw: Bandwidth::Khz125 });
        assert_eq!(pkt.coderate, Some(CodeRate::Cr4_5));
        assert!(pkt.invert_polarity);
        assert_eq!(pkt.payload, b"Hi!");
    }

    #[test]
    fn immediate_flag_wins_over_timestamps() {
        let json = TXPK_JSON.replace(r#""imme":false"#, r#""imme":true"#);
        let req = decode_downlink(json.as_bytes()).unwrap();
        assert_eq!(req.emission, EmissionPolicy::Immediate);
    }

    #[test]
    fn gps_timestamp_maps_to_gps_policy() {
        let json = TXPK_JSON.replace(r#""tmst":3512348611"#, r#""tmms":1126953000123"#);
        let req = decode_downlink(json.as_bytes()).unwrap();
        assert_eq!(req.emission, EmissionPolicy::AtGpsMillis(1_126_953_000_123));
    }

    #[test]
    fn rejects_missing_emission_time() {
        let json = TXPK_JSON.replace(r#""tmst":3512348611,"#, "");
        let err = decode_downlink(json.as_bytes()).unwrap_err();
        assert!(matches!(err, ProtoError::InvalidDownlink(_)), "{err}");
    }

    #[test]
    fn rejects_size_mismatch() {
        let json = TXPK_JSON.replace(r#""size":3"#, r#""size":17"#);
        let err = decode_downlink(json.as_bytes()).unwrap_err();
        assert!(matches!(err, ProtoError::InvalidDownlink(_)), "{err}");
    }

    #[test]
    fn rejects_modulation_mismatch() {
        let json = TXPK_JSON.replace(r#""modu":"LORA""#, r#""modu":"FSK""#);
        let err = decode_downlink(json.as_bytes()).unwrap_err();
        assert!(matches!(err, ProtoError::InvalidDownlink(_)), "{err}");
    }

    #[test]
    fn tx_ack_payload_encoding() {
        let json = serde_json::to_string(&TxAckPayload::new(TxAckError::CollisionBeacon)).unwrap();
        assert_eq!(json, r#"{"txpk_ack":{"error":"COLLISION_BEACON"}}"#);
    }
}
