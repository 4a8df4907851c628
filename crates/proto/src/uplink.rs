//! JSON bodies for the upstream direction: `rxpk` arrays and the periodic
//! `stat` object.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use lora_fwd_core::{Coordinates, CrcStatus, DataRate, Modulation, ReceivedFrame, StatsSnapshot};

use crate::serde_base64;

/// `datr` is a "SF7BW125"-style string for LoRa and a plain number for FSK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datr {
    Rate(String),
    Bps(u32),
}

impl From<DataRate> for Datr {
    fn from(dr: DataRate) -> Self {
        match dr {
            DataRate::Lora { .. } => Datr::Rate(dr.to_string()),
            DataRate::Fsk { bps } => Datr::Bps(bps),
        }
    }
}

impl Datr {
    pub fn to_datarate(&self) -> Result<DataRate, String> {
        match self {
            Datr::Rate(s) => s.parse(),
            Datr::Bps(bps) => Ok(DataRate::Fsk { bps: *bps }),
        }
    }
}

/// One received frame as reported to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rxpk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub tmst: u32,
    pub chan: u8,
    pub rfch: u8,
    pub freq: f64,
    /// CRC status: 1 = OK, -1 = fail, 0 = no CRC.
    pub stat: i8,
    pub modu: String,
    pub datr: Datr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codr: Option<String>,
    pub rssi: i16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsnr: Option<f32>,
    pub size: u16,
    #[serde(with = "serde_base64")]
    pub data: Vec<u8>,
}

impl Rxpk {
    pub fn from_frame(frame: &ReceivedFrame, time: Option<DateTime<Utc>>) -> Self {
        Rxpk {
            time: time.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)),
            tmst: frame.count_us,
            chan: frame.if_chain,
            rfch: frame.rf_chain,
            freq: frame.freq_hz as f64 / 1e6,
            stat: match frame.crc {
                CrcStatus::Ok => 1,
                CrcStatus::Fail => -1,
                CrcStatus::Absent => 0,
            },
            modu: frame.modulation().to_string(),
            datr: frame.datarate.into(),
            codr: frame.coderate.map(|c| c.to_string()),
            rssi: frame.rssi.round() as i16,
            lsnr: match frame.modulation() {
                Modulation::Lora => Some(frame.snr),
                Modulation::Fsk => None,
            },
            size: frame.payload.len() as u16,
            data: frame.payload.clone(),
        }
    }
}

/// Body of a PUSH_DATA datagram. `rxpk` is omitted entirely on a pure
/// status push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PushPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rxpk: Vec<Rxpk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<StatusReport>,
}

/// The periodic `stat` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lati: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alti: Option<i32>,
    /// Frames received this interval.
    pub rxnb: u64,
    /// Frames received with a valid CRC.
    pub rxok: u64,
    /// Frames forwarded upstream.
    pub rxfw: u64,
    /// Percentage of upstream datagrams acknowledged.
    pub ackr: f64,
    /// Downlink datagrams received this interval.
    pub dwnb: u64,
    /// Packets emitted this interval.
    pub txnb: u64,
}

impl StatusReport {
    pub fn new(now: DateTime<Utc>, coords: Option<Coordinates>, snap: &StatsSnapshot) -> Self {
        StatusReport {
            time: now.format("%Y-%m-%d %H:%M:%S GMT").to_string(),
            lati: coords.map(|c| c.latitude),
            long: coords.map(|c| c.longitude),
            alti: coords.map(|c| c.altitude as i32),
            rxnb: snap.rx_received,
            rxok: snap.rx_ok,
            rxfw: snap.rx_forwarded,
            ackr: (snap.ack_ratio_pct() * 10.0).round() / 10.0,
            dwnb: snap.downlink_dgrams_received,
            txnb: snap.tx_ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lora_fwd_core::{Bandwidth, CodeRate};

    fn frame() -> ReceivedFrame {
        ReceivedFrame {
            freq_hz: 868_300_000,
            if_chain: 2,
            rf_chain: 0,
            count_us: 3_512_348,
            crc: CrcStatus::Ok,
            datarate: DataRate::Lora { sf: 7, bw: Bandwidth::Khz125 },
            coderate: Some(CodeRate::Cr4_6),
            rssi: -35.4,
            snr: 5.1,
            payload: vec![0x40, 1, 2, 3, 4, 0, 7, 0, 0xDE, 0xAD],
        }
    }

    #[test]
    fn rxpk_fields_follow_the_wire_encoding() {
        let pk = Rxpk::from_frame(&frame(), None);
        assert_eq!(pk.tmst, 3_512_348);
        assert_eq!(pk.freq, 868.3);
        assert_eq!(pk.stat, 1);
        assert_eq!(pk.modu, "LORA");
        assert_eq!(pk.datr, Datr::Rate("SF7BW125".into()));
        assert_eq!(pk.codr.as_deref(), Some("4/6"));
        assert_eq!(pk.rssi, -35);
        assert_eq!(pk.size, 10);

        let json = serde_json::to_string(&pk).unwrap();
        assert!(json.contains(r#""datr":"SF7BW125""#), "{json}");
        assert!(json.contains(r#""data":"QAECAwQABwDerQ==""#), "{json}");
    }

    #[test]
    fn fsk_rxpk_uses_numeric_datr_and_no_snr() {
        let mut f = frame();
        f.datarate = DataRate::Fsk { bps: 50_000 };
        f.coderate = None;
        let pk = Rxpk::from_frame(&f, None);
        assert_eq!(pk.modu, "FSK");
        assert_eq!(pk.datr, Datr::Bps(50_000));
        assert!(pk.lsnr.is_none());

        let json = serde_json::to_string(&pk).unwrap();
        assert!(json.contains(r#""datr":50000"#), "{json}");
    }

    #[test]
    fn push_payload_round_trip_preserves_frames() {
        let frames = vec![frame(), {
            let mut f = frame();
            f.payload = vec![1, 2, 3];
            f.crc = CrcStatus::Absent;
            f
        }];
        let payload = PushPayload {
            rxpk: frames.iter().map(|f| Rxpk::from_frame(f, None)).collect(),
            stat: None,
        };

        let json = serde_json::to_vec(&payload).unwrap();
        let decoded: PushPayload = serde_json::from_slice(&json).unwrap();

        assert_eq!(decoded.rxpk.len(), 2);
        assert_eq!(decoded, payload);
        assert_eq!(decoded.rxpk[0].data, frames[0].payload);
        assert_eq!(decoded.rxpk[1].stat, 0);
    }

    #[test]
    fn stat_report_formats_time_and_ratio() {
        let snap = StatsSnapshot {
            rx_received: 5,
            rx_ok: 4,
            rx_forwarded: 4,
            dgrams_sent: 3,
            acks_received: 2,
            downlink_dgrams_received: 1,
            tx_ok: 1,
            ..Default::default()
        };
        let now = DateTime::parse_from_rfc3339("2014-01-12T08:59:28Z")
            .unwrap()
            .with_timezone(&Utc);
        let coords = Coordinates { latitude: 46.24, longitude: 3.2523, altitude: 145 };
        let report = StatusReport::new(now, Some(coords), &snap);

        assert_eq!(report.time, "2014-01-12 08:59:28 GMT");
        assert_eq!(report.rxnb, 5);
        assert_eq!(report.ackr, 66.7);

        let json = serde_json::to_string(&PushPayload { rxpk: vec![], stat: Some(report) }).unwrap();
        assert!(!json.contains("rxpk"), "empty rxpk must be omitted: {json}");
        assert!(json.contains(r#""stat":{"#), "{json}");
    }
}
