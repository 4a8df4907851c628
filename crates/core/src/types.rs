use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Concentrator tick, microseconds. Wraps every ~71.6 minutes.
pub type CountUs = u32;

pub const MIN_LORA_PREAMBLE: u16 = 6;
pub const STD_LORA_PREAMBLE: u16 = 8;
pub const MIN_FSK_PREAMBLE: u16 = 3;
pub const STD_FSK_PREAMBLE: u16 = 5;

/// 64-bit gateway identifier, rendered as 16 hex digits on the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eui64(pub [u8; 8]);

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl FromStr for Eui64 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid EUI-64 {s:?}: {e}"))?;
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| format!("invalid EUI-64 {s:?}: expected 8 bytes"))?;
        Ok(Eui64(arr))
    }
}

impl Serialize for Eui64 {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Eui64 {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Payload CRC status reported by the concentrator for a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    Ok,
    Fail,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Lora,
    Fsk,
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modulation::Lora => write!(f, "LORA"),
            Modulation::Fsk => write!(f, "FSK"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    Khz125,
    Khz250,
    Khz500,
}

impl Bandwidth {
    pub fn hz(self) -> u32 {
        match self {
            Bandwidth::Khz125 => 125_000,
            Bandwidth::Khz250 => 250_000,
            Bandwidth::Khz500 => 500_000,
        }
    }

    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            125_000 => Some(Bandwidth::Khz125),
            250_000 => Some(Bandwidth::Khz250),
            500_000 => Some(Bandwidth::Khz500),
            _ => None,
        }
    }
}

/// Modulation rate: spreading factor + bandwidth for LoRa, bitrate for FSK.
///
/// The wire protocol encodes this as "SF7BW125"-style strings for LoRa and
/// as a plain bits-per-second number for FSK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    Lora { sf: u8, bw: Bandwidth },
    Fsk { bps: u32 },
}

impl DataRate {
    pub fn lora(sf: u8, bw: Bandwidth) -> Option<Self> {
        if (5..=12).contains(&sf) {
            Some(DataRate::Lora { sf, bw })
        } else {
            None
        }
    }

    pub fn modulation(self) -> Modulation {
        match self {
            DataRate::Lora { .. } => Modulation::Lora,
            DataRate::Fsk { .. } => Modulation::Fsk,
        }
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRate::Lora { sf, bw } => write!(f, "SF{}BW{}", sf, bw.hz() / 1000),
            DataRate::Fsk { bps } => write!(f, "{bps}"),
        }
    }
}

impl FromStr for DataRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("SF")
            .ok_or_else(|| format!("invalid datarate {s:?}"))?;
        let bw_at = rest
            .find("BW")
            .ok_or_else(|| format!("invalid datarate {s:?}"))?;
        let sf: u8 = rest[..bw_at]
            .parse()
            .map_err(|_| format!("invalid spreading factor in {s:?}"))?;
        let khz: u32 = rest[bw_at + 2..]
            .parse()
            .map_err(|_| format!("invalid bandwidth in {s:?}"))?;
        let bw = Bandwidth::from_hz(khz * 1000).ok_or_else(|| format!("invalid bandwidth in {s:?}"))?;
        DataRate::lora(sf, bw).ok_or_else(|| format!("invalid spreading factor in {s:?}"))
    }
}

/// LoRa coding rate, "4/5" through "4/8" on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRate {
    Cr4_5,
    Cr4_6,
    Cr4_7,
    Cr4_8,
}

impl CodeRate {
    /// Numerator of the redundancy fraction: 1 for 4/5 up to 4 for 4/8.
    pub fn parity(self) -> u8 {
        match self {
            CodeRate::Cr4_5 => 1,
            CodeRate::Cr4_6 => 2,
            CodeRate::Cr4_7 => 3,
            CodeRate::Cr4_8 => 4,
        }
    }
}

impl fmt::Display for CodeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeRate::Cr4_5 => write!(f, "4/5"),
            CodeRate::Cr4_6 => write!(f, "4/6"),
            CodeRate::Cr4_7 => write!(f, "4/7"),
            CodeRate::Cr4_8 => write!(f, "4/8"),
        }
    }
}

impl FromStr for CodeRate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "4/5" => Ok(CodeRate::Cr4_5),
            "4/6" => Ok(CodeRate::Cr4_6),
            "4/7" => Ok(CodeRate::Cr4_7),
            "4/8" => Ok(CodeRate::Cr4_8),
            _ => Err(format!("invalid coding rate {s:?}")),
        }
    }
}

/// Geodesic reference coordinates reported in the periodic status message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i16,
}
