use crate::types::{CodeRate, CountUs, CrcStatus, DataRate, Modulation};

/// One inbound radio packet, immutable once read from the concentrator.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// RF center frequency the frame was received on.
    pub freq_hz: u32,
    /// IF chain (logical channel) the frame was demodulated on.
    pub if_chain: u8,
    /// RF chain (radio front-end) the frame was received through.
    pub rf_chain: u8,
    /// Concentrator tick latched at end of packet.
    pub count_us: CountUs,
    pub crc: CrcStatus,
    pub datarate: DataRate,
    /// Coding rate; `None` for FSK frames.
    pub coderate: Option<CodeRate>,
    pub rssi: f32,
    /// Signal-to-noise ratio in dB; meaningless for FSK.
    pub snr: f32,
    pub payload: Vec<u8>,
}

impl ReceivedFrame {
    pub fn modulation(&self) -> Modulation {
        self.datarate.modulation()
    }

    /// Extracts the device address and frame counter from the FHDR prefix,
    /// for diagnostics only. The MAC payload is otherwise opaque to the
    /// forwarder. Returns `None` when the payload is too short to carry an
    /// FHDR; short frames are still forwarded, just not attributed.
    pub fn mote_header(&self) -> Option<MoteHeader> {
        if self.payload.len() < 8 {
            return None;
        }
        let p = &self.payload;
        let addr = u32::from_le_bytes([p[1], p[2], p[3], p[4]]);
        let fcnt = u16::from_le_bytes([p[6], p[7]]);
        Some(MoteHeader { addr, fcnt })
    }
}

/// Device address and frame counter lifted from an uplink FHDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoteHeader {
    pub addr: u32,
    pub fcnt: u16,
}

/// How the concentrator fires a queued transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxTrigger {
    /// Fire as soon as the packet is loaded.
    Immediate,
    /// Fire when the internal tick counter reaches the given value.
    AtCount(CountUs),
}

/// RF parameters and payload for one downlink transmission.
#[derive(Debug, Clone)]
pub struct TxPacket {
    pub freq_hz: u32,
    pub rf_chain: u8,
    pub power_dbm: i8,
    pub datarate: DataRate,
    pub coderate: Option<CodeRate>,
    /// Invert I/Q polarity (set for downlinks to motes).
    pub invert_polarity: bool,
    /// Preamble symbol count; `None` selects the modulation default.
    pub preamble: Option<u16>,
    /// Transmit without appending a payload CRC.
    pub no_crc: bool,
    pub payload: Vec<u8>,
}

/// When the server asked for a downlink to be emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionPolicy {
    Immediate,
    /// Absolute concentrator tick.
    AtCount(CountUs),
    /// Milliseconds since the GPS epoch (1980-01-06).
    AtGpsMillis(u64),
}

/// A decoded transmit instruction, produced by the downstream receiver and
/// consumed by the JIT scheduler.
#[derive(Debug, Clone)]
pub struct DownlinkRequest {
    pub emission: EmissionPolicy,
    pub packet: TxPacket,
}
