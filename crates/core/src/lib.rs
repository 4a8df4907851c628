//! shared data model for the LoRa gateway packet forwarder

pub mod airtime;
pub mod frame;
pub mod stats;
pub mod types;

pub use airtime::time_on_air_us;
pub use frame::{DownlinkRequest, EmissionPolicy, MoteHeader, ReceivedFrame, TxPacket, TxTrigger};
pub use stats::{Metric, Stats, StatsSnapshot};
pub use types::{Bandwidth, CodeRate, Coordinates, CrcStatus, DataRate, Eui64, Modulation};
