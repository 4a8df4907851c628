//! Long-lived forwarder tasks and their wiring: upstream polling, the
//! downstream keep-alive cycle, JIT dispatch, time-sync refresh and the
//! periodic status report.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use lora_fwd_core::{Coordinates, Eui64};
use lora_fwd_radio::JitConfig;

pub mod dispatch;
pub mod downstream;
pub mod report;
pub mod shutdown;
pub mod upstream;

pub use dispatch::{run_beacon_loop, run_jit_dispatch, run_timesync_loop};
pub use downstream::DownstreamReceiver;
pub use report::{run_stat_loop, ReportSlot};
pub use shutdown::{shutdown_channel, ShutdownController, ShutdownSignal, StopKind};
pub use upstream::UpstreamForwarder;

/// Startup configuration, deserialized once from a JSON document. Every
/// field has a default so a minimal file only needs to override the server
/// coordinates it cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub gateway_id: Eui64,
    pub server_address: String,
    pub serv_port_up: u16,
    pub serv_port_down: u16,
    /// PULL_DATA cadence, seconds.
    pub keepalive_interval_s: u64,
    /// Status report cadence, seconds.
    pub stat_interval_s: u64,
    /// Time-sync refresh cadence, seconds.
    pub timesync_interval_s: u64,
    /// How long to wait for a PUSH_ACK.
    pub push_timeout_ms: u64,
    /// Idle sleep after an empty poll cycle.
    pub fetch_sleep_ms: u64,
    pub forward_crc_valid: bool,
    pub forward_crc_error: bool,
    pub forward_crc_disabled: bool,
    /// Consecutive unacknowledged keepalives before the process asks to
    /// terminate; 0 disables the auto-quit.
    pub autoquit_threshold: u32,
    pub tx_freq_min_hz: u32,
    pub tx_freq_max_hz: u32,
    pub tx_power_max_dbm: i8,
    pub ref_coordinates: Option<Coordinates>,
    pub beacon_enabled: bool,
    pub beacon_period_s: u64,
    pub beacon_freq_hz: u32,
    pub beacon_power_dbm: i8,
    pub jit: JitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_id: Eui64([0; 8]),
            server_address: "127.0.0.1".to_string(),
            serv_port_up: 1700,
            serv_port_down: 1700,
            keepalive_interval_s: 5,
            stat_interval_s: 30,
            timesync_interval_s: 30,
            push_timeout_ms: 100,
            fetch_sleep_ms: 50,
            forward_crc_valid: true,
            forward_crc_error: false,
            forward_crc_disabled: false,
            autoquit_threshold: 0,
            tx_freq_min_hz: 863_000_000,
            tx_freq_max_hz: 870_000_000,
            tx_power_max_dbm: 27,
            ref_coordinates: None,
            beacon_enabled: false,
            beacon_period_s: 128,
            beacon_freq_hz: 869_525_000,
            beacon_power_dbm: 14,
            jit: JitConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        let cfg: GatewayConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid configuration {}", path.display()))?;
        if cfg.tx_freq_min_hz >= cfg.tx_freq_max_hz {
            anyhow::bail!("invalid configuration: empty TX frequency range");
        }
        Ok(cfg)
    }
}
