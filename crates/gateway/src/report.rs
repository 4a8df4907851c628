//! Periodic statistics snapshot and the status report handed to the
//! upstream forwarder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::info;

use lora_fwd_core::Stats;
use lora_fwd_proto::StatusReport;

use crate::shutdown::ShutdownSignal;
use crate::GatewayConfig;

/// Hand-off slot between the stat loop (producer) and the upstream
/// forwarder, which attaches a pending report to its next PUSH_DATA.
#[derive(Debug, Default)]
pub struct ReportSlot {
    pending: Mutex<Option<StatusReport>>,
}

impl ReportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, report: StatusReport) {
        *self.pending.lock().unwrap() = Some(report);
    }

    pub fn take(&self) -> Option<StatusReport> {
        self.pending.lock().unwrap().take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }
}

/// Snapshot the counters every `stat_interval_s` and publish the report.
pub async fn run_stat_loop(
    cfg: Arc<GatewayConfig>,
    stats: Arc<Stats>,
    slot: Arc<ReportSlot>,
    shutdown: ShutdownSignal,
) {
    let period = Duration::from_secs(cfg.stat_interval_s.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // immediate first tick

    while shutdown.is_running() {
        ticker.tick().await;
        if !shutdown.is_running() {
            break;
        }

        let snap = stats.snapshot();
        let report = StatusReport::new(Utc::now(), cfg.ref_coordinates, &snap);

        info!("### [UPSTREAM] ###");
        info!("# RF packets received by concentrator: {}", snap.rx_received);
        info!(
            "# CRC_OK: {}, CRC_FAIL: {}, NO_CRC: {}",
            snap.rx_ok, snap.rx_bad, snap.rx_nocrc
        );
        info!(
            "# RF packets forwarded: {} ({} datagram(s) sent, {:.1}% acknowledged)",
            snap.rx_forwarded,
            snap.dgrams_sent,
            snap.ack_ratio_pct()
        );
        info!("### [DOWNSTREAM] ###");
        info!(
            "# PULL_RESP received: {}, RF packets sent: {}",
            snap.downlink_dgrams_received, snap.tx_ok
        );

        slot.publish(report);
    }
}
