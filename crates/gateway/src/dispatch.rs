//! Recurring passes around the JIT queue: dispatch due slots to the
//! concentrator, keep the clock mappings fresh, reserve beacon slots.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};

use lora_fwd_core::{Bandwidth, DataRate, Metric, Stats, TxPacket, TxTrigger};
use lora_fwd_radio::{ConcentratorGate, Dispatch, JitQueue, SlotClass, TimeSync};

use crate::shutdown::ShutdownSignal;
use crate::GatewayConfig;

/// Cadence of the dispatch pass. Must stay well below the JIT dispatch
/// lead so a due slot is never skipped over.
const DISPATCH_TICK_MS: u64 = 10;

/// Drains due slots and hands them to the concentrator early enough for
/// its timestamp-triggered transmit mode to fire at the exact tick.
pub async fn run_jit_dispatch(
    gate: Arc<ConcentratorGate>,
    jit: Arc<Mutex<JitQueue>>,
    timesync: Arc<TimeSync>,
    stats: Arc<Stats>,
    shutdown: ShutdownSignal,
) {
    info!("[jit ] start");
    let mut ticker = tokio::time::interval(Duration::from_millis(DISPATCH_TICK_MS));

    while shutdown.is_running() {
        ticker.tick().await;
        let now = match timesync.concentrator_now() {
            Ok(now) => now,
            // nothing can be scheduled before the first time sync either
            Err(_) => continue,
        };

        loop {
            let due = jit.lock().unwrap().pop_due(now);
            match due {
                None => break,
                Some(Dispatch::Missed(slot)) => {
                    if slot.class == SlotClass::Downlink {
                        stats.increment(Metric::TxFail);
                    }
                    warn!(
                        "[jit ] slot {} missed its dispatch window (tick {})",
                        slot.id, slot.tick
                    );
                }
                Some(Dispatch::Fire(slot)) => {
                    let trigger = TxTrigger::AtCount(slot.tick);
                    match gate.transmit(&slot.packet, trigger).await {
                        Ok(()) => {
                            if slot.class == SlotClass::Downlink {
                                stats.increment(Metric::TxOk);
                            }
                            debug!("[jit ] slot {} loaded, fires at tick {}", slot.id, slot.tick);
                        }
                        Err(e) => {
                            // no retry: the requested tick has a single meaning
                            if slot.class == SlotClass::Downlink {
                                stats.increment(Metric::TxFail);
                            }
                            error!("[jit ] transmit of slot {} failed: {e}", slot.id);
                        }
                    }
                }
            }
        }
    }
    info!("[jit ] exit");
}

/// Periodic clock-mapping refresh; time-driven, never triggered by
/// scheduling demand.
pub async fn run_timesync_loop(
    cfg: Arc<GatewayConfig>,
    gate: Arc<ConcentratorGate>,
    timesync: Arc<TimeSync>,
    shutdown: ShutdownSignal,
) {
    info!("[sync] start");
    let mut ticker =
        tokio::time::interval(Duration::from_secs(cfg.timesync_interval_s.max(1)));

    while shutdown.is_running() {
        ticker.tick().await;
        if let Err(e) = timesync.refresh(&gate).await {
            warn!("[sync] counter read failed: {e}");
        }
    }
    info!("[sync] exit");
}

/// Reserves the next beacon emission one period ahead of time.
pub async fn run_beacon_loop(
    cfg: Arc<GatewayConfig>,
    jit: Arc<Mutex<JitQueue>>,
    timesync: Arc<TimeSync>,
    shutdown: ShutdownSignal,
) {
    info!("[beac] start, period {} s", cfg.beacon_period_s);
    let period = Duration::from_secs(cfg.beacon_period_s.max(1));
    let mut ticker = tokio::time::interval(period);

    while shutdown.is_running() {
        ticker.tick().await;
        let now = match timesync.concentrator_now() {
            Ok(now) => now,
            Err(_) => {
                debug!("[beac] clock unresolved, skipping this period");
                continue;
            }
        };

        let tick = now.wrapping_add((cfg.beacon_period_s * 1_000_000) as u32);
        let packet = beacon_packet(&cfg);
        match jit.lock().unwrap().reserve_beacon(now, tick, packet) {
            Ok(id) => debug!("[beac] beacon reserved as slot {id} at tick {tick}"),
            Err(e) => warn!("[beac] beacon reservation refused: {e}"),
        }
    }
    info!("[beac] exit");
}

/// Minimal class-B beacon frame: RFU(2) | Time(4) | CRC(2) | GwSpecific(7)
/// | CRC(2), time in whole GPS seconds.
fn beacon_packet(cfg: &GatewayConfig) -> TxPacket {
    const GPS_EPOCH_UNIX_S: i64 = 315_964_800;
    const GPS_LEAP_SECONDS: i64 = 18;

    let gps_s = (Utc::now().timestamp() - GPS_EPOCH_UNIX_S + GPS_LEAP_SECONDS).max(0) as u32
        + cfg.beacon_period_s as u32;
    let mut payload = vec![0u8; 17];
    payload[2..6].copy_from_slice(&gps_s.to_le_bytes());

    TxPacket {
        freq_hz: cfg.beacon_freq_hz,
        rf_chain: 0,
        power_dbm: cfg.beacon_power_dbm,
        datarate: DataRate::Lora { sf: 9, bw: Bandwidth::Khz125 },
        coderate: Some(lora_fwd_core::CodeRate::Cr4_5),
        invert_polarity: false,
        preamble: Some(10),
        no_crc: true,
        payload,
    }
}
