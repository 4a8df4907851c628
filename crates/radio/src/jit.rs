//! Just-In-Time transmit queue: admission control and temporal ordering for
//! the single downlink resource.
//!
//! Slots live in an arena keyed by id; a separate index sorted by emission
//! time drives dispatch selection. The 32-bit concentrator tick wraps every
//! ~71.6 minutes, so every comparison goes through a 64-bit monotone
//! expansion maintained from the `now` values the callers pass in.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lora_fwd_core::TxPacket;

pub type SlotId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClass {
    Downlink,
    /// Reserved, non-movable occupant; replaced wholesale each beacon period.
    Beacon,
}

/// An admitted transmission with its resolved emission tick and estimated
/// on-air duration.
#[derive(Debug, Clone)]
pub struct ScheduledSlot {
    pub id: SlotId,
    pub tick: u32,
    pub duration_us: u32,
    pub class: SlotClass,
    pub packet: TxPacket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JitRejection {
    #[error("queue full")]
    QueueFull,

    #[error("requested emission time is too close")]
    TooLate,

    #[error("requested emission time exceeds the lookahead window")]
    TooEarly,

    #[error("overlaps the reserved beacon slot")]
    CollisionWithBeacon,

    #[error("overlaps an already scheduled packet")]
    CollisionWithPacket,
}

/// Outcome of a dispatch pass.
#[derive(Debug)]
pub enum Dispatch {
    /// Hand this slot to the concentrator now; the hardware fires at the
    /// slot tick on its own.
    Fire(ScheduledSlot),
    /// The dispatch window was missed entirely; the slot is dropped.
    Missed(ScheduledSlot),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Max number of queued slots.
    pub capacity: usize,
    /// Time the hardware needs between load and emission.
    pub tx_start_delay_us: u32,
    /// Guard margin applied around every occupied interval.
    pub margin_us: u32,
    /// How far before the emission tick a slot is handed to the hardware.
    pub dispatch_lead_us: u32,
    /// Requests further out than this are rejected `TooEarly`.
    pub max_lookahead_us: u32,
    /// Quiet window ahead of a beacon emission.
    pub beacon_guard_us: u32,
    /// Window reserved for the beacon emission itself.
    pub beacon_reserved_us: u32,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            tx_start_delay_us: 1_500,
            margin_us: 1_000,
            dispatch_lead_us: 30_000,
            max_lookahead_us: 130_000_000,
            beacon_guard_us: 3_000_000,
            beacon_reserved_us: 2_120_000,
        }
    }
}

#[derive(Debug)]
struct Entry {
    slot: ScheduledSlot,
    /// Emission tick on the expanded 64-bit timeline.
    start: i64,
}

impl Entry {
    fn end(&self) -> i64 {
        self.start + self.slot.duration_us as i64
    }
}

#[derive(Debug)]
pub struct JitQueue {
    cfg: JitConfig,
    next_id: SlotId,
    slots: HashMap<SlotId, Entry>,
    by_time: BTreeMap<(i64, SlotId), ()>,
    /// Last observed 32-bit tick and the accumulated wrap offset.
    last_now: u32,
    wrap_offset: i64,
}

impl JitQueue {
    pub fn new(cfg: JitConfig) -> Self {
        Self {
            cfg,
            next_id: 0,
            slots: HashMap::new(),
            by_time: BTreeMap::new(),
            last_now: 0,
            wrap_offset: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Admit a downlink at an absolute emission tick. Checks run in a fixed
    /// order so the rejection reported to the server is deterministic:
    /// queue capacity, lead time, lookahead, beacon overlap, packet overlap.
    pub fn enqueue_downlink(
        &mut self,
        now: u32,
        tick: u32,
        duration_us: u32,
        packet: TxPacket,
    ) -> Result<SlotId, JitRejection> {
        let now64 = self.advance(now);
        let start = self.expand(tick);
        self.admit(now64, start, duration_us, SlotClass::Downlink, packet)
    }

    /// Admit a downlink "as soon as possible": the emission tick starts at
    /// the earliest schedulable instant and slides past occupied intervals
    /// until a gap fits. Returns the resolved tick along with the slot id.
    pub fn enqueue_asap(
        &mut self,
        now: u32,
        duration_us: u32,
        packet: TxPacket,
    ) -> Result<(SlotId, u32), JitRejection> {
        let now64 = self.advance(now);
        let mut start = now64 + self.min_lead_us() as i64 + self.cfg.margin_us as i64;

        // entries are scanned in time order, so one pass settles the gap
        let entries: Vec<(i64, i64)> = self
            .by_time
            .keys()
            .map(|&(_, id)| {
                let e = &self.slots[&id];
                (occupied_start(e, &self.cfg), occupied_end(e, &self.cfg))
            })
            .collect();
        for &(occ_start, occ_end) in &entries {
            let end = start + duration_us as i64 + self.cfg.margin_us as i64;
            if start < occ_end && occ_start < end {
                start = occ_end + self.cfg.margin_us as i64;
            }
        }

        if start - now64 > self.cfg.max_lookahead_us as i64 {
            return Err(JitRejection::CollisionWithPacket);
        }

        let tick = (start & 0xFFFF_FFFF) as u32;
        let id = self.admit(now64, start, duration_us, SlotClass::Downlink, packet)?;
        Ok((id, tick))
    }

    /// Reserve the next beacon emission, replacing any beacon still queued.
    /// The beacon is non-movable: it fails admission rather than shifting.
    pub fn reserve_beacon(
        &mut self,
        now: u32,
        tick: u32,
        packet: TxPacket,
    ) -> Result<SlotId, JitRejection> {
        let now64 = self.advance(now);
        let start = self.expand(tick);

        let stale: Vec<SlotId> = self
            .slots
            .iter()
            .filter(|(_, e)| e.slot.class == SlotClass::Beacon)
            .map(|(&id, _)| id)
            .collect();
        for id in stale {
            self.remove(id);
        }

        self.admit(now64, start, self.cfg.beacon_reserved_us, SlotClass::Beacon, packet)
    }

    /// Dispatch pass: release the earliest slot once its lead window is
    /// reached. Slots whose window has already closed come back as
    /// [`Dispatch::Missed`] and are removed from the queue.
    pub fn pop_due(&mut self, now: u32) -> Option<Dispatch> {
        let now64 = self.advance(now);
        let (&(start, id), _) = self.by_time.iter().next()?;
        let lead = start - now64;

        if lead < (self.cfg.tx_start_delay_us + self.cfg.margin_us) as i64 {
            let entry = self.remove(id).expect("index and arena out of sync");
            warn!(
                "jit: missed dispatch window for slot {} (tick {})",
                id, entry.slot.tick
            );
            return Some(Dispatch::Missed(entry.slot));
        }
        if lead <= self.cfg.dispatch_lead_us as i64 {
            let entry = self.remove(id).expect("index and arena out of sync");
            debug!("jit: dispatching slot {} {} us ahead", id, lead);
            return Some(Dispatch::Fire(entry.slot));
        }
        None
    }

    /// Ticks until the next slot needs dispatching, if any.
    pub fn next_deadline_in_us(&mut self, now: u32) -> Option<i64> {
        let now64 = self.advance(now);
        let (&(start, _), _) = self.by_time.iter().next()?;
        Some(start - now64 - self.cfg.dispatch_lead_us as i64)
    }

    fn admit(
        &mut self,
        now64: i64,
        start: i64,
        duration_us: u32,
        class: SlotClass,
        packet: TxPacket,
    ) -> Result<SlotId, JitRejection> {
        if self.slots.len() >= self.cfg.capacity {
            return Err(JitRejection::QueueFull);
        }

        let lead = start - now64;
        if lead < self.min_lead_us() as i64 {
            return Err(JitRejection::TooLate);
        }
        if lead > self.cfg.max_lookahead_us as i64 {
            return Err(JitRejection::TooEarly);
        }

        let end = start + duration_us as i64 + self.cfg.margin_us as i64;
        let cand_start = start - self.cfg.margin_us as i64;

        let mut beacon_clash = false;
        let mut packet_clash = false;
        for entry in self.slots.values() {
            let occ_start = occupied_start(entry, &self.cfg);
            let occ_end = occupied_end(entry, &self.cfg);
            if cand_start < occ_end && occ_start < end {
                match entry.slot.class {
                    SlotClass::Beacon => beacon_clash = true,
                    SlotClass::Downlink => packet_clash = true,
                }
            }
        }
        if beacon_clash {
            return Err(JitRejection::CollisionWithBeacon);
        }
        if packet_clash {
            return Err(JitRejection::CollisionWithPacket);
        }

        let id = self.next_id;
        self.next_id += 1;
        let slot = ScheduledSlot {
            id,
            tick: (start & 0xFFFF_FFFF) as u32,
            duration_us,
            class,
            packet,
        };
        self.slots.insert(id, Entry { slot, start });
        self.by_time.insert((start, id), ());
        Ok(id)
    }

    fn remove(&mut self, id: SlotId) -> Option<Entry> {
        let entry = self.slots.remove(&id)?;
        self.by_time.remove(&(entry.start, id));
        Some(entry)
    }

    fn min_lead_us(&self) -> u32 {
        self.cfg.tx_start_delay_us + self.cfg.margin_us + self.cfg.dispatch_lead_us
    }

    /// Fold a new 32-bit `now` into the 64-bit timeline, detecting wraps.
    fn advance(&mut self, now: u32) -> i64 {
        if now < self.last_now && self.last_now - now > u32::MAX / 2 {
            self.wrap_offset += 1i64 << 32;
        }
        self.last_now = now;
        self.wrap_offset + now as i64
    }

    /// Expand an absolute tick relative to the current timeline position.
    fn expand(&self, tick: u32) -> i64 {
        let delta = tick.wrapping_sub(self.last_now) as i32;
        self.wrap_offset + self.last_now as i64 + delta as i64
    }
}

fn occupied_start(entry: &Entry, cfg: &JitConfig) -> i64 {
    match entry.slot.class {
        SlotClass::Downlink => entry.start - cfg.margin_us as i64,
        SlotClass::Beacon => entry.start - cfg.beacon_guard_us as i64,
    }
}

fn occupied_end(entry: &Entry, cfg: &JitConfig) -> i64 {
    entry.end() + cfg.margin_us as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use lora_fwd_core::{Bandwidth, CodeRate, DataRate};

    fn packet() -> TxPacket {
        TxPacket {
            freq_hz: 869_525_000,
            rf_chain: 0,
            power_dbm: 14,
            datarate: DataRate::Lora { sf: 9, bw: Bandwidth::Khz125 },
            coderate: Some(CodeRate::Cr4_5),
            invert_polarity: true,
            preamble: None,
            no_crc: false,
            payload: vec![0xAA; 16],
        }
    }

    fn queue() -> JitQueue {
        JitQueue::new(JitConfig::default())
    }

    const NOW: u32 = 10_000_000;

    #[test]
    fn admits_within_window() {
        let mut q = queue();
        let id = q.enqueue_downlink(NOW, NOW + 2_000_000, 50_000, packet()).unwrap();
        assert_eq!(q.len(), 1);
        assert!(id == 0);
    }

    #[test]
    fn rejects_too_late() {
        let mut q = queue();
        // lead below tx_start_delay + margin + dispatch_lead
        let err = q.enqueue_downlink(NOW, NOW + 10_000, 50_000, packet()).unwrap_err();
        assert_eq!(err, JitRejection::TooLate);

        let err = q.enqueue_downlink(NOW, NOW.wrapping_sub(5_000), 50_000, packet()).unwrap_err();
        assert_eq!(err, JitRejection::TooLate);
    }

    #[test]
    fn rejects_too_early() {
        let mut q = queue();
        let err = q
            .enqueue_downlink(NOW, NOW + 200_000_000, 50_000, packet())
            .unwrap_err();
        assert_eq!(err, JitRejection::TooEarly);
    }

    #[test]
    fn rejects_overlapping_packet() {
        let mut q = queue();
        let t = NOW + 2_000_000;
        q.enqueue_downlink(NOW, t, 50_000, packet()).unwrap();

        // starts inside the first slot's on-air interval
        let err = q.enqueue_downlink(NOW, t + 20_000, 50_000, packet()).unwrap_err();
        assert_eq!(err, JitRejection::CollisionWithPacket);

        // clear of the first interval and its margins
        q.enqueue_downlink(NOW, t + 60_000, 50_000, packet()).unwrap();
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn margin_counts_as_occupied() {
        let mut q = queue();
        let t = NOW + 2_000_000;
        q.enqueue_downlink(NOW, t, 50_000, packet()).unwrap();

        // 500 us past the end of the slot, inside the 1000 us margin
        let err = q.enqueue_downlink(NOW, t + 50_500, 50_000, packet()).unwrap_err();
        assert_eq!(err, JitRejection::CollisionWithPacket);
    }

    #[test]
    fn rejects_collision_with_beacon_guard() {
        let mut q = queue();
        let beacon_tick = NOW + 30_000_000;
        q.reserve_beacon(NOW, beacon_tick, packet()).unwrap();

        // inside the 3 s guard window ahead of the beacon
        let err = q
            .enqueue_downlink(NOW, beacon_tick - 1_000_000, 50_000, packet())
            .unwrap_err();
        assert_eq!(err, JitRejection::CollisionWithBeacon);

        // inside the reserved window itself
        let err = q
            .enqueue_downlink(NOW, beacon_tick + 1_000_000, 50_000, packet())
            .unwrap_err();
        assert_eq!(err, JitRejection::CollisionWithBeacon);

        // well before the guard
        q.enqueue_downlink(NOW, beacon_tick - 10_000_000, 50_000, packet()).unwrap();
    }

    #[test]
    fn beacon_reservation_is_replaced() {
        let mut q = queue();
        q.reserve_beacon(NOW, NOW + 30_000_000, packet()).unwrap();
        q.reserve_beacon(NOW, NOW + 60_000_000, packet()).unwrap();

        let beacons = q
            .slots
            .values()
            .filter(|e| e.slot.class == SlotClass::Beacon)
            .count();
        assert_eq!(beacons, 1);

        // the old reservation no longer blocks its window
        q.enqueue_downlink(NOW, NOW + 30_000_000, 50_000, packet()).unwrap();
    }

    #[test]
    fn rejects_when_full() {
        let mut q = JitQueue::new(JitConfig { capacity: 2, ..JitConfig::default() });
        q.enqueue_downlink(NOW, NOW + 1_000_000, 10_000, packet()).unwrap();
        q.enqueue_downlink(NOW, NOW + 2_000_000, 10_000, packet()).unwrap();
        let err = q.enqueue_downlink(NOW, NOW + 3_000_000, 10_000, packet()).unwrap_err();
        assert_eq!(err, JitRejection::QueueFull);
    }

    #[test]
    fn dispatch_order_is_by_tick_not_admission() {
        let mut q = queue();
        q.enqueue_downlink(NOW, NOW + 3_000_000, 10_000, packet()).unwrap();
        q.enqueue_downlink(NOW, NOW + 1_000_000, 10_000, packet()).unwrap();
        q.enqueue_downlink(NOW, NOW + 2_000_000, 10_000, packet()).unwrap();

        let mut ticks = Vec::new();
        let mut now = NOW;
        while !q.is_empty() {
            now += 10_000;
            if let Some(Dispatch::Fire(slot)) = q.pop_due(now) {
                ticks.push(slot.tick);
            }
        }
        assert_eq!(ticks, vec![NOW + 1_000_000, NOW + 2_000_000, NOW + 3_000_000]);
    }

    #[test]
    fn pop_due_respects_dispatch_lead() {
        let mut q = queue();
        let t = NOW + 1_000_000;
        q.enqueue_downlink(NOW, t, 10_000, packet()).unwrap();

        assert!(q.pop_due(NOW).is_none());
        assert!(q.pop_due(t - 100_000).is_none());
        match q.pop_due(t - 25_000) {
            Some(Dispatch::Fire(slot)) => assert_eq!(slot.tick, t),
            other => panic!("expected Fire, got {other:?}"),
        }
    }

    #[test]
    fn missed_window_is_reported_and_dropped() {
        let mut q = queue();
        let t = NOW + 1_000_000;
        q.enqueue_downlink(NOW, t, 10_000, packet()).unwrap();

        match q.pop_due(t - 1_000) {
            Some(Dispatch::Missed(slot)) => assert_eq!(slot.tick, t),
            other => panic!("expected Missed, got {other:?}"),
        }
        assert!(q.is_empty());
    }

    #[test]
    fn admission_after_dispatch_keeps_intervals_disjoint() {
        let mut q = queue();
        let first = NOW + 500_000;
        q.enqueue_downlink(NOW, first, 10_000, packet()).unwrap();
        q.enqueue_downlink(NOW, NOW + 5_000_000, 200_000, packet()).unwrap();

        // dispatch the first slot, then admit another one in its old window
        match q.pop_due(first - 20_000) {
            Some(Dispatch::Fire(_)) => {}
            other => panic!("expected Fire, got {other:?}"),
        }
        let now = first - 20_000;
        q.enqueue_downlink(now, now + 1_000_000, 10_000, packet()).unwrap();

        // remaining intervals stay pairwise disjoint
        let mut spans: Vec<(i64, i64)> = q.slots.values().map(|e| (e.start, e.end())).collect();
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlap: {spans:?}");
        }
    }

    #[test]
    fn asap_placement_slides_past_busy_intervals() {
        let mut q = queue();
        let lead = 1_500 + 1_000 + 30_000;

        // occupy the earliest schedulable window
        let busy = NOW + lead + 1_000;
        q.enqueue_downlink(NOW, busy, 100_000, packet()).unwrap();

        let (_, tick) = q.enqueue_asap(NOW, 20_000, packet()).unwrap();
        let gap = tick.wrapping_sub(busy) as i32;
        assert!(gap >= 100_000, "asap slot at {tick} still inside busy window");
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn asap_on_empty_queue_uses_min_lead() {
        let mut q = queue();
        let (_, tick) = q.enqueue_asap(NOW, 20_000, packet()).unwrap();
        let lead = tick.wrapping_sub(NOW);
        assert!(lead >= 32_500, "lead {lead} below minimum");
        assert!(lead < 200_000, "lead {lead} unexpectedly large");
    }

    #[test]
    fn scheduling_across_counter_wrap() {
        let mut q = queue();
        let now = u32::MAX - 500_000;
        let tick = now.wrapping_add(2_000_000); // past the wrap point

        q.enqueue_downlink(now, tick, 10_000, packet()).unwrap();

        // counter wrapped; the slot must still dispatch at the right time
        assert!(q.pop_due(100_000).is_none());
        match q.pop_due(tick.wrapping_sub(25_000)) {
            Some(Dispatch::Fire(slot)) => assert_eq!(slot.tick, tick),
            other => panic!("expected Fire, got {other:?}"),
        }
    }
}
