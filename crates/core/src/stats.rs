//! Protocol and radio event counters shared by every forwarder task.
//!
//! Counters are grouped by direction so upstream and downstream tasks never
//! contend on the same lock. Each counter keeps an interval value, drained
//! by [`Stats::snapshot`] for the periodic status report, and a cumulative
//! total that is never reset.

use std::sync::Mutex;

/// Every countable event in the forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Frames read from the concentrator.
    RxReceived,
    /// Frames with payload CRC OK.
    RxOk,
    /// Frames with payload CRC error.
    RxBad,
    /// Frames with no payload CRC.
    RxNoCrc,
    /// Frames accepted by the filter and forwarded.
    RxForwarded,
    /// Uplink datagrams sent.
    UpDgramSent,
    /// PUSH_ACKs matched to a pending token.
    UpAckReceived,
    /// PUSH_ACKs for an already-acknowledged token.
    UpDupAckReceived,
    /// PULL_DATA keepalives sent.
    PullSent,
    /// PULL_ACKs received.
    PullAckReceived,
    /// PULL_RESP datagrams received.
    DownDgramReceived,
    /// Downlink requests decoded from the server.
    TxRequested,
    /// Packets handed to the concentrator successfully.
    TxOk,
    /// Packets that failed at or before the concentrator.
    TxFail,
    RejectedTooLate,
    RejectedTooEarly,
    RejectedCollisionPacket,
    RejectedCollisionBeacon,
    RejectedQueueFull,
    /// Radio payload bytes forwarded upstream.
    UpPayloadBytes,
    /// UDP bytes sent upstream.
    UpNetworkBytes,
    /// UDP bytes received downstream.
    DownNetworkBytes,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counter {
    interval: u64,
    total: u64,
}

impl Counter {
    fn add(&mut self, n: u64) {
        self.interval += n;
        self.total += n;
    }

    fn drain(&mut self) -> u64 {
        std::mem::take(&mut self.interval)
    }
}

#[derive(Debug, Default)]
struct UpstreamCounters {
    rx_rcv: Counter,
    rx_ok: Counter,
    rx_bad: Counter,
    rx_nocrc: Counter,
    rx_fwd: Counter,
    dgram_sent: Counter,
    ack_rcv: Counter,
    dup_ack_rcv: Counter,
    payload_bytes: Counter,
    network_bytes: Counter,
}

#[derive(Debug, Default)]
struct DownstreamCounters {
    pull_sent: Counter,
    pull_ack_rcv: Counter,
    dgram_rcv: Counter,
    network_bytes: Counter,
    tx_requested: Counter,
    tx_ok: Counter,
    tx_fail: Counter,
    rej_too_late: Counter,
    rej_too_early: Counter,
    rej_collision_packet: Counter,
    rej_collision_beacon: Counter,
    rej_queue_full: Counter,
}

/// Thread-safe aggregator, injected into each component.
#[derive(Debug, Default)]
pub struct Stats {
    up: Mutex<UpstreamCounters>,
    down: Mutex<DownstreamCounters>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, metric: Metric) {
        self.add(metric, 1);
    }

    pub fn add(&self, metric: Metric, n: u64) {
        use Metric::*;
        match metric {
            RxReceived => self.up.lock().unwrap().rx_rcv.add(n),
            RxOk => self.up.lock().unwrap().rx_ok.add(n),
            RxBad => self.up.lock().unwrap().rx_bad.add(n),
            RxNoCrc => self.up.lock().unwrap().rx_nocrc.add(n),
            RxForwarded => self.up.lock().unwrap().rx_fwd.add(n),
            UpDgramSent => self.up.lock().unwrap().dgram_sent.add(n),
            UpAckReceived => self.up.lock().unwrap().ack_rcv.add(n),
            UpDupAckReceived => self.up.lock().unwrap().dup_ack_rcv.add(n),
            UpPayloadBytes => self.up.lock().unwrap().payload_bytes.add(n),
            UpNetworkBytes => self.up.lock().unwrap().network_bytes.add(n),
            PullSent => self.down.lock().unwrap().pull_sent.add(n),
            PullAckReceived => self.down.lock().unwrap().pull_ack_rcv.add(n),
            DownDgramReceived => self.down.lock().unwrap().dgram_rcv.add(n),
            DownNetworkBytes => self.down.lock().unwrap().network_bytes.add(n),
            TxRequested => self.down.lock().unwrap().tx_requested.add(n),
            TxOk => self.down.lock().unwrap().tx_ok.add(n),
            TxFail => self.down.lock().unwrap().tx_fail.add(n),
            RejectedTooLate => self.down.lock().unwrap().rej_too_late.add(n),
            RejectedTooEarly => self.down.lock().unwrap().rej_too_early.add(n),
            RejectedCollisionPacket => self.down.lock().unwrap().rej_collision_packet.add(n),
            RejectedCollisionBeacon => self.down.lock().unwrap().rej_collision_beacon.add(n),
            RejectedQueueFull => self.down.lock().unwrap().rej_queue_full.add(n),
        }
    }

    pub fn total(&self, metric: Metric) -> u64 {
        use Metric::*;
        match metric {
            RxReceived => self.up.lock().unwrap().rx_rcv.total,
            RxOk => self.up.lock().unwrap().rx_ok.total,
            RxBad => self.up.lock().unwrap().rx_bad.total,
            RxNoCrc => self.up.lock().unwrap().rx_nocrc.total,
            RxForwarded => self.up.lock().unwrap().rx_fwd.total,
            UpDgramSent => self.up.lock().unwrap().dgram_sent.total,
            UpAckReceived => self.up.lock().unwrap().ack_rcv.total,
            UpDupAckReceived => self.up.lock().unwrap().dup_ack_rcv.total,
            UpPayloadBytes => self.up.lock().unwrap().payload_bytes.total,
            UpNetworkBytes => self.up.lock().unwrap().network_bytes.total,
            PullSent => self.down.lock().unwrap().pull_sent.total,
            PullAckReceived => self.down.lock().unwrap().pull_ack_rcv.total,
            DownDgramReceived => self.down.lock().unwrap().dgram_rcv.total,
            DownNetworkBytes => self.down.lock().unwrap().network_bytes.total,
            TxRequested => self.down.lock().unwrap().tx_requested.total,
            TxOk => self.down.lock().unwrap().tx_ok.total,
            TxFail => self.down.lock().unwrap().tx_fail.total,
            RejectedTooLate => self.down.lock().unwrap().rej_too_late.total,
            RejectedTooEarly => self.down.lock().unwrap().rej_too_early.total,
            RejectedCollisionPacket => self.down.lock().unwrap().rej_collision_packet.total,
            RejectedCollisionBeacon => self.down.lock().unwrap().rej_collision_beacon.total,
            RejectedQueueFull => self.down.lock().unwrap().rej_queue_full.total,
        }
    }

    /// Drains the interval counts used by the status report. Cumulative
    /// totals are left untouched.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut up = self.up.lock().unwrap();
        let rx_rcv = up.rx_rcv.drain();
        let rx_ok = up.rx_ok.drain();
        let rx_bad = up.rx_bad.drain();
        let rx_nocrc = up.rx_nocrc.drain();
        let rx_fwd = up.rx_fwd.drain();
        let dgram_sent = up.dgram_sent.drain();
        let ack_rcv = up.ack_rcv.drain();
        up.dup_ack_rcv.drain();
        up.payload_bytes.drain();
        up.network_bytes.drain();
        drop(up);

        let mut down = self.down.lock().unwrap();
        let dgram_rcv = down.dgram_rcv.drain();
        let tx_ok = down.tx_ok.drain();
        down.pull_sent.drain();
        down.pull_ack_rcv.drain();
        down.network_bytes.drain();
        down.tx_requested.drain();
        down.tx_fail.drain();
        drop(down);

        StatsSnapshot {
            rx_received: rx_rcv,
            rx_ok,
            rx_bad,
            rx_nocrc,
            rx_forwarded: rx_fwd,
            dgrams_sent: dgram_sent,
            acks_received: ack_rcv,
            downlink_dgrams_received: dgram_rcv,
            tx_ok,
        }
    }
}

/// Point-in-time view of one reporting interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rx_received: u64,
    pub rx_ok: u64,
    pub rx_bad: u64,
    pub rx_nocrc: u64,
    pub rx_forwarded: u64,
    pub dgrams_sent: u64,
    pub acks_received: u64,
    pub downlink_dgrams_received: u64,
    pub tx_ok: u64,
}

impl StatsSnapshot {
    /// Fraction of uplink datagrams acknowledged this interval, in percent.
    pub fn ack_ratio_pct(&self) -> f64 {
        if self.dgrams_sent == 0 {
            100.0
        } else {
            100.0 * self.acks_received as f64 / self.dgrams_sent as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_drains_interval_but_keeps_totals() {
        let stats = Stats::new();
        stats.add(Metric::RxReceived, 3);
        stats.increment(Metric::RxOk);
        stats.increment(Metric::TxOk);

        let snap = stats.snapshot();
        assert_eq!(snap.rx_received, 3);
        assert_eq!(snap.rx_ok, 1);
        assert_eq!(snap.tx_ok, 1);

        // second snapshot sees an empty interval
        let snap = stats.snapshot();
        assert_eq!(snap.rx_received, 0);
        assert_eq!(snap.tx_ok, 0);

        // cumulative totals survive
        assert_eq!(stats.total(Metric::RxReceived), 3);
        assert_eq!(stats.total(Metric::TxOk), 1);
    }

    #[test]
    fn rejection_counters_are_distinct() {
        let stats = Stats::new();
        stats.increment(Metric::RejectedTooLate);
        stats.increment(Metric::RejectedTooLate);
        stats.increment(Metric::RejectedCollisionBeacon);

        assert_eq!(stats.total(Metric::RejectedTooLate), 2);
        assert_eq!(stats.total(Metric::RejectedCollisionBeacon), 1);
        assert_eq!(stats.total(Metric::RejectedTooEarly), 0);
        assert_eq!(stats.total(Metric::RejectedCollisionPacket), 0);
    }

    #[test]
    fn ack_ratio_handles_empty_interval() {
        let snap = StatsSnapshot::default();
        assert_eq!(snap.ack_ratio_pct(), 100.0);

        let snap = StatsSnapshot { dgrams_sent: 4, acks_received: 3, ..Default::default() };
        assert_eq!(snap.ack_ratio_pct(), 75.0);
    }
}
