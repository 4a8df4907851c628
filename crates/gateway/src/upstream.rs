//! Upstream forwarder: drains received frames from the concentrator and
//! reports them to the server as PUSH_DATA datagrams.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use lora_fwd_core::{CrcStatus, Metric, ReceivedFrame, Stats};
use lora_fwd_proto::{wire, Datagram, PushPayload, Rxpk};
use lora_fwd_radio::{ConcentratorGate, NB_PKT_MAX};

use crate::report::ReportSlot;
use crate::shutdown::ShutdownSignal;
use crate::GatewayConfig;

/// How many acknowledged tokens are kept around to recognize duplicates.
const ACKED_TOKEN_HISTORY: usize = 16;

pub struct UpstreamForwarder {
    cfg: Arc<GatewayConfig>,
    socket: UdpSocket,
    gate: Arc<ConcentratorGate>,
    stats: Arc<Stats>,
    report: Arc<ReportSlot>,
    shutdown: ShutdownSignal,
    acked_tokens: VecDeque<u16>,
}

impl UpstreamForwarder {
    pub fn new(
        cfg: Arc<GatewayConfig>,
        socket: UdpSocket,
        gate: Arc<ConcentratorGate>,
        stats: Arc<Stats>,
        report: Arc<ReportSlot>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            cfg,
            socket,
            gate,
            stats,
            report,
            shutdown,
            acked_tokens: VecDeque::with_capacity(ACKED_TOKEN_HISTORY),
        }
    }

    pub async fn run(mut self) {
        info!("[up  ] start");
        while self.shutdown.is_running() {
            self.poll_once().await;
        }
        info!("[up  ] exit");
    }

    /// One poll/forward cycle. Returns true when a datagram was sent.
    pub async fn poll_once(&mut self) -> bool {
        // hold the gate only for the fetch itself
        let frames = match self.gate.receive(NB_PKT_MAX).await {
            Ok(frames) => frames,
            Err(e) => {
                error!("[up  ] failed packet fetch: {e}");
                tokio::time::sleep(Duration::from_millis(self.cfg.fetch_sleep_ms)).await;
                return false;
            }
        };

        if frames.is_empty() && !self.report.is_pending() {
            tokio::time::sleep(Duration::from_millis(self.cfg.fetch_sleep_ms)).await;
            return false;
        }

        let accepted = self.classify(&frames);
        let stat = self.report.take();
        if accepted.is_empty() && stat.is_none() {
            return false;
        }

        let payload = PushPayload {
            rxpk: accepted.iter().map(|f| Rxpk::from_frame(f, None)).collect(),
            stat,
        };
        let json = match serde_json::to_vec(&payload) {
            Ok(json) => json,
            Err(e) => {
                error!("[up  ] failed to serialize PUSH_DATA payload: {e}");
                return false;
            }
        };

        self.stats.add(Metric::RxForwarded, accepted.len() as u64);
        self.stats.add(
            Metric::UpPayloadBytes,
            accepted.iter().map(|f| f.payload.len() as u64).sum(),
        );

        let token: u16 = rand::rng().random();
        let dgram = wire::push_data(token, self.cfg.gateway_id, &json);

        match timeout(Duration::from_millis(50), self.socket.send(&dgram)).await {
            Ok(Ok(_)) => {
                self.stats.increment(Metric::UpDgramSent);
                self.stats.add(Metric::UpNetworkBytes, dgram.len() as u64);
            }
            Ok(Err(e)) => {
                error!("[up  ] failed to send PUSH_DATA: {e}");
                return false;
            }
            Err(_) => {
                warn!("[up  ] PUSH_DATA send timed out");
                return false;
            }
        }
        debug!(
            "[up  ] PUSH_DATA sent, token 0x{token:04X}, {} packet(s)",
            payload.rxpk.len()
        );

        if !self.await_ack(token).await {
            // never retransmitted; the next cycle carries fresh data
            debug!("[up  ] PUSH_ACK 0x{token:04X} not received in time");
        }
        true
    }

    /// Apply the CRC filter policy; dropped frames are only counted.
    fn classify(&self, frames: &[ReceivedFrame]) -> Vec<ReceivedFrame> {
        self.stats.add(Metric::RxReceived, frames.len() as u64);

        let mut accepted = Vec::with_capacity(frames.len());
        for frame in frames {
            let forward = match frame.crc {
                CrcStatus::Ok => {
                    self.stats.increment(Metric::RxOk);
                    self.cfg.forward_crc_valid
                }
                CrcStatus::Fail => {
                    self.stats.increment(Metric::RxBad);
                    self.cfg.forward_crc_error
                }
                CrcStatus::Absent => {
                    self.stats.increment(Metric::RxNoCrc);
                    self.cfg.forward_crc_disabled
                }
            };
            if !forward {
                continue;
            }
            match frame.mote_header() {
                Some(hdr) => debug!(
                    "[up  ] packet from mote 0x{:08X} (fcnt {})",
                    hdr.addr, hdr.fcnt
                ),
                None => debug!("[up  ] packet too short for an FHDR, forwarding as-is"),
            }
            accepted.push(frame.clone());
        }
        accepted
    }

    /// Wait for the PUSH_ACK echoing `token`. Acks for older, already
    /// acknowledged tokens are counted as duplicates and skipped.
    async fn await_ack(&mut self, token: u16) -> bool {
        let deadline = Instant::now() + Duration::from_millis(self.cfg.push_timeout_ms);
        let mut buf = [0u8; 1024];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let n = match timeout(remaining, self.socket.recv(&mut buf)).await {
                Err(_) => return false,
                Ok(Err(e)) => {
                    warn!("[up  ] socket receive error: {e}");
                    return false;
                }
                Ok(Ok(n)) => n,
            };
            match wire::parse(&buf[..n]) {
                Ok(Datagram::PushAck { token: t }) if t == token => {
                    self.stats.increment(Metric::UpAckReceived);
                    self.remember_acked(token);
                    return true;
                }
                Ok(Datagram::PushAck { token: t }) => {
                    if self.acked_tokens.contains(&t) {
                        self.stats.increment(Metric::UpDupAckReceived);
                        trace!("[up  ] duplicate PUSH_ACK 0x{t:04X}");
                    } else {
                        trace!("[up  ] stale PUSH_ACK 0x{t:04X} ignored");
                    }
                }
                Ok(other) => trace!("[up  ] ignoring unexpected datagram {other:?}"),
                Err(e) => warn!("[up  ] undecodable datagram on up socket: {e}"),
            }
        }
    }

    fn remember_acked(&mut self, token: u16) {
        if self.acked_tokens.len() == ACKED_TOKEN_HISTORY {
            self.acked_tokens.pop_front();
        }
        self.acked_tokens.push_back(token);
    }
}
