//! Downstream receiver: sustains the PULL keep-alive cycle, decodes
//! transmit requests and feeds the JIT queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use lora_fwd_core::{time_on_air_us, EmissionPolicy, Metric, Stats};
use lora_fwd_proto::{decode_downlink, wire, Datagram, TxAckError, TxAckPayload};
use lora_fwd_radio::{JitQueue, JitRejection, TimeSync};

use crate::shutdown::{ShutdownController, ShutdownSignal, StopKind};
use crate::GatewayConfig;

pub struct DownstreamReceiver {
    cfg: Arc<GatewayConfig>,
    socket: UdpSocket,
    jit: Arc<Mutex<JitQueue>>,
    timesync: Arc<TimeSync>,
    stats: Arc<Stats>,
    shutdown: ShutdownSignal,
    controller: ShutdownController,
    last_pull_token: Option<u16>,
    unacked_keepalives: u32,
}

impl DownstreamReceiver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<GatewayConfig>,
        socket: UdpSocket,
        jit: Arc<Mutex<JitQueue>>,
        timesync: Arc<TimeSync>,
        stats: Arc<Stats>,
        shutdown: ShutdownSignal,
        controller: ShutdownController,
    ) -> Self {
        Self {
            cfg,
            socket,
            jit,
            timesync,
            stats,
            shutdown,
            controller,
            last_pull_token: None,
            unacked_keepalives: 0,
        }
    }

    pub async fn run(mut self) {
        info!("[down] start");
        let mut keepalive = tokio::time::interval(Duration::from_secs(
            self.cfg.keepalive_interval_s.max(1),
        ));
        let mut sig = self.shutdown.clone();
        let mut buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                biased;
                _ = sig.wait() => break,
                _ = keepalive.tick() => self.keepalive_cycle().await,
                r = self.socket.recv(&mut buf) => match r {
                    Ok(n) => {
                        if let Some(ack) = self.handle_datagram(&buf[..n]) {
                            match timeout(Duration::from_millis(50), self.socket.send(&ack)).await {
                                Ok(Ok(_)) => {}
                                Ok(Err(e)) => warn!("[down] failed to send TX_ACK: {e}"),
                                Err(_) => warn!("[down] TX_ACK send timed out"),
                            }
                        }
                    }
                    Err(e) => warn!("[down] socket receive error: {e}"),
                },
            }
        }
        info!("[down] exit");
    }

    async fn keepalive_cycle(&mut self) {
        let token: u16 = rand::rng().random();
        let dgram = wire::pull_data(token, self.cfg.gateway_id);

        match timeout(Duration::from_millis(50), self.socket.send(&dgram)).await {
            Ok(Ok(_)) => {
                self.stats.increment(Metric::PullSent);
                self.last_pull_token = Some(token);
                trace!("[down] PULL_DATA sent, token 0x{token:04X}");
            }
            Ok(Err(e)) => warn!("[down] failed to send PULL_DATA: {e}"),
            Err(_) => warn!("[down] PULL_DATA send timed out"),
        }

        self.unacked_keepalives += 1;
        let threshold = self.cfg.autoquit_threshold;
        if threshold > 0 && self.unacked_keepalives >= threshold {
            error!(
                "[down] no PULL_ACK for {} keepalive(s), exiting",
                self.unacked_keepalives
            );
            self.controller.request(StopKind::Clean);
        }
    }

    /// Decode one inbound datagram. Returns the TX_ACK to send back, if any.
    fn handle_datagram(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        match wire::parse(data) {
            Ok(Datagram::PullAck { token }) => {
                self.stats.increment(Metric::PullAckReceived);
                self.unacked_keepalives = 0;
                if self.last_pull_token != Some(token) {
                    debug!("[down] PULL_ACK with mismatched token 0x{token:04X}");
                }
                None
            }
            Ok(Datagram::PullResp { token, json }) => {
                self.stats.increment(Metric::DownDgramReceived);
                self.stats.add(Metric::DownNetworkBytes, data.len() as u64);
                let error = self.handle_downlink(json)?;
                let body = match serde_json::to_vec(&TxAckPayload::new(error)) {
                    Ok(body) => body,
                    Err(e) => {
                        error!("[down] failed to serialize TX_ACK: {e}");
                        return None;
                    }
                };
                Some(wire::tx_ack(token, self.cfg.gateway_id, &body))
            }
            Ok(other) => {
                trace!("[down] ignoring unexpected datagram {other:?}");
                None
            }
            Err(e) => {
                warn!("[down] undecodable datagram on down socket: {e}");
                None
            }
        }
    }

    /// Admit one transmit request, translating the outcome into the
    /// server-visible acknowledgment reason. An undecodable payload is
    /// logged and left unacknowledged.
    fn handle_downlink(&mut self, json: &[u8]) -> Option<TxAckError> {
        let mut req = match decode_downlink(json) {
            Ok(req) => req,
            Err(e) => {
                warn!("[down] invalid PULL_RESP payload: {e}");
                return None;
            }
        };
        self.stats.increment(Metric::TxRequested);

        let pkt = &mut req.packet;
        if pkt.freq_hz < self.cfg.tx_freq_min_hz || pkt.freq_hz > self.cfg.tx_freq_max_hz {
            warn!("[down] downlink frequency {} Hz out of band", pkt.freq_hz);
            return Some(TxAckError::TxFreq);
        }
        if pkt.power_dbm > self.cfg.tx_power_max_dbm {
            // clamp rather than reject so the downlink still goes out
            warn!(
                "[down] requested power {} dBm not supported, using {}",
                pkt.power_dbm, self.cfg.tx_power_max_dbm
            );
            pkt.power_dbm = self.cfg.tx_power_max_dbm;
        }

        let now = match self.timesync.concentrator_now() {
            Ok(now) => now,
            Err(_) => {
                warn!("[down] no clock mapping yet, cannot schedule");
                return Some(TxAckError::GpsUnlocked);
            }
        };
        let duration_us = time_on_air_us(
            pkt.datarate,
            pkt.coderate,
            pkt.preamble,
            pkt.payload.len(),
            pkt.no_crc,
        );

        let outcome = match req.emission {
            EmissionPolicy::Immediate => {
                let mut jit = self.jit.lock().unwrap();
                jit.enqueue_asap(now, duration_us, req.packet).map(|(id, tick)| {
                    debug!("[down] immediate downlink queued as slot {id} at tick {tick}");
                    id
                })
            }
            EmissionPolicy::AtCount(tick) => {
                let mut jit = self.jit.lock().unwrap();
                jit.enqueue_downlink(now, tick, duration_us, req.packet)
            }
            EmissionPolicy::AtGpsMillis(ms) => match self.timesync.gps_ms_to_count(ms) {
                Ok(tick) => {
                    let mut jit = self.jit.lock().unwrap();
                    jit.enqueue_downlink(now, tick, duration_us, req.packet)
                }
                Err(_) => {
                    warn!("[down] GPS-timed downlink but no GPS time reference");
                    return Some(TxAckError::GpsUnlocked);
                }
            },
        };

        Some(match outcome {
            Ok(id) => {
                debug!("[down] downlink admitted as slot {id}");
                TxAckError::None
            }
            Err(rejection) => {
                let (metric, error) = map_rejection(rejection);
                self.stats.increment(metric);
                debug!("[down] downlink rejected: {rejection}");
                error
            }
        })
    }
}

/// Rejection -> (statistic, wire error). The wire protocol has no dedicated
/// queue-full code, so a full queue reports as a packet collision.
fn map_rejection(rejection: JitRejection) -> (Metric, TxAckError) {
    match rejection {
        JitRejection::TooLate => (Metric::RejectedTooLate, TxAckError::TooLate),
        JitRejection::TooEarly => (Metric::RejectedTooEarly, TxAckError::TooEarly),
        JitRejection::CollisionWithPacket => {
            (Metric::RejectedCollisionPacket, TxAckError::CollisionPacket)
        }
        JitRejection::CollisionWithBeacon => {
            (Metric::RejectedCollisionBeacon, TxAckError::CollisionBeacon)
        }
        JitRejection::QueueFull => (Metric::RejectedQueueFull, TxAckError::CollisionPacket),
    }
}
