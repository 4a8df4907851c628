//! Clock mappings between wall clock, monotonic time and concentrator ticks.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use log::debug;

use crate::{ConcentratorGate, RadioError};

/// Offset of the GPS epoch (1980-01-06T00:00:00Z) from the Unix epoch,
/// in seconds.
const GPS_EPOCH_UNIX_S: i64 = 315_964_800;
/// GPS time runs ahead of UTC by the accumulated leap seconds.
const GPS_LEAP_SECONDS: i64 = 18;

#[derive(Debug, Clone, Copy)]
struct ClockRefs {
    utc: DateTime<Utc>,
    mono: Instant,
    count_us: u32,
}

/// Linear mappings (wall clock ⇄ monotonic) and (monotonic ⇄ concentrator
/// tick), refreshed by a periodic background pass so a scheduling request
/// never has to wait for a sync.
///
/// All conversions return [`RadioError::ClockUnresolved`] until the first
/// refresh; callers must treat that as "cannot schedule yet".
#[derive(Debug, Default)]
pub struct TimeSync {
    refs: Mutex<Option<ClockRefs>>,
}

impl TimeSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the concentrator counter through the gate and pins a fresh
    /// reference triple. Called by the time-sync task, never by schedulers.
    pub async fn refresh(&self, gate: &ConcentratorGate) -> Result<(), RadioError> {
        let count_us = gate.counter_us().await?;
        let refs = ClockRefs { utc: Utc::now(), mono: Instant::now(), count_us };
        debug!("time sync: counter={} us at {}", count_us, refs.utc);
        *self.refs.lock().unwrap() = Some(refs);
        Ok(())
    }

    /// Pin a reference triple directly; used by tests.
    pub fn set_reference(&self, utc: DateTime<Utc>, mono: Instant, count_us: u32) {
        *self.refs.lock().unwrap() = Some(ClockRefs { utc, mono, count_us });
    }

    pub fn is_resolved(&self) -> bool {
        self.refs.lock().unwrap().is_some()
    }

    /// Current concentrator tick, extrapolated from the latest reference.
    pub fn concentrator_now(&self) -> Result<u32, RadioError> {
        self.instant_to_count(Instant::now())
    }

    pub fn instant_to_count(&self, t: Instant) -> Result<u32, RadioError> {
        let refs = self.resolved()?;
        let delta_us = t.duration_since(refs.mono).as_micros() as u32;
        Ok(refs.count_us.wrapping_add(delta_us))
    }

    pub fn utc_to_count(&self, t: DateTime<Utc>) -> Result<u32, RadioError> {
        let refs = self.resolved()?;
        let delta_us = (t - refs.utc)
            .num_microseconds()
            .ok_or(RadioError::ClockUnresolved)?;
        Ok(refs.count_us.wrapping_add(delta_us as u32))
    }

    /// Resolve a GPS timestamp (milliseconds since the GPS epoch) to a
    /// concentrator tick.
    pub fn gps_ms_to_count(&self, gps_ms: u64) -> Result<u32, RadioError> {
        let unix_ms = gps_ms as i64 + (GPS_EPOCH_UNIX_S - GPS_LEAP_SECONDS) * 1000;
        let utc = Utc
            .timestamp_millis_opt(unix_ms)
            .single()
            .ok_or(RadioError::ClockUnresolved)?;
        self.utc_to_count(utc)
    }

    fn resolved(&self) -> Result<ClockRefs, RadioError> {
        self.refs.lock().unwrap().ok_or(RadioError::ClockUnresolved)
    }
}
