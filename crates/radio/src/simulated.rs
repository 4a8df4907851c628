//! Simulated concentrator for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use rand_distr::{Distribution, Normal};

use lora_fwd_core::{CodeRate, CrcStatus, DataRate, ReceivedFrame, TxPacket, TxTrigger};

use crate::{Concentrator, RadioError};

#[derive(Debug, Default)]
struct SimState {
    started: bool,
    rx_queue: VecDeque<ReceivedFrame>,
    transmitted: Vec<(TxPacket, TxTrigger)>,
    fail_next_transmit: bool,
    fail_next_receive: bool,
}

/// In-memory concentrator: frames are injected through a [`SimHandle`] and
/// transmissions are recorded for inspection. The tick counter runs off a
/// real `Instant`, wrapping like the hardware counter does.
pub struct SimulatedConcentrator {
    state: Arc<Mutex<SimState>>,
    origin: Instant,
}

impl SimulatedConcentrator {
    pub fn new() -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState::default()));
        let origin = Instant::now();
        let handle = SimHandle { state: state.clone(), origin };
        (Self { state, origin }, handle)
    }

    fn now_us(&self) -> u32 {
        self.origin.elapsed().as_micros() as u32
    }
}

#[async_trait]
impl Concentrator for SimulatedConcentrator {
    async fn connect(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    async fn start(&mut self) -> Result<(), RadioError> {
        self.state.lock().unwrap().started = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RadioError> {
        self.state.lock().unwrap().started = false;
        Ok(())
    }

    async fn receive(&mut self, max: usize) -> Result<Vec<ReceivedFrame>, RadioError> {
        let mut state = self.state.lock().unwrap();
        if !state.started {
            return Err(RadioError::NotStarted);
        }
        if state.fail_next_receive {
            state.fail_next_receive = false;
            return Err(RadioError::Hardware("simulated receive fault".into()));
        }
        let n = state.rx_queue.len().min(max);
        Ok(state.rx_queue.drain(..n).collect())
    }

    async fn transmit(&mut self, packet: &TxPacket, trigger: TxTrigger) -> Result<(), RadioError> {
        let mut state = self.state.lock().unwrap();
        if !state.started {
            return Err(RadioError::NotStarted);
        }
        if state.fail_next_transmit {
            state.fail_next_transmit = false;
            return Err(RadioError::Hardware("simulated transmit fault".into()));
        }
        state.transmitted.push((packet.clone(), trigger));
        Ok(())
    }

    async fn counter_us(&mut self) -> Result<u32, RadioError> {
        Ok(self.now_us())
    }
}

/// Test-side handle to a [`SimulatedConcentrator`].
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
    origin: Instant,
}

impl SimHandle {
    /// Queue a raw frame for the next `receive` call.
    pub fn inject_frame(&self, frame: ReceivedFrame) {
        self.state.lock().unwrap().rx_queue.push_back(frame);
    }

    /// Queue an SF7BW125 uplink with plausible noisy signal metrics.
    pub fn inject_uplink(&self, payload: Vec<u8>, crc: CrcStatus) {
        let mut rng = rand::rng();
        let rssi = Normal::new(-60.0f32, 5.0).unwrap().sample(&mut rng);
        let snr = Normal::new(8.0f32, 2.0).unwrap().sample(&mut rng);
        self.inject_frame(ReceivedFrame {
            freq_hz: 868_100_000,
            if_chain: 0,
            rf_chain: 0,
            count_us: self.counter_now(),
            crc,
            datarate: DataRate::Lora { sf: 7, bw: lora_fwd_core::Bandwidth::Khz125 },
            coderate: Some(CodeRate::Cr4_5),
            rssi,
            snr,
            payload,
        });
    }

    pub fn transmitted(&self) -> Vec<(TxPacket, TxTrigger)> {
        self.state.lock().unwrap().transmitted.clone()
    }

    pub fn fail_next_transmit(&self) {
        self.state.lock().unwrap().fail_next_transmit = true;
    }

    pub fn fail_next_receive(&self) {
        self.state.lock().unwrap().fail_next_receive = true;
    }

    pub fn counter_now(&self) -> u32 {
        self.origin.elapsed().as_micros() as u32
    }
}
