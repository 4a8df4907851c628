//! Mutual-exclusion wrapper around the single physical concentrator.

use tokio::sync::Mutex;

use lora_fwd_core::{ReceivedFrame, TxPacket, TxTrigger};

use crate::{Concentrator, RadioError};

/// Serializes every hardware call: at most one operation is in flight at any
/// time, and callers never observe interleaved hardware state.
///
/// The lock is held across exactly one HAL call, never across network I/O.
/// Errors are surfaced to the caller unchanged; retry policy belongs to the
/// caller, not the gate.
pub struct ConcentratorGate {
    inner: Mutex<Box<dyn Concentrator>>,
}

impl ConcentratorGate {
    pub fn new(concentrator: Box<dyn Concentrator>) -> Self {
        Self { inner: Mutex::new(concentrator) }
    }

    pub async fn connect(&self) -> Result<(), RadioError> {
        self.inner.lock().await.connect().await
    }

    pub async fn start(&self) -> Result<(), RadioError> {
        self.inner.lock().await.start().await
    }

    pub async fn stop(&self) -> Result<(), RadioError> {
        self.inner.lock().await.stop().await
    }

    pub async fn receive(&self, max: usize) -> Result<Vec<ReceivedFrame>, RadioError> {
        self.inner.lock().await.receive(max).await
    }

    pub async fn transmit(&self, packet: &TxPacket, trigger: TxTrigger) -> Result<(), RadioError> {
        self.inner.lock().await.transmit(packet, trigger).await
    }

    pub async fn counter_us(&self) -> Result<u32, RadioError> {
        self.inner.lock().await.counter_us().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::assert_ok;

    /// Panics if two hardware calls ever overlap.
    struct ReentrancyProbe {
        busy: Arc<AtomicBool>,
        calls: Arc<AtomicU32>,
    }

    impl ReentrancyProbe {
        async fn guard(&self) {
            assert!(
                !self.busy.swap(true, Ordering::SeqCst),
                "concurrent hardware access through the gate"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Concentrator for ReentrancyProbe {
        async fn connect(&mut self) -> Result<(), RadioError> {
            self.guard().await;
            Ok(())
        }
        async fn start(&mut self) -> Result<(), RadioError> {
            self.guard().await;
            Ok(())
        }
        async fn stop(&mut self) -> Result<(), RadioError> {
            self.guard().await;
            Ok(())
        }
        async fn receive(&mut self, _max: usize) -> Result<Vec<ReceivedFrame>, RadioError> {
            self.guard().await;
            Ok(Vec::new())
        }
        async fn transmit(
            &mut self,
            _packet: &TxPacket,
            _trigger: TxTrigger,
        ) -> Result<(), RadioError> {
            self.guard().await;
            Err(RadioError::Hardware("probe refuses to transmit".into()))
        }
        async fn counter_us(&mut self) -> Result<u32, RadioError> {
            self.guard().await;
            Ok(0)
        }
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() {
        let busy = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(ConcentratorGate::new(Box::new(ReentrancyProbe {
            busy: busy.clone(),
            calls: calls.clone(),
        })));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.receive(8).await.unwrap();
                gate.counter_us().await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn hardware_fault_released_to_caller() {
        let gate = ConcentratorGate::new(Box::new(ReentrancyProbe {
            busy: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicU32::new(0)),
        }));

        let pkt = TxPacket {
            freq_hz: 868_100_000,
            rf_chain: 0,
            power_dbm: 14,
            datarate: lora_fwd_core::DataRate::Lora {
                sf: 7,
                bw: lora_fwd_core::Bandwidth::Khz125,
            },
            coderate: Some(lora_fwd_core::CodeRate::Cr4_5),
            invert_polarity: true,
            preamble: None,
            no_crc: false,
            payload: vec![1, 2, 3],
        };
        let err = gate.transmit(&pkt, TxTrigger::Immediate).await.unwrap_err();
        assert!(matches!(err, RadioError::Hardware(_)));

        // the lock was released despite the failure
        tokio_test::assert_ok!(gate.counter_us().await);
    }
}
