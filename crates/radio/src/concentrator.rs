//! The opaque radio-HAL capability consumed by the forwarder.

use async_trait::async_trait;

use lora_fwd_core::{ReceivedFrame, TxPacket, TxTrigger};

use crate::RadioError;

/// Max number of frames fetched from the concentrator per poll cycle.
pub const NB_PKT_MAX: usize = 8;

/// A LoRa/FSK concentrator board. Implementations are NOT thread-safe and
/// not reentrant; all calls must be serialized through the
/// [`ConcentratorGate`](crate::ConcentratorGate).
///
/// `receive` and `transmit` return promptly: `receive` drains whatever the
/// hardware FIFO holds (possibly nothing), `transmit` only loads the packet
/// and arms the trigger, it does not wait for the emission itself.
#[async_trait]
pub trait Concentrator: Send {
    /// Establish the link to the board (SPI/USB).
    async fn connect(&mut self) -> Result<(), RadioError>;

    /// Start the radio; frames can be received afterwards.
    async fn start(&mut self) -> Result<(), RadioError>;

    /// Stop the radio and release the board.
    async fn stop(&mut self) -> Result<(), RadioError>;

    /// Fetch up to `max` pending frames from the hardware FIFO.
    async fn receive(&mut self, max: usize) -> Result<Vec<ReceivedFrame>, RadioError>;

    /// Load one packet into the transmit buffer and arm the trigger.
    async fn transmit(&mut self, packet: &TxPacket, trigger: TxTrigger) -> Result<(), RadioError>;

    /// Read the free-running 1 MHz tick counter.
    async fn counter_us(&mut self) -> Result<u32, RadioError>;
}
