//! radio-side components: concentrator access, transmit scheduling, time sync

use thiserror::Error;

pub mod concentrator;
pub mod gate;
pub mod jit;
pub mod simulated;
pub mod timesync;

pub use concentrator::{Concentrator, NB_PKT_MAX};
pub use gate::ConcentratorGate;
pub use jit::{Dispatch, JitConfig, JitQueue, JitRejection, ScheduledSlot, SlotClass, SlotId};
pub use simulated::{SimHandle, SimulatedConcentrator};
pub use timesync::TimeSync;

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("concentrator hardware fault: {0}")]
    Hardware(String),

    #[error("concentrator not started")]
    NotStarted,

    #[error("payload too large for the transmit buffer")]
    PayloadTooLarge,

    #[error("no clock mapping established yet")]
    ClockUnresolved,
}
