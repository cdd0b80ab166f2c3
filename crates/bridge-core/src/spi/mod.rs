//! Fully serial, single-transaction adapter.

pub mod command;
pub mod fsm;
pub mod port;
pub mod queue;

pub use command::{SpiCommand, SpiResult, BEAT_BYTES, MAX_PACKED_BEATS};
pub use fsm::SpiMaster;
pub use port::{SpiDevice, SpiPort};
pub use queue::{SpiBridge, SpiReply};
