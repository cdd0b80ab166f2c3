//! Cycle-stepped transaction bridge.
//!
//! Lets ordinary threads issue reads and writes against a simulated
//! synchronous device. A [`Clock`] owns the device and advances it one
//! cycle at a time; edge observers attached to the clock turn queued
//! requests into per-cycle pin activity and turn observed pin activity back
//! into completed transactions.
//!
//! Two adapters are provided:
//!
//! - [`AxiMaster`] drives a framed, burst-capable bus with independent
//!   valid/ready channels and many tagged transactions in flight.
//!   [`AxiSlave`] is its device-facing mirror.
//! - [`SpiMaster`] is an explicit state machine for a one-bit serial bus.
//!   Clients talk to it through the queues of an [`SpiBridge`] from any
//!   thread while one stepping thread owns the clock.

/// Clock edges, the device seam and observer registration.
pub mod clock;
pub use clock::{Attached, Clock, Device, EdgeObserver};

/// Adapter configuration and protocol constants.
pub mod config;
pub use config::{AxiConfig, SpiConfig, LINE_BYTES, MAX_BURST_BEATS, PAGE_BYTES};

/// Caller-facing error type.
pub mod error;
pub use error::BridgeError;

/// Named signals.
pub mod signal;
pub use signal::Wire;

/// Framed-bus adapter.
pub mod axi;
pub use axi::{AxiMaster, AxiMasterDevice, AxiPort, AxiSlave, AxiSlaveDevice, Completion, Resp};

/// Serial adapter.
pub mod spi;
pub use spi::{SpiBridge, SpiCommand, SpiDevice, SpiMaster, SpiPort, SpiReply, SpiResult};

/// Behavioral reference devices.
pub mod models;
pub use models::{AxiMemory, ReadyPattern, SpiRegisterFile};

#[cfg(test)]
use proptest as _;
