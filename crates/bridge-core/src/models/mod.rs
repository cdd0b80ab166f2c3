//! Behavioral reference devices used by the binary, the examples and tests.

pub mod axi_memory;
pub mod spi_regfile;

pub use axi_memory::{AxiMemory, ReadyPattern};
pub use spi_regfile::{PackedWriteRecord, SpiRegisterFile, REGISTER_COUNT};
