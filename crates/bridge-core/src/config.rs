//! Adapter configuration with documented defaults.

use std::time::Duration;

/// Bytes carried by one framed-bus data beat (128-bit line).
pub const LINE_BYTES: usize = 16;

/// Bursts never cross a boundary of this many bytes.
pub const PAGE_BYTES: u64 = 4096;

/// Largest burst length an address packet may describe.
pub const MAX_BURST_BEATS: usize = 256;

/// Default cap on the framed-bus size field (`2^4 = 16` bytes per beat).
pub const DEFAULT_MAX_SIZE_LOG2: u8 = 4;

/// Default number of setup invocations between chip-select and the first shift.
pub const DEFAULT_SETUP_HALF_CYCLES: u32 = 1;

/// Default number of clock toggles appended after the last byte of a frame.
pub const DEFAULT_TRAILING_TOGGLES: u32 = 2;

/// Default sleep between completion checks in polling waits.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Framed-bus (AXI) master configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AxiConfig {
    /// Upper bound on the encoded size field of address packets.
    pub max_size_log2: u8,
}

impl Default for AxiConfig {
    fn default() -> Self {
        Self {
            max_size_log2: DEFAULT_MAX_SIZE_LOG2,
        }
    }
}

/// Serial (SPI) adapter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SpiConfig {
    /// Wait invocations after chip-select is asserted.
    pub setup_half_cycles: u32,
    /// Clock toggles with `mosi` low before chip-select is released.
    pub trailing_toggles: u32,
    /// Sleep between queue checks in [`crate::SpiBridge::wait_result_polling`].
    pub poll_interval: Duration,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            setup_half_cycles: DEFAULT_SETUP_HALF_CYCLES,
            trailing_toggles: DEFAULT_TRAILING_TOGGLES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
