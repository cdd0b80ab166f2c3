//! Serial command descriptors, results and the framing they shift out.

use crate::BridgeError;

/// Register addresses occupy the low six bits of a command byte.
pub const REG_MASK: u8 = 0x3F;

/// Command-byte flag selecting a register write.
pub const OP_WRITE: u8 = 0x80;

/// Command byte opening a bulk read.
pub const OP_BULK_READ: u8 = 0x40;

/// Packed-write stage: 32-bit target address.
pub const OP_PACKED_ADDR: u8 = 0xC0;
/// Packed-write stage: 16-bit beat count.
pub const OP_PACKED_BEATS: u8 = 0xC1;
/// Packed-write stage: 32-bit payload length in bytes.
pub const OP_PACKED_LEN: u8 = 0xC2;
/// Packed-write stage: payload data stream.
pub const OP_PACKED_DATA: u8 = 0xC3;
/// Packed-write stage: issue the staged write.
pub const OP_PACKED_ISSUE: u8 = 0xC4;

/// Bytes per packed-write beat.
pub const BEAT_BYTES: usize = 16;

/// Largest beat count a packed write can announce.
pub const MAX_PACKED_BEATS: usize = u16::MAX as usize;

/// One serial transaction as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SpiCommand {
    /// Write one register.
    WriteReg {
        /// Register address.
        addr: u8,
        /// Value to write.
        data: u8,
    },
    /// Read one register.
    ReadReg {
        /// Register address.
        addr: u8,
    },
    /// Read a register until it equals `expected`, at most `attempts` times.
    PollReg {
        /// Register address.
        addr: u8,
        /// Value that ends the poll successfully.
        expected: u8,
        /// Read attempts before giving up.
        attempts: u32,
    },
    /// Read `count` bytes of device memory starting at `addr`.
    BulkRead {
        /// Device memory address.
        addr: u32,
        /// Number of bytes to shift in.
        count: u16,
    },
    /// Stage and issue a beat-packed write of `payload` to `addr`.
    PackedWrite {
        /// Device memory address.
        addr: u32,
        /// Payload; a whole number of [`BEAT_BYTES`] beats.
        payload: Vec<u8>,
    },
    /// Write a 16-bit value to the register pair `addr`, `addr + 1`.
    WriteReg16 {
        /// Low register address.
        addr: u8,
        /// Value; low byte goes to `addr`.
        data: u16,
    },
    /// Read a 16-bit value from the register pair `addr`, `addr + 1`.
    ReadReg16 {
        /// Low register address.
        addr: u8,
    },
}

/// Result record pushed once per completed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SpiResult {
    /// False only when a polling read exhausted its attempts.
    pub ok: bool,
    /// Command-specific value: the byte or half-word read, the bulk byte
    /// count, or zero for writes.
    pub value: u32,
}

impl SpiResult {
    /// Successful result carrying `value`.
    #[must_use]
    pub const fn success(value: u32) -> Self {
        Self { ok: true, value }
    }

    /// Failed result carrying `value`.
    #[must_use]
    pub const fn failure(value: u32) -> Self {
        Self { ok: false, value }
    }
}

/// Command byte for a register read.
#[must_use]
pub const fn read_opcode(addr: u8) -> u8 {
    addr & REG_MASK
}

/// Command byte for a register write.
#[must_use]
pub const fn write_opcode(addr: u8) -> u8 {
    OP_WRITE | (addr & REG_MASK)
}

impl SpiCommand {
    /// Checks the command can be framed.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidBeatStream`] for a packed write whose
    /// payload is empty, not a whole number of beats, or too long to count.
    pub fn validate(&self) -> Result<(), BridgeError> {
        match self {
            Self::PackedWrite { payload, .. } => {
                let bytes = payload.len();
                if bytes == 0 || bytes % BEAT_BYTES != 0 || bytes / BEAT_BYTES > MAX_PACKED_BEATS {
                    Err(BridgeError::InvalidBeatStream { bytes })
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// True for the one command whose completion also delivers a payload.
    #[must_use]
    pub const fn returns_payload(&self) -> bool {
        matches!(self, Self::BulkRead { .. })
    }
}
