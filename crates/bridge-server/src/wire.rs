//! Binary records exchanged with socket clients.
//!
//! A request is a fixed 16-byte little-endian header, followed by
//! `count * 16` payload bytes for packed writes only:
//!
//! ```text
//! 0      1        4       8       12      16
//! | kind | reserved | addr  | data  | count |
//! ```
//!
//! Every request is answered with an 8-byte record (`ok`, three reserved
//! bytes, `value`), followed by `count` bytes for bulk reads only.

use bridge_core::spi::{BEAT_BYTES, MAX_PACKED_BEATS};
use bridge_core::{SpiCommand, SpiResult};
use thiserror::Error;

/// Size of a request header in bytes.
pub const HEADER_BYTES: usize = 16;

/// Size of a response record in bytes.
pub const RESPONSE_BYTES: usize = 8;

/// `value` sent back for requests that could not be executed.
pub const REJECTED_VALUE: u32 = 0xFFFF_FFFF;

/// Request kinds as encoded in the header's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    /// Clear every queue and abandon the in-flight command.
    Reset = 0,
    /// `addr` register, `data` low byte.
    WriteReg = 1,
    /// `addr` register.
    ReadReg = 2,
    /// `addr` register, `data` expected byte, `count` attempts.
    PollReg = 3,
    /// `addr` memory address, `count` bytes.
    BulkRead = 4,
    /// `addr` memory address, `count` beats of payload.
    PackedWrite = 5,
    /// `addr` low register, `data` low half-word.
    WriteReg16 = 6,
    /// `addr` low register.
    ReadReg16 = 7,
}

impl TryFrom<u8> for CommandKind {
    type Error = WireError;

    fn try_from(kind: u8) -> Result<Self, Self::Error> {
        Ok(match kind {
            0 => Self::Reset,
            1 => Self::WriteReg,
            2 => Self::ReadReg,
            3 => Self::PollReg,
            4 => Self::BulkRead,
            5 => Self::PackedWrite,
            6 => Self::WriteReg16,
            7 => Self::ReadReg16,
            _ => return Err(WireError::UnknownCommand { kind }),
        })
    }
}

/// Request decoding failures. All of them are answered, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// The header's kind byte names no command.
    #[error("unknown command kind {kind}")]
    UnknownCommand {
        /// Raw kind byte.
        kind: u8,
    },
    /// The header's count is zero where data is required, or does not fit
    /// the serial framing.
    #[error("count {count} out of range for {kind:?}")]
    CountOutOfRange {
        /// Decoded kind.
        kind: CommandKind,
        /// Raw count field.
        count: u32,
    },
}

/// Raw request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandHeader {
    /// Raw kind byte.
    pub kind: u8,
    /// Register or memory address.
    pub addr: u32,
    /// Command-specific data word.
    pub data: u32,
    /// Command-specific count.
    pub count: u32,
}

impl CommandHeader {
    /// Parses a header. Reserved bytes are ignored.
    #[must_use]
    pub const fn decode(bytes: &[u8; HEADER_BYTES]) -> Self {
        Self {
            kind: bytes[0],
            addr: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            data: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            count: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }

    /// Serializes the header with zeroed reserved bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut bytes = [0; HEADER_BYTES];
        bytes[0] = self.kind;
        bytes[4..8].copy_from_slice(&self.addr.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.data.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.count.to_le_bytes());
        bytes
    }

    /// Payload bytes that follow this header on the wire.
    ///
    /// Computed before any validation so a rejected request can still be
    /// skipped without losing framing.
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        if self.kind == CommandKind::PackedWrite as u8 {
            u64::from(self.count) * BEAT_BYTES as u64
        } else {
            0
        }
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Reset the session.
    Reset,
    /// Run a serial command.
    Command(SpiCommand),
}

/// Builds the request described by `header`, taking ownership of its payload.
///
/// Register addresses and data are truncated to the width of the field
/// they feed.
///
/// # Errors
///
/// Returns [`WireError`] for unknown kinds and out-of-range counts.
#[allow(clippy::cast_possible_truncation)]
pub fn decode_request(header: &CommandHeader, payload: Vec<u8>) -> Result<Request, WireError> {
    let kind = CommandKind::try_from(header.kind)?;
    let reg = header.addr as u8;
    let out_of_range = WireError::CountOutOfRange {
        kind,
        count: header.count,
    };

    let command = match kind {
        CommandKind::Reset => return Ok(Request::Reset),
        CommandKind::WriteReg => SpiCommand::WriteReg {
            addr: reg,
            data: header.data as u8,
        },
        CommandKind::ReadReg => SpiCommand::ReadReg { addr: reg },
        CommandKind::PollReg => SpiCommand::PollReg {
            addr: reg,
            expected: header.data as u8,
            attempts: header.count,
        },
        CommandKind::BulkRead => SpiCommand::BulkRead {
            addr: header.addr,
            count: u16::try_from(header.count).map_err(|_| out_of_range)?,
        },
        CommandKind::PackedWrite => {
            let beats = header.count as usize;
            if beats == 0 || beats > MAX_PACKED_BEATS || payload.len() != beats * BEAT_BYTES {
                return Err(out_of_range);
            }
            SpiCommand::PackedWrite {
                addr: header.addr,
                payload,
            }
        }
        CommandKind::WriteReg16 => SpiCommand::WriteReg16 {
            addr: reg,
            data: header.data as u16,
        },
        CommandKind::ReadReg16 => SpiCommand::ReadReg16 { addr: reg },
    };
    Ok(Request::Command(command))
}

/// Response record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Response {
    /// Success flag.
    pub ok: bool,
    /// Command-specific value.
    pub value: u32,
}

impl Response {
    /// Answer for a request that could not be executed.
    pub const REJECTED: Self = Self {
        ok: false,
        value: REJECTED_VALUE,
    };

    /// Serializes the record.
    #[must_use]
    pub fn encode(self) -> [u8; RESPONSE_BYTES] {
        let mut bytes = [0; RESPONSE_BYTES];
        bytes[0] = u8::from(self.ok);
        bytes[4..].copy_from_slice(&self.value.to_le_bytes());
        bytes
    }

    /// Parses a record; any non-zero `ok` byte means success.
    #[must_use]
    pub const fn decode(bytes: &[u8; RESPONSE_BYTES]) -> Self {
        Self {
            ok: bytes[0] != 0,
            value: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}

impl From<SpiResult> for Response {
    fn from(result: SpiResult) -> Self {
        Self {
            ok: result.ok,
            value: result.value,
        }
    }
}
