//! Framed-bus channel packets and client-side burst planning.

use crate::config::{LINE_BYTES, PAGE_BYTES};
use crate::BridgeError;

/// Encoded burst type for incrementing bursts.
pub const BURST_INCR: u8 = 0b01;

/// Response code carried on the write-response and read-data channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum Resp {
    /// Normal access success.
    #[default]
    Okay = 0b00,
    /// Exclusive access success.
    ExOkay = 0b01,
    /// Target reported an error.
    SlvErr = 0b10,
    /// No target at the address.
    DecErr = 0b11,
}

impl Resp {
    /// Decodes the two-bit response field; upper bits are ignored.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Okay,
            0b01 => Self::ExOkay,
            0b10 => Self::SlvErr,
            _ => Self::DecErr,
        }
    }

    /// Encodes the response as its two-bit field value.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Returns true for `SLVERR` and `DECERR`.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::SlvErr | Self::DecErr)
    }
}

/// Address-phase packet for the write-address or read-address channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrPacket {
    /// Transaction tag.
    pub id: u8,
    /// Start address of the burst.
    pub addr: u64,
    /// Burst length minus one, in beats.
    pub len: u8,
    /// Log2 of the bytes per beat.
    pub size: u8,
    /// Burst type; always [`BURST_INCR`] for packets planned by this crate.
    pub burst: u8,
}

impl AddrPacket {
    /// Number of data beats the burst carries.
    #[must_use]
    pub const fn beats(&self) -> usize {
        self.len as usize + 1
    }

    /// Address of beat `beat` of an incrementing burst.
    ///
    /// The first beat uses the unaligned start address; later beats start on
    /// the size-aligned boundaries that follow it.
    #[must_use]
    pub const fn beat_address(&self, beat: usize) -> u64 {
        if beat == 0 {
            return self.addr;
        }
        let bytes = 1u64 << self.size;
        (self.addr & !(bytes - 1)) + beat as u64 * bytes
    }
}

/// Data-phase packet on the write-data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePacket {
    /// Full line of data; only strobed lanes are meaningful.
    pub data: u128,
    /// One bit per byte lane that carries payload.
    pub strb: u16,
    /// Marks the final beat of a burst.
    pub last: bool,
}

/// Packet on the write-response channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    /// Tag of the completed burst.
    pub id: u8,
    /// Outcome reported by the target.
    pub resp: Resp,
}

/// Packet on the read-data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPacket {
    /// Tag of the burst this beat belongs to.
    pub id: u8,
    /// Full line of data.
    pub data: u128,
    /// Outcome reported by the target for this beat.
    pub resp: Resp,
    /// Marks the final beat of a burst.
    pub last: bool,
}

/// One planned write burst: its address packet and matching data packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBurst {
    /// Address-phase packet.
    pub address: AddrPacket,
    /// Data-phase packets in beat order; the final one is flagged `last`.
    pub data: Vec<WritePacket>,
}

/// Number of lines spanned by `len` bytes starting at `addr`.
///
/// `len` must be non-zero and the range must not overflow.
#[must_use]
pub const fn burst_beats(addr: u64, len: usize) -> usize {
    let line = LINE_BYTES as u64;
    let last = addr + (len as u64 - 1);
    (last / line - addr / line + 1) as usize
}

/// Size field for a transfer of `len` bytes: `min(cap, ceil(log2(len)))`.
#[must_use]
pub const fn size_field(len: usize, cap: u8) -> u8 {
    let log2 = if len <= 1 {
        0
    } else {
        (usize::BITS - (len - 1).leading_zeros()) as u8
    };
    if log2 < cap {
        log2
    } else {
        cap
    }
}

/// Strobe bits for `count` consecutive lanes starting at `first`.
#[must_use]
pub const fn lane_mask(first: usize, count: usize) -> u16 {
    if count == 0 {
        return 0;
    }
    let ones = if count >= 16 {
        u16::MAX
    } else {
        (1u16 << count) - 1
    };
    ones << first
}

/// Splits `[addr, addr + len)` at page boundaries.
///
/// # Errors
///
/// Returns [`BridgeError::EmptyTransfer`] for `len == 0` and
/// [`BridgeError::AddressOverflow`] when the range leaves the address space.
pub fn page_segments(addr: u64, len: usize) -> Result<Vec<(u64, usize)>, BridgeError> {
    if len == 0 {
        return Err(BridgeError::EmptyTransfer);
    }
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| addr.checked_add(len - 1))
        .ok_or(BridgeError::AddressOverflow { addr, len })?;

    let mut segments = Vec::new();
    let mut cursor = addr;
    loop {
        let page_last = (cursor | (PAGE_BYTES - 1)).min(end);
        segments.push((cursor, (page_last - cursor + 1) as usize));
        if page_last == end {
            break;
        }
        cursor = page_last + 1;
    }
    Ok(segments)
}

fn address_packet(id: u8, addr: u64, len: usize, max_size_log2: u8) -> AddrPacket {
    let beats = burst_beats(addr, len);
    AddrPacket {
        id,
        addr,
        len: u8::try_from(beats - 1).unwrap_or(u8::MAX),
        size: size_field(len, max_size_log2),
        burst: BURST_INCR,
    }
}

/// Decomposes a write into page-bounded bursts of line-sized data packets.
///
/// # Errors
///
/// Propagates the range errors of [`page_segments`].
pub fn plan_write(
    id: u8,
    addr: u64,
    payload: &[u8],
    max_size_log2: u8,
) -> Result<Vec<WriteBurst>, BridgeError> {
    let mut consumed = 0;
    page_segments(addr, payload.len())?
        .into_iter()
        .map(|(start, len)| {
            let chunk = &payload[consumed..consumed + len];
            consumed += len;
            Ok(WriteBurst {
                address: address_packet(id, start, len, max_size_log2),
                data: line_packets(start, chunk),
            })
        })
        .collect()
}

/// Decomposes a read into page-bounded address packets.
///
/// # Errors
///
/// Propagates the range errors of [`page_segments`].
pub fn plan_read(
    id: u8,
    addr: u64,
    len: usize,
    max_size_log2: u8,
) -> Result<Vec<AddrPacket>, BridgeError> {
    Ok(page_segments(addr, len)?
        .into_iter()
        .map(|(start, len)| address_packet(id, start, len, max_size_log2))
        .collect())
}

fn line_packets(start: u64, chunk: &[u8]) -> Vec<WritePacket> {
    let line = LINE_BYTES as u64;
    let last = start + (chunk.len() as u64 - 1);
    let mut packets = Vec::with_capacity(burst_beats(start, chunk.len()));
    let mut cursor = start;
    let mut offset = 0;

    loop {
        let line_base = cursor - cursor % line;
        let stop = (line_base + (line - 1)).min(last);
        let first_lane = (cursor - line_base) as usize;
        let count = (stop - cursor + 1) as usize;

        let mut lanes = [0u8; LINE_BYTES];
        lanes[first_lane..first_lane + count].copy_from_slice(&chunk[offset..offset + count]);
        packets.push(WritePacket {
            data: u128::from_le_bytes(lanes),
            strb: lane_mask(first_lane, count),
            last: stop == last,
        });

        if stop == last {
            return packets;
        }
        cursor = stop + 1;
        offset += count;
    }
}
