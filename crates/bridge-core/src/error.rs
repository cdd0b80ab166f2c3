use thiserror::Error;

/// Recoverable failures surfaced to bridge clients.
///
/// Protocol-level outcomes such as an exhausted polling read are not errors;
/// they arrive as an unsuccessful [`crate::SpiResult`]. Invariant violations
/// that mean the bridge and the modeled device have desynchronized panic
/// instead of returning one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum BridgeError {
    /// A framed-bus transaction with this tag is still outstanding.
    #[error("transaction tag {tag} is still outstanding")]
    TagBusy {
        /// Tag of the outstanding transaction.
        tag: u8,
    },
    /// A transfer was requested with zero bytes.
    #[error("transfer length must be at least one byte")]
    EmptyTransfer,
    /// The transfer's byte range does not fit in the 64-bit address space.
    #[error("transfer of {len} bytes at {addr:#x} overflows the address space")]
    AddressOverflow {
        /// First byte address.
        addr: u64,
        /// Requested length in bytes.
        len: usize,
    },
    /// A packed serial write payload is not a whole number of beats or holds
    /// more beats than the wire format can count.
    #[error("packed write payload of {bytes} bytes is not a valid beat stream")]
    InvalidBeatStream {
        /// Payload length in bytes.
        bytes: usize,
    },
    /// The device was still busy after the quiescence budget ran out.
    #[error("device still busy after {cycles} cycles")]
    QuiescenceTimeout {
        /// Number of cycles stepped before giving up.
        cycles: u64,
    },
}
