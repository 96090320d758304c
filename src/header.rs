//! The fixed-size header prefixed to every frame on a mailbox.

use bitflags::bitflags;
use commrat_wire::{CommratWire, CommratWireSized};

/// Every frame that traverses a mailbox starts with this header, followed by
/// the packed payload.
///
/// `timestamp_ns` is the single source of truth for time semantics: payloads
/// never carry their own timestamps. The framework fills `msg_type` from the
/// registry, `msg_size` from the packed payload length, `timestamp_ns` per
/// the loop executor rules, and `seq_number` from the sending mailbox's
/// counter.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, CommratWire)]
pub struct Header {
    /// Registry message id of the payload.
    pub msg_type: u32,
    /// Packed payload length in bytes, excluding this header.
    pub msg_size: u32,
    /// Nanosecond timestamp; generation time or propagated input time.
    pub timestamp_ns: u64,
    /// Per-sending-mailbox sequence number.
    pub seq_number: u32,
    /// Frame flags, see [`HeaderFlags`].
    pub flags: u32,
}

/// Packed header length in bytes.
pub const HEADER_LEN: usize = Header::PACKED_LEN;

bitflags! {
    /// Frame flag bits.
    ///
    /// The in-process transport is single byte order, so `BIG_ENDIAN` is
    /// never set by this implementation; a receiver treats a frame carrying
    /// it as malformed. A cross-host transport would hook its byte-order
    /// fix-up pass on this bit.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HeaderFlags: u32 {
        /// Payload was packed big endian.
        const BIG_ENDIAN = 1 << 0;
    }
}

impl Header {
    /// Build a header for a frame of `msg_type` carrying `msg_size` payload
    /// bytes stamped with `timestamp_ns`.
    pub fn new(msg_type: u32, msg_size: u32, timestamp_ns: u64, seq_number: u32) -> Self {
        Self {
            msg_type,
            msg_size,
            timestamp_ns,
            seq_number,
            flags: HeaderFlags::empty().bits(),
        }
    }

    /// Decoded view of the flags field; unknown bits are dropped.
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commrat_wire::{CommratWireRead, CommratWireWriteSized};
    use pretty_assertions::assert_eq;

    #[test]
    fn header_is_24_bytes() {
        assert_eq!(HEADER_LEN, 24);
    }

    #[test]
    fn header_round_trip() {
        let header = Header::new(0x2100_0004, 16, 1_234_567_890, 42);

        let packed = header.pack();

        assert_eq!(Header::unpack_from_slice(&packed).unwrap(), header);
    }

    #[test]
    fn header_layout() {
        let header = Header::new(0x01, 0x02, 0x03, 0x04);

        let packed = header.pack();

        assert_eq!(packed[0..4], [0x01, 0, 0, 0]);
        assert_eq!(packed[4..8], [0x02, 0, 0, 0]);
        assert_eq!(packed[8..16], [0x03, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(packed[16..20], [0x04, 0, 0, 0]);
        assert_eq!(packed[20..24], [0, 0, 0, 0]);
    }
}
