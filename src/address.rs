//! Mailbox address encoding.
//!
//! A mailbox address is a `u32` laid out as
//!
//! ```text
//! [ type_id_low:16 | system_id:4 | instance_id:4 | kind:8 ]
//! ```
//!
//! The upper 24 bits form the *base address* identifying one mailbox set:
//! the low 16 bits of the owning output's message id (or the primary input's
//! id for modules without outputs), plus the configured system and instance
//! ids. The low byte selects a mailbox within the set and is always zero in
//! a base address, so `base + kind` composes by plain addition.
//!
//! Field widths are deliberately narrow; `encode` fails rather than
//! truncating when a field exceeds its width.

use core::fmt;
use num_enum::TryFromPrimitive;

/// Number of bits available for the low part of the message type id.
pub const TYPE_ID_BITS: u32 = 16;

/// Number of bits available for the system id.
pub const SYSTEM_ID_BITS: u32 = 4;

/// Number of bits available for the instance id.
pub const INSTANCE_ID_BITS: u32 = 4;

/// Largest encodable system id.
pub const MAX_SYSTEM_ID: u8 = (1 << SYSTEM_ID_BITS) - 1;

/// Largest encodable instance id.
pub const MAX_INSTANCE_ID: u8 = (1 << INSTANCE_ID_BITS) - 1;

/// Largest DATA mailbox index; bounded by the low nibble of the kind byte.
pub const MAX_INPUT_INDEX: u8 = 15;

const KIND_CLASS_MASK: u8 = 0xf0;
const DATA_INDEX_MASK: u8 = 0x0f;

/// Raw kind byte class values. `DATA` is a base; the actual byte for input
/// `k` is `DATA + k`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum KindClass {
    Cmd = 0x00,
    Work = 0x10,
    Publish = 0x20,
    Data = 0x30,
}

/// Which mailbox of a set an address points at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MailboxKind {
    /// User command mailbox, `base + 0x00`.
    Cmd,
    /// Subscription protocol mailbox, `base + 0x10`.
    Work,
    /// Outgoing publication mailbox, `base + 0x20`.
    Publish,
    /// Input data mailbox `k`, `base + 0x30 + k`.
    Data(u8),
}

impl MailboxKind {
    /// The kind byte this kind occupies in an address.
    pub fn offset(self) -> Result<u8, AddressError> {
        match self {
            MailboxKind::Cmd => Ok(KindClass::Cmd as u8),
            MailboxKind::Work => Ok(KindClass::Work as u8),
            MailboxKind::Publish => Ok(KindClass::Publish as u8),
            MailboxKind::Data(index) => {
                if index > MAX_INPUT_INDEX {
                    return Err(AddressError::OutOfRange {
                        field: "input_index",
                        value: u32::from(index),
                        max: u32::from(MAX_INPUT_INDEX),
                    });
                }

                Ok(KindClass::Data as u8 + index)
            }
        }
    }

    /// Decode a kind byte back into a kind.
    pub fn from_offset(byte: u8) -> Result<Self, AddressError> {
        let class = KindClass::try_from(byte & KIND_CLASS_MASK)
            .map_err(|_| AddressError::InvalidKind(byte))?;

        let index = byte & DATA_INDEX_MASK;

        match class {
            KindClass::Data => Ok(MailboxKind::Data(index)),
            _ if index != 0 => Err(AddressError::InvalidKind(byte)),
            KindClass::Cmd => Ok(MailboxKind::Cmd),
            KindClass::Work => Ok(MailboxKind::Work),
            KindClass::Publish => Ok(MailboxKind::Publish),
        }
    }
}

impl fmt::Display for MailboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxKind::Cmd => f.write_str("CMD"),
            MailboxKind::Work => f.write_str("WORK"),
            MailboxKind::Publish => f.write_str("PUBLISH"),
            MailboxKind::Data(index) => write!(f, "DATA+{index}"),
        }
    }
}

/// An address field was out of range or a kind byte was unrecognised.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// A field exceeds the width the layout allows.
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u32,
        /// Largest permitted value.
        max: u32,
    },

    /// The low byte of an address is not a valid kind byte.
    InvalidKind(u8),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::OutOfRange { field, value, max } => {
                write!(f, "{field} value {value} exceeds maximum {max}")
            }
            AddressError::InvalidKind(byte) => write!(f, "invalid kind byte {byte:#04x}"),
        }
    }
}

impl std::error::Error for AddressError {}

/// A fully encoded 32-bit mailbox address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Address(u32);

impl Address {
    /// Encode an address from its four fields.
    pub fn encode(
        type_id_low: u16,
        system_id: u8,
        instance_id: u8,
        kind: MailboxKind,
    ) -> Result<Self, AddressError> {
        if system_id > MAX_SYSTEM_ID {
            return Err(AddressError::OutOfRange {
                field: "system_id",
                value: u32::from(system_id),
                max: u32::from(MAX_SYSTEM_ID),
            });
        }

        if instance_id > MAX_INSTANCE_ID {
            return Err(AddressError::OutOfRange {
                field: "instance_id",
                value: u32::from(instance_id),
                max: u32::from(MAX_INSTANCE_ID),
            });
        }

        let kind_byte = kind.offset()?;

        Ok(Self(
            u32::from(type_id_low) << 16
                | u32::from(system_id) << 12
                | u32::from(instance_id) << 8
                | u32::from(kind_byte),
        ))
    }

    /// Encode the base address of a mailbox set: all of the set's mailboxes
    /// are reached by adding a kind byte to this value.
    pub fn base(type_id_low: u16, system_id: u8, instance_id: u8) -> Result<Self, AddressError> {
        Self::encode(type_id_low, system_id, instance_id, MailboxKind::Cmd)
    }

    /// Reconstruct an address from its raw `u32` representation.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw `u32` carried on the wire.
    pub fn raw(self) -> u32 {
        self.0
    }

    /// The base address with the kind byte cleared.
    pub fn base_of(self) -> Self {
        Self(self.0 & 0xffff_ff00)
    }

    /// The kind byte in the low 8 bits.
    pub fn kind_byte(self) -> u8 {
        (self.0 & 0x0000_00ff) as u8
    }

    /// Rebase this address onto a different mailbox of the same set.
    pub fn with_kind(self, kind: MailboxKind) -> Result<Self, AddressError> {
        Ok(Self(self.base_of().0 | u32::from(kind.offset()?)))
    }

    /// Low 16 bits of the owning message type id.
    pub fn type_id_low(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// The system id field.
    pub fn system_id(self) -> u8 {
        ((self.0 >> 12) & u32::from(MAX_SYSTEM_ID)) as u8
    }

    /// The instance id field.
    pub fn instance_id(self) -> u8 {
        ((self.0 >> 8) & u32::from(MAX_INSTANCE_ID)) as u8
    }

    /// Decode the address back into its four fields.
    pub fn decode(self) -> Result<(u16, u8, u8, MailboxKind), AddressError> {
        Ok((
            self.type_id_low(),
            self.system_id(),
            self.instance_id(),
            MailboxKind::from_offset(self.kind_byte())?,
        ))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip_all_kinds() {
        for kind in [
            MailboxKind::Cmd,
            MailboxKind::Work,
            MailboxKind::Publish,
            MailboxKind::Data(0),
            MailboxKind::Data(7),
            MailboxKind::Data(15),
        ] {
            let addr = Address::encode(0xbeef, 5, 9, kind).unwrap();

            assert_eq!(addr.decode().unwrap(), (0xbeef, 5, 9, kind));
        }
    }

    #[test]
    fn kind_offsets() {
        assert_eq!(MailboxKind::Cmd.offset().unwrap(), 0x00);
        assert_eq!(MailboxKind::Work.offset().unwrap(), 0x10);
        assert_eq!(MailboxKind::Publish.offset().unwrap(), 0x20);
        assert_eq!(MailboxKind::Data(0).offset().unwrap(), 0x30);
        assert_eq!(MailboxKind::Data(15).offset().unwrap(), 0x3f);
    }

    #[test]
    fn base_plus_kind_composes_by_addition() {
        let base = Address::base(0x1234, 3, 2).unwrap();

        let work = Address::from_raw(base.raw() + 0x10);

        assert_eq!(work, base.with_kind(MailboxKind::Work).unwrap());
        assert_eq!(work.base_of(), base);
        assert_eq!(work.kind_byte(), 0x10);
    }

    #[test]
    fn fields_out_of_range() {
        assert!(Address::encode(0, 16, 0, MailboxKind::Cmd).is_err());
        assert!(Address::encode(0, 0, 16, MailboxKind::Cmd).is_err());
        assert!(Address::encode(0, 0, 0, MailboxKind::Data(16)).is_err());
    }

    #[test]
    fn invalid_kind_byte_rejected() {
        assert!(MailboxKind::from_offset(0x40).is_err());
        assert!(MailboxKind::from_offset(0x11).is_err());
        assert_eq!(MailboxKind::from_offset(0x3a).unwrap(), MailboxKind::Data(10));
    }
}
