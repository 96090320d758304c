//! Traits used to pack/unpack structs from CommRaT frames on the wire.
//!
//! Everything on a CommRaT mailbox is packed little endian with no padding
//! between fields. Sizes are known at compile time via
//! [`CommratWireSized::PACKED_LEN`], which is what lets receive buffers be
//! sized to the tight bound over a mailbox's permitted payload types instead
//! of the registry maximum.

#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

mod error;
mod impls;

pub use commrat_wire_derive::CommratWire;
pub use error::WireError;

/// A type that can be unpacked from a wire buffer.
pub trait CommratWireRead: Sized {
    /// Unpack this type from the beginning of the given buffer.
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError>;
}

/// A type that can be packed into a wire buffer.
pub trait CommratWireWrite {
    /// Pack the type and write it into the beginning of `buf`.
    ///
    /// # Panics
    ///
    /// This method must panic if `buf` is too short to hold the packed data.
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8];

    /// Pack the type and write it into the beginning of `buf`, checking the
    /// buffer length first.
    fn pack_to_slice<'buf>(&self, buf: &'buf mut [u8]) -> Result<&'buf [u8], WireError> {
        if buf.len() < self.packed_len() {
            return Err(WireError::WriteBufferTooShort {
                expected: self.packed_len(),
                got: buf.len(),
            });
        }

        Ok(self.pack_to_slice_unchecked(buf))
    }

    /// Get the length in bytes of this item when packed.
    fn packed_len(&self) -> usize;
}

/// Implemented for types with a known packed size at compile time.
pub trait CommratWireSized: CommratWireRead {
    /// Packed size in bytes.
    const PACKED_LEN: usize;

    /// Used to define an array of the correct length. This type should ALWAYS
    /// be of the form `[u8; N]` where `N` is a fixed value or const generic
    /// as per the type this trait is implemented on.
    type Buffer: AsRef<[u8]> + AsMut<[u8]>;

    /// Create a buffer sized to contain the packed representation of this
    /// item.
    fn buffer() -> Self::Buffer;
}

/// A fixed-size type that can be packed to an owned buffer.
pub trait CommratWireWriteSized: CommratWireWrite + CommratWireSized {
    /// Pack this item to a fixed sized array.
    fn pack(&self) -> Self::Buffer;
}
