//! Builtin implementations for various types.

use crate::{CommratWireRead, CommratWireSized, CommratWireWrite, CommratWireWriteSized, WireError};

macro_rules! impl_primitive_wire_field {
    ($ty:ty, $size:expr) => {
        impl CommratWireWrite for $ty {
            fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
                let chunk = &mut buf[0..$size];

                chunk.copy_from_slice(&self.to_le_bytes());

                chunk
            }

            fn packed_len(&self) -> usize {
                $size
            }
        }

        impl CommratWireRead for $ty {
            fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
                buf.get(0..$size)
                    .ok_or(WireError::ReadBufferTooShort {
                        expected: $size,
                        got: buf.len(),
                    })
                    .and_then(|raw| raw.try_into().map_err(|_| WireError::InvalidValue))
                    .map(Self::from_le_bytes)
            }
        }

        impl CommratWireSized for $ty {
            const PACKED_LEN: usize = $size;

            type Buffer = [u8; $size];

            fn buffer() -> Self::Buffer {
                [0u8; $size]
            }
        }

        impl CommratWireWriteSized for $ty {
            fn pack(&self) -> Self::Buffer {
                self.to_le_bytes()
            }
        }
    };
}

impl_primitive_wire_field!(u8, 1);
impl_primitive_wire_field!(u16, 2);
impl_primitive_wire_field!(u32, 4);
impl_primitive_wire_field!(u64, 8);
impl_primitive_wire_field!(i8, 1);
impl_primitive_wire_field!(i16, 2);
impl_primitive_wire_field!(i32, 4);
impl_primitive_wire_field!(i64, 8);

impl CommratWireWrite for f32 {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let chunk = &mut buf[0..4];

        chunk.copy_from_slice(&self.to_le_bytes());

        chunk
    }

    fn packed_len(&self) -> usize {
        4
    }
}

impl CommratWireRead for f32 {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        buf.get(0..4)
            .ok_or(WireError::ReadBufferTooShort {
                expected: 4,
                got: buf.len(),
            })
            .and_then(|raw| raw.try_into().map_err(|_| WireError::InvalidValue))
            .map(Self::from_le_bytes)
    }
}

impl CommratWireSized for f32 {
    const PACKED_LEN: usize = 4;

    type Buffer = [u8; 4];

    fn buffer() -> Self::Buffer {
        [0u8; 4]
    }
}

impl CommratWireWriteSized for f32 {
    fn pack(&self) -> Self::Buffer {
        self.to_le_bytes()
    }
}

impl CommratWireWrite for f64 {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let chunk = &mut buf[0..8];

        chunk.copy_from_slice(&self.to_le_bytes());

        chunk
    }

    fn packed_len(&self) -> usize {
        8
    }
}

impl CommratWireRead for f64 {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        buf.get(0..8)
            .ok_or(WireError::ReadBufferTooShort {
                expected: 8,
                got: buf.len(),
            })
            .and_then(|raw| raw.try_into().map_err(|_| WireError::InvalidValue))
            .map(Self::from_le_bytes)
    }
}

impl CommratWireSized for f64 {
    const PACKED_LEN: usize = 8;

    type Buffer = [u8; 8];

    fn buffer() -> Self::Buffer {
        [0u8; 8]
    }
}

impl CommratWireWriteSized for f64 {
    fn pack(&self) -> Self::Buffer {
        self.to_le_bytes()
    }
}

impl CommratWireWrite for bool {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        buf[0] = *self as u8;

        &buf[0..1]
    }

    fn packed_len(&self) -> usize {
        1
    }
}

impl CommratWireRead for bool {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        if buf.is_empty() {
            return Err(WireError::ReadBufferTooShort {
                expected: 1,
                got: 0,
            });
        }

        Ok(buf[0] == 1)
    }
}

impl CommratWireSized for bool {
    const PACKED_LEN: usize = 1;

    type Buffer = [u8; 1];

    fn buffer() -> Self::Buffer {
        [0u8; 1]
    }
}

impl CommratWireWriteSized for bool {
    fn pack(&self) -> Self::Buffer {
        [*self as u8; 1]
    }
}

impl CommratWireWrite for () {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        &buf[0..0]
    }

    fn packed_len(&self) -> usize {
        0
    }
}

impl CommratWireRead for () {
    fn unpack_from_slice(_buf: &[u8]) -> Result<Self, WireError> {
        Ok(())
    }
}

impl CommratWireSized for () {
    const PACKED_LEN: usize = 0;

    type Buffer = [u8; 0];

    fn buffer() -> Self::Buffer {
        []
    }
}

impl CommratWireWriteSized for () {
    fn pack(&self) -> Self::Buffer {
        []
    }
}

impl<const N: usize> CommratWireWrite for [u8; N] {
    fn pack_to_slice_unchecked<'buf>(&self, buf: &'buf mut [u8]) -> &'buf [u8] {
        let buf = &mut buf[0..N];

        buf.copy_from_slice(self);

        buf
    }

    fn packed_len(&self) -> usize {
        N
    }
}

impl<const N: usize> CommratWireRead for [u8; N] {
    fn unpack_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        let chunk = buf.get(0..N).ok_or(WireError::ReadBufferTooShort {
            expected: N,
            got: buf.len(),
        })?;

        chunk.try_into().map_err(|_e| WireError::InvalidValue)
    }
}

impl<const N: usize> CommratWireSized for [u8; N] {
    const PACKED_LEN: usize = N;

    type Buffer = [u8; N];

    fn buffer() -> Self::Buffer {
        [0u8; N]
    }
}

impl<const N: usize> CommratWireWriteSized for [u8; N] {
    fn pack(&self) -> Self::Buffer {
        *self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_round_trip() {
        let value = 0xdead_beefu32;

        let mut buf = [0u8; 8];
        let packed = value.pack_to_slice(&mut buf).unwrap();

        assert_eq!(packed, &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(u32::unpack_from_slice(packed).unwrap(), value);
    }

    #[test]
    fn short_read() {
        let buf = [0u8; 2];

        assert_eq!(
            u32::unpack_from_slice(&buf),
            Err(WireError::ReadBufferTooShort {
                expected: 4,
                got: 2
            })
        );
    }

    #[test]
    fn short_write() {
        let mut buf = [0u8; 3];

        assert!(0u64.pack_to_slice(&mut buf).is_err());
    }

    #[test]
    fn bool_packs_to_single_byte() {
        assert_eq!(true.pack(), [1]);
        assert_eq!(bool::unpack_from_slice(&[1]).unwrap(), true);
        assert_eq!(bool::unpack_from_slice(&[0]).unwrap(), false);
    }
}
