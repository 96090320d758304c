//! Wire packing/unpacking errors.

use core::fmt;

/// A failure while packing or unpacking an item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The buffer to unpack from is shorter than the packed representation.
    ReadBufferTooShort {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        got: usize,
    },

    /// The buffer to pack into is shorter than the packed representation.
    WriteBufferTooShort {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        got: usize,
    },

    /// A raw value on the wire does not map to a valid instance of the
    /// target type.
    InvalidValue,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::ReadBufferTooShort { expected, got } => {
                write!(f, "read buffer too short: need {expected}, got {got}")
            }
            WireError::WriteBufferTooShort { expected, got } => {
                write!(f, "write buffer too short: need {expected}, got {got}")
            }
            WireError::InvalidValue => f.write_str("invalid value"),
        }
    }
}

impl std::error::Error for WireError {}
