//! Framework error types.

use crate::address::AddressError;
use commrat_wire::WireError;
use core::fmt;

/// Top level error returned by framework operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A module or mailbox configuration is invalid.
    Config(ConfigError),

    /// An address field was out of range at encode time.
    Address(AddressError),

    /// The underlying transport failed.
    Transport(TransportError),

    /// A payload could not be packed or unpacked.
    Wire(WireError),

    /// A received frame carried a different type than requested.
    WrongType {
        /// The message id the caller asked for.
        expected: u32,
        /// The message id found in the frame header.
        got: u32,
    },

    /// A subscription protocol exchange failed.
    Protocol(ProtocolError),

    /// A lifecycle operation was invoked in the wrong state.
    Lifecycle(LifecycleError),
}

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required field is missing or empty.
    MissingField(&'static str),

    /// A numeric field exceeds the width the address layout allows.
    FieldOutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: u32,
        /// Largest permitted value.
        max: u32,
    },

    /// Two outputs of one module resolve to the same base address.
    DuplicateOutputAddress {
        /// First output index involved in the collision.
        first: usize,
        /// Second output index involved in the collision.
        second: usize,
    },

    /// An input source names an input slot the module does not declare.
    UnknownInputIndex {
        /// The offending `input_index`.
        index: u8,
        /// Number of inputs the module declares.
        num_inputs: usize,
    },

    /// The configuration file could not be read or parsed.
    File(String),
}

/// Transport level failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The destination endpoint's queue is full and rejects new frames.
    QueueFull,

    /// The endpoint has been closed.
    Closed,

    /// A timed receive expired without a frame arriving.
    Timeout,

    /// No endpoint is bound to the destination id.
    Unreachable,

    /// The endpoint could not be created.
    Init(InitError),

    /// A frame exceeds the endpoint's maximum frame size.
    FrameTooLarge {
        /// Frame length in bytes.
        len: usize,
        /// Endpoint maximum.
        max: usize,
    },
}

/// Endpoint creation failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InitError {
    /// Another endpoint is already bound to this id.
    AddressInUse(u32),

    /// The endpoint was configured with zero capacity or frame size.
    ZeroCapacity,
}

/// Subscription protocol failures.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A WORK mailbox frame carried a message id outside the protocol set.
    UnknownMessage(u32),

    /// The producer's subscriber list for this output is full.
    SubscriberCapacity,

    /// A protocol operation referenced an output list the producer does
    /// not hold.
    UnknownOutput {
        /// The offending output index.
        index: usize,
    },
}

/// Lifecycle state machine violations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start` was called on a module that is already started.
    AlreadyStarted,

    /// An operation that requires a started module was invoked before
    /// `start`.
    NotStarted,

    /// An OS thread could not be spawned.
    ThreadSpawn,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "configuration error: {e}"),
            Error::Address(e) => write!(f, "address error: {e}"),
            Error::Transport(e) => write!(f, "transport error: {e}"),
            Error::Wire(e) => write!(f, "wire error: {e}"),
            Error::WrongType { expected, got } => {
                write!(
                    f,
                    "wrong message type: expected {expected:#010x}, got {got:#010x}"
                )
            }
            Error::Protocol(e) => write!(f, "protocol error: {e}"),
            Error::Lifecycle(e) => write!(f, "lifecycle error: {e}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingField(field) => write!(f, "missing required field `{field}`"),
            ConfigError::FieldOutOfRange { field, value, max } => {
                write!(f, "field `{field}` value {value} exceeds maximum {max}")
            }
            ConfigError::DuplicateOutputAddress { first, second } => {
                write!(
                    f,
                    "outputs {first} and {second} resolve to the same base address"
                )
            }
            ConfigError::UnknownInputIndex { index, num_inputs } => {
                write!(
                    f,
                    "input_index {index} out of range for module with {num_inputs} input(s)"
                )
            }
            ConfigError::File(reason) => write!(f, "config file: {reason}"),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::QueueFull => f.write_str("destination queue full"),
            TransportError::Closed => f.write_str("endpoint closed"),
            TransportError::Timeout => f.write_str("receive timed out"),
            TransportError::Unreachable => f.write_str("no endpoint bound to destination"),
            TransportError::Init(e) => write!(f, "endpoint init failed: {e}"),
            TransportError::FrameTooLarge { len, max } => {
                write!(f, "frame of {len} bytes exceeds endpoint maximum {max}")
            }
        }
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::AddressInUse(id) => write!(f, "address {id:#010x} already in use"),
            InitError::ZeroCapacity => f.write_str("zero slots or zero frame size"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnknownMessage(id) => {
                write!(f, "unknown protocol message id {id:#010x}")
            }
            ProtocolError::SubscriberCapacity => f.write_str("subscriber list full"),
            ProtocolError::UnknownOutput { index } => {
                write!(f, "no subscriber list for output {index}")
            }
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::AlreadyStarted => f.write_str("module already started"),
            LifecycleError::NotStarted => f.write_str("module not started"),
            LifecycleError::ThreadSpawn => f.write_str("failed to spawn thread"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<AddressError> for Error {
    fn from(e: AddressError) -> Self {
        Self::Address(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<WireError> for Error {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<LifecycleError> for Error {
    fn from(e: LifecycleError) -> Self {
        Self::Lifecycle(e)
    }
}
