//! Crate-wide error type.
//!
//! Every fallible operation returns [`Result`]. Errors are small `Copy`
//! values so they can be produced from the completion path without
//! allocation.

use core::fmt;

use crate::buffer::{BufferId, DmaAddr};
use crate::port::PortId;

/// Errors reported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Neither an idle nor a busy buffer, nor a dummy buffer, could be
    /// found for a port. Recovered internally; callers normally only see
    /// it counted as a dropped frame.
    ResourceExhausted,
    /// The request is not valid in the current state. Nothing was changed.
    InvalidTransition(Transition),
    /// A port did not go idle within the bounded number of polls. The port
    /// has been forced to `Stopped`.
    HardwareTimeout(PortId),
    /// Plane or size assumptions were violated. Rejected before any
    /// register write.
    ConfigMismatch(Mismatch),
}

/// Why a request was rejected as an invalid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The port has no format or no buffer set.
    NotConfigured,
    /// The format changed after the buffer set was registered.
    NeedsReconfiguration,
    /// The operation requires the port to be stopped.
    Streaming,
    /// The buffer id does not belong to the port's pool.
    UnknownBuffer(BufferId),
    /// The buffer is not currently owned by the application.
    NotWithConsumer(BufferId),
    /// The operation is not supported by this port.
    UnsupportedPort(PortId),
    /// The pipeline is suspended.
    Suspended,
}

/// Which configuration assumption was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    /// No geometry has been set for the port.
    NoFormat,
    /// Width or height is zero.
    EmptyGeometry,
    /// The computed plane size does not fit in 32 bits.
    SizeOverflow,
    /// A buffer has the wrong number of planes for the format.
    PlaneCount { expected: u8, found: u8 },
    /// A plane is smaller than the format requires.
    PlaneTooSmall { plane: u8, needed: u32, found: u32 },
    /// A plane address is null or not DMA-aligned.
    Misaligned(DmaAddr),
    /// More buffers were offered than a pool can hold.
    TooManyBuffers(usize),
    /// The dummy buffer cannot hold the largest plane of an output port.
    DummyTooSmall { needed: u32, found: u32 },
    /// Unsupported frame multiplex factor.
    Multiplex(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ResourceExhausted => f.write_str("no buffer available for DMA"),
            Error::InvalidTransition(t) => write!(f, "invalid transition: {t}"),
            Error::HardwareTimeout(port) => write!(f, "{port:?} port did not go idle"),
            Error::ConfigMismatch(m) => write!(f, "configuration mismatch: {m}"),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::NotConfigured => f.write_str("port has no format or buffers"),
            Transition::NeedsReconfiguration => {
                f.write_str("buffer set no longer matches the format")
            }
            Transition::Streaming => f.write_str("port is streaming"),
            Transition::UnknownBuffer(id) => write!(f, "unknown buffer {}", id.index()),
            Transition::NotWithConsumer(id) => {
                write!(f, "buffer {} is not owned by the application", id.index())
            }
            Transition::UnsupportedPort(port) => write!(f, "not supported on {port:?}"),
            Transition::Suspended => f.write_str("pipeline is suspended"),
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::NoFormat => f.write_str("no format set"),
            Mismatch::EmptyGeometry => f.write_str("zero width or height"),
            Mismatch::SizeOverflow => f.write_str("plane size overflows"),
            Mismatch::PlaneCount { expected, found } => {
                write!(f, "expected {expected} planes, found {found}")
            }
            Mismatch::PlaneTooSmall {
                plane,
                needed,
                found,
            } => write!(f, "plane {plane} holds {found} bytes, needs {needed}"),
            Mismatch::Misaligned(addr) => write!(f, "address {addr:#010x} is not DMA-aligned"),
            Mismatch::TooManyBuffers(n) => write!(f, "{n} buffers exceed pool capacity"),
            Mismatch::DummyTooSmall { needed, found } => {
                write!(f, "dummy buffer holds {found} bytes, needs {needed}")
            }
            Mismatch::Multiplex(n) => write!(f, "unsupported multiplex factor {n}"),
        }
    }
}

impl From<Transition> for Error {
    fn from(t: Transition) -> Self {
        Error::InvalidTransition(t)
    }
}

impl From<Mismatch> for Error {
    fn from(m: Mismatch) -> Self {
        Error::ConfigMismatch(m)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
