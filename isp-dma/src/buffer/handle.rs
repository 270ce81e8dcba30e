use crate::constants::MAX_PLANES;
use crate::error::{Mismatch, Result};

/// Physical (bus) address as seen by the DMA engine.
pub type DmaAddr = u32;

/// Index of a buffer inside its port's pool.
///
/// Ids are handed out by [`BufferPool::configure`](super::BufferPool::configure)
/// in registration order and stay valid until the pool is reconfigured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(u8);

impl BufferId {
    /// Id of the `index`-th registered buffer. Ids outside the pool are
    /// rejected when used.
    pub const fn new(index: u8) -> Self {
        BufferId(index)
    }

    /// Position of the buffer in the order it was registered.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn slot(self) -> u8 {
        self.0
    }
}

/// One contiguous plane of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Plane {
    pub addr: DmaAddr,
    pub len: u32,
}

impl Plane {
    pub const fn new(addr: DmaAddr, len: u32) -> Self {
        Plane { addr, len }
    }
}

/// The planes of one buffer (1 to [`MAX_PLANES`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Planes {
    planes: [Plane; MAX_PLANES],
    count: u8,
}

impl Planes {
    pub(crate) const EMPTY: Planes = Planes {
        planes: [Plane::new(0, 0); MAX_PLANES],
        count: 0,
    };

    /// A single-plane buffer.
    pub const fn single(addr: DmaAddr, len: u32) -> Self {
        let mut planes = [Plane::new(0, 0); MAX_PLANES];
        planes[0] = Plane::new(addr, len);
        Planes { planes, count: 1 }
    }

    /// Build from a slice of 1 to [`MAX_PLANES`] planes.
    pub fn from_slice(planes: &[Plane]) -> Result<Self> {
        if planes.is_empty() || planes.len() > MAX_PLANES {
            return Err(Mismatch::PlaneCount {
                expected: MAX_PLANES as u8,
                found: planes.len() as u8,
            }
            .into());
        }
        let mut out = Planes::EMPTY;
        out.planes[..planes.len()].copy_from_slice(planes);
        out.count = planes.len() as u8;
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn as_slice(&self) -> &[Plane] {
        &self.planes[..self.count as usize]
    }
}

/// Ownership state of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the driver, available for hardware.
    Idle,
    /// Committed to hardware, waiting for a completion.
    Busy,
    /// Owned by the application.
    WithConsumer,
}

/// Snapshot of a buffer as handed out by the pool.
///
/// The pool remains the owner of record; a `Buffer` is a descriptor the
/// caller uses to program registers (state [`Busy`](BufferState::Busy)) or
/// to read a finished frame (state [`WithConsumer`](BufferState::WithConsumer)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    pub(crate) id: BufferId,
    pub(crate) planes: Planes,
    pub(crate) state: BufferState,
    pub(crate) timestamp_us: u64,
    pub(crate) sequence: u32,
}

impl Buffer {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn planes(&self) -> &Planes {
        &self.planes
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Completion time of the frame, in microseconds of the hardware clock.
    /// Only meaningful for delivered buffers.
    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    /// Frame sequence number. Gaps between consecutive deliveries are
    /// dropped frames.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}
