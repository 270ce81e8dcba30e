use crate::buffer::DmaAddr;
use crate::error::{Mismatch, Result};

use super::geometry::{check_addr, PlaneLayout};

/// Pre-pinned scratch area the output ports write into when the pool has
/// nothing to offer.
///
/// Its contents are never delivered. One dummy buffer is shared by every
/// output port, so it must hold the largest plane of any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DummyBuffer {
    addr: DmaAddr,
    len: u32,
}

impl DummyBuffer {
    pub fn new(addr: DmaAddr, len: u32) -> Result<Self> {
        check_addr(addr)?;
        Ok(DummyBuffer { addr, len })
    }

    pub fn addr(&self) -> DmaAddr {
        self.addr
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every plane of `layout` is pointed at the same scratch area, so only
    /// the largest plane matters.
    pub fn fits(&self, layout: &PlaneLayout) -> Result<()> {
        let needed = layout.largest();
        if self.len < needed {
            return Err(Mismatch::DummyTooSmall {
                needed,
                found: self.len,
            }
            .into());
        }
        Ok(())
    }
}
