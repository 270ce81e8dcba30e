//! Register-access seam between the pipeline and a concrete DMA block.
//!
//! The pipeline never touches memory-mapped registers itself. A board or
//! SoC crate implements [`DmaHardware`] for its register block and hands it
//! to [`Pipeline::new()`](crate::pipeline::Pipeline::new). Register writes
//! are infallible, like the MMIO stores they stand for.
//!
//! | Method | Called from | Purpose |
//! |--------|-------------|---------|
//! | [`write_destination`](DmaHardware::write_destination) | completion, queue, start | Stage the next frame's plane addresses |
//! | [`set_dma_enabled`](DmaHardware::set_dma_enabled) | start, stop, completion | Port DMA enable bit |
//! | [`set_completion_irq`](DmaHardware::set_completion_irq) | start, stop, completion | Unmask/mask the end-of-frame signal |
//! | [`clear_pending`](DmaHardware::clear_pending) | start, stop, completion | Drop a latched end-of-frame |
//! | [`set_overrun_irq`](DmaHardware::set_overrun_irq) | start, interrupt entry, completion | Unmask/mask the overrun signal |
//! | [`take_status`](DmaHardware::take_status) | interrupt entry | Read and clear the status word |
//! | [`port_active`](DmaHardware::port_active) | stop | Transfer still in flight? |
//! | [`timestamp_us`](DmaHardware::timestamp_us) | completion | Frame timestamp |

use bitflags::bitflags;

use crate::buffer::{DmaAddr, Plane};
use crate::constants::MAX_PLANES;
use crate::port::PortId;

mod poll;

#[cfg(test)]
pub(crate) mod mock;

pub use poll::poll_until;

bitflags! {
    /// Interrupt status word, read and cleared in one access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqStatus: u32 {
        /// End of frame on the display output port.
        const DISPLAY_EOF = 1 << 0;
        /// End of frame (or of one multiplexed slice) on the codec output port.
        const CODEC_EOF = 1 << 1;
        /// End of frame on the memory input port.
        const SINK_EOF = 1 << 2;
        /// The engine had to discard input because no destination was ready.
        const OVERRUN = 1 << 8;
    }
}

/// Destination register values for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationRegs {
    pub planes: [Plane; MAX_PLANES],
    pub count: u8,
    pub bytes_per_line: u32,
}

impl DestinationRegs {
    pub fn planes(&self) -> &[Plane] {
        &self.planes[..self.count as usize]
    }

    /// Address of the first plane.
    pub fn base(&self) -> DmaAddr {
        self.planes[0].addr
    }
}

/// Register interface of the DMA block.
pub trait DmaHardware {
    /// Program the destination (or source, for the memory input port) of
    /// the next frame. Takes effect at the next frame boundary.
    fn write_destination(&mut self, port: PortId, regs: &DestinationRegs);

    /// Set or clear the port's DMA enable bit. Enabling latches the
    /// destination registers immediately.
    fn set_dma_enabled(&mut self, port: PortId, enabled: bool);

    /// Unmask (`true`) or mask (`false`) the port's end-of-frame interrupt.
    fn set_completion_irq(&mut self, port: PortId, unmasked: bool);

    /// Unmask (`true`) or mask (`false`) the block-wide overrun interrupt.
    fn set_overrun_irq(&mut self, unmasked: bool);

    /// Clear a latched end-of-frame status for the port.
    fn clear_pending(&mut self, port: PortId);

    /// Read the interrupt status word and clear every bit that was read.
    fn take_status(&mut self) -> IrqStatus;

    /// `true` while the port still has a transfer in flight.
    fn port_active(&mut self, port: PortId) -> bool;

    /// Free-running microsecond clock used to stamp completed frames.
    fn timestamp_us(&mut self) -> u64;
}
