//! Register-file mock of the DMA block for host tests.

use embedded_hal::delay::DelayNs;

use super::{DestinationRegs, DmaHardware, IrqStatus};
use crate::buffer::DmaAddr;
use crate::constants::PORT_COUNT;
use crate::port::PortId;

const LOG_LEN: usize = 256;

/// One recorded register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Write {
    Destination(PortId, DmaAddr),
    Dma(PortId, bool),
    Irq(PortId, bool),
    OverrunIrq(bool),
    Clear(PortId),
}

/// Mock DMA block that keeps per-port register state and a write log.
pub(crate) struct MockHardware {
    /// Staged first-plane address per port.
    pub staged: [Option<DestinationRegs>; PORT_COUNT],
    pub dma_on: [bool; PORT_COUNT],
    pub irq_on: [bool; PORT_COUNT],
    pub overrun_irq_on: bool,
    /// Ports that never report idle.
    pub stuck: [bool; PORT_COUNT],
    /// Pending status bits returned by the next `take_status()`.
    pub status: IrqStatus,
    /// Number of DMA enable / disable edges per port.
    pub enables: [u32; PORT_COUNT],
    pub disables: [u32; PORT_COUNT],
    pub now_us: u64,
    log: [Option<Write>; LOG_LEN],
    log_count: usize,
}

impl MockHardware {
    pub fn new() -> Self {
        Self {
            staged: [None; PORT_COUNT],
            dma_on: [false; PORT_COUNT],
            irq_on: [false; PORT_COUNT],
            overrun_irq_on: false,
            stuck: [false; PORT_COUNT],
            status: IrqStatus::empty(),
            enables: [0; PORT_COUNT],
            disables: [0; PORT_COUNT],
            now_us: 0,
            log: [None; LOG_LEN],
            log_count: 0,
        }
    }

    fn record(&mut self, w: Write) {
        if self.log_count < LOG_LEN {
            self.log[self.log_count] = Some(w);
        }
        self.log_count += 1;
    }

    /// First-plane address currently staged for `port`.
    pub fn staged_addr(&self, port: PortId) -> Option<DmaAddr> {
        self.staged[port.index()].map(|r| r.base())
    }

    pub fn writes(&self) -> impl Iterator<Item = Write> + '_ {
        self.log[..self.log_count.min(LOG_LEN)].iter().flatten().copied()
    }

    pub fn destination_writes(&self, port: PortId) -> usize {
        self.writes()
            .filter(|w| matches!(w, Write::Destination(p, _) if *p == port))
            .count()
    }
}

impl DmaHardware for MockHardware {
    fn write_destination(&mut self, port: PortId, regs: &DestinationRegs) {
        self.staged[port.index()] = Some(*regs);
        self.record(Write::Destination(port, regs.base()));
    }

    fn set_dma_enabled(&mut self, port: PortId, enabled: bool) {
        let i = port.index();
        if enabled && !self.dma_on[i] {
            self.enables[i] += 1;
        }
        if !enabled && self.dma_on[i] {
            self.disables[i] += 1;
        }
        self.dma_on[i] = enabled;
        self.record(Write::Dma(port, enabled));
    }

    fn set_completion_irq(&mut self, port: PortId, unmasked: bool) {
        self.irq_on[port.index()] = unmasked;
        self.record(Write::Irq(port, unmasked));
    }

    fn set_overrun_irq(&mut self, unmasked: bool) {
        self.overrun_irq_on = unmasked;
        self.record(Write::OverrunIrq(unmasked));
    }

    fn clear_pending(&mut self, port: PortId) {
        self.status.remove(port.completion_flag());
        self.record(Write::Clear(port));
    }

    fn take_status(&mut self) -> IrqStatus {
        core::mem::replace(&mut self.status, IrqStatus::empty())
    }

    fn port_active(&mut self, port: PortId) -> bool {
        let i = port.index();
        self.stuck[i] || self.dma_on[i]
    }

    fn timestamp_us(&mut self) -> u64 {
        self.now_us += 33_333;
        self.now_us
    }
}

/// Delay that returns at once and counts how often it was asked to wait.
#[derive(Default)]
pub(crate) struct NoDelay {
    pub calls: u32,
}

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {
        self.calls += 1;
    }
}
