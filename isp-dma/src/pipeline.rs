//! The pipeline context: every port, the shared dummy buffer, stream
//! reference counts and the power collaborator in one value.
//!
//! State is split by who touches it:
//!
//! | Part | Touched by | Guard |
//! |------|------------|-------|
//! | core: hardware, ports, pools, dummy buffer | interrupt + process | `critical_section::Mutex` |
//! | ready queues | interrupt pushes, `dequeue()` pops | SPSC ring, both ends inside the critical section |
//! | sequencer: stream counts, power, delay | process only | `spin::Mutex` |
//!
//! The interrupt path only ever takes the critical section, for a bounded
//! amount of work. Start, stop, suspend and resume hold the sequencer lock
//! for their whole duration (including the bounded idle polling in
//! `stop()`) and enter the critical section only for register updates.

use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::delay::DelayNs;

use crate::buffer::{Buffer, BufferId, Planes, PoolCounts};
use crate::constants::{PORT_COUNT, STATUS_POLL_INTERVAL_US, STATUS_POLL_RETRIES};
use crate::control::PowerControl;
use crate::error::{Error, Result, Transition};
use crate::hw::{poll_until, DmaHardware, IrqStatus};
use crate::port::{
    CaptureMode, Completion, DmaPort, DummyBuffer, Geometry, PortId, PortStats, ReadyQueue,
};
use crate::stream::{Scope, StreamController, StreamState};

/// State shared with the completion handler.
struct Core<H> {
    hw: H,
    ports: [DmaPort; PORT_COUNT],
    dummy: Option<DummyBuffer>,
    irq_count: u32,
    overruns: u32,
    /// Overruns since the last completed output frame. The overrun
    /// interrupt stays masked while this is non-zero.
    overrun_streak: u32,
}

impl<H: DmaHardware> Core<H> {
    fn complete(&mut self, port: PortId, ready: &ReadyQueue) -> Completion {
        let now_us = self.hw.timestamp_us();
        let Core {
            hw, ports, dummy, ..
        } = self;
        let out = ports[port.index()].on_complete(hw, dummy.as_ref(), ready, now_us);
        let frame_done = !matches!(out, Completion::Ignored | Completion::SubFrame);
        if frame_done && port != PortId::Sink && self.overrun_streak > 0 {
            log::debug!("output resumed after {} overruns", self.overrun_streak);
            self.overrun_streak = 0;
            self.hw.set_overrun_irq(true);
        }
        out
    }

    fn overrun(&mut self) {
        self.overruns = self.overruns.wrapping_add(1);
        self.overrun_streak = self.overrun_streak.saturating_add(1);
        self.hw.set_overrun_irq(false);
        log::warn!("DMA overrun, {} in a row", self.overrun_streak);
    }

    fn arm(&mut self, port: PortId) {
        let Core {
            hw, ports, dummy, ..
        } = self;
        let p = &mut ports[port.index()];
        p.set_streaming(true);
        if let Err(e) = p.enable(hw, dummy.as_ref()) {
            log::warn!("{port:?}: {e}, waiting for buffers");
        }
    }

    fn disarm(&mut self, port: PortId) {
        let p = &mut self.ports[port.index()];
        p.shutdown(&mut self.hw);
        p.set_streaming(false);
    }
}

/// Process-context state.
struct Sequencer<P, D> {
    power: P,
    delay: D,
    streams: StreamController,
    /// Ports that were streaming when the pipeline was suspended.
    suspended: Option<[bool; PORT_COUNT]>,
}

/// An ISP DMA block with its three ports.
///
/// `H` drives the registers, `P` gates clocks and power, `D` sleeps
/// between idle polls while stopping a port.
///
/// ```ignore
/// static PIPELINE: Lazy<Pipeline<Regs, Clocks, Delay>> = ...;
///
/// PIPELINE.set_format(PortId::DisplaySource, Geometry::new(640, 480, PixelCode::Uyvy))?;
/// PIPELINE.configure_buffers(PortId::DisplaySource, &buffers)?;
/// for id in 0..buffers.len() {
///     PIPELINE.queue(PortId::DisplaySource, BufferId::new(id as u8))?;
/// }
/// PIPELINE.start(PortId::DisplaySource)?;
///
/// // ISP interrupt handler:
/// PIPELINE.handle_irq();
///
/// // Application:
/// if let Some(frame) = PIPELINE.dequeue(PortId::DisplaySource) {
///     show(frame.planes());
///     PIPELINE.queue(PortId::DisplaySource, frame.id())?;
/// }
/// ```
pub struct Pipeline<H, P, D> {
    core: Mutex<RefCell<Core<H>>>,
    ready: [ReadyQueue; PORT_COUNT],
    seq: spin::Mutex<Sequencer<P, D>>,
}

impl<H, P, D> Pipeline<H, P, D>
where
    H: DmaHardware,
    P: PowerControl,
    D: DelayNs,
{
    pub fn new(hw: H, power: P, delay: D) -> Self {
        Pipeline {
            core: Mutex::new(RefCell::new(Core {
                hw,
                ports: PortId::ALL.map(DmaPort::new),
                dummy: None,
                irq_count: 0,
                overruns: 0,
                overrun_streak: 0,
            })),
            ready: [ReadyQueue::new(), ReadyQueue::new(), ReadyQueue::new()],
            seq: spin::Mutex::new(Sequencer {
                power,
                delay,
                streams: StreamController::new(),
                suspended: None,
            }),
        }
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut Core<H>) -> R) -> R {
        critical_section::with(|cs| f(&mut *self.core.borrow_ref_mut(cs)))
    }

    /// Run `f` against the hardware with the completion handler held off.
    pub fn hardware<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        self.with_core(|core| f(&mut core.hw))
    }

    /// Run `f` against the power collaborator.
    pub fn power<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        f(&mut self.seq.lock().power)
    }

    /// Inspect one port.
    pub fn port<R>(&self, port: PortId, f: impl FnOnce(&DmaPort) -> R) -> R {
        self.with_core(|core| f(&core.ports[port.index()]))
    }

    // ── Configuration ──────────────────────────────────────────────────

    pub fn set_format(&self, port: PortId, geometry: Geometry) -> Result<()> {
        let _seq = self.seq.lock();
        self.with_core(|core| {
            let p = &mut core.ports[port.index()];
            if p.is_streaming() {
                return Err(Transition::Streaming.into());
            }
            if let (true, Some(dummy)) = (port.uses_dummy(), core.dummy) {
                dummy.fits(&geometry.layout()?)?;
            }
            p.set_format(geometry)
        })
    }

    /// Register the buffer set of a stopped port. Frames still waiting in
    /// its ready queue belong to the old set and are dropped.
    pub fn configure_buffers(&self, port: PortId, buffers: &[Planes]) -> Result<()> {
        let _seq = self.seq.lock();
        self.with_core(|core| {
            core.ports[port.index()].configure_buffers(buffers)?;
            self.ready[port.index()].clear();
            Ok::<_, Error>(())
        })?;
        log::debug!("{port:?}: {} buffers registered", buffers.len());
        Ok(())
    }

    pub fn release_buffers(&self, port: PortId) -> Result<()> {
        let _seq = self.seq.lock();
        self.with_core(|core| {
            core.ports[port.index()].release_buffers()?;
            self.ready[port.index()].clear();
            Ok(())
        })
    }

    /// Install or remove the shared dummy buffer. It must hold the largest
    /// plane of every output port that already has a format.
    pub fn set_dummy(&self, dummy: Option<DummyBuffer>) -> Result<()> {
        let _seq = self.seq.lock();
        self.with_core(|core| {
            if core.ports.iter().any(|p| p.is_streaming()) {
                return Err(Transition::Streaming.into());
            }
            if let Some(d) = dummy {
                for p in core.ports.iter().filter(|p| p.id().uses_dummy()) {
                    if let Some(layout) = p.layout() {
                        d.fits(layout)?;
                    }
                }
            }
            core.dummy = dummy;
            Ok(())
        })
    }

    pub fn set_capture_mode(&self, port: PortId, mode: CaptureMode) -> Result<()> {
        let _seq = self.seq.lock();
        self.with_core(|core| core.ports[port.index()].set_capture_mode(mode))
    }

    pub fn set_multiplex(&self, port: PortId, slices: u32) -> Result<()> {
        let _seq = self.seq.lock();
        self.with_core(|core| core.ports[port.index()].set_multiplex(slices))
    }

    /// Discard the next `frames` completed frames of `port`.
    pub fn skip_frames(&self, port: PortId, frames: u32) {
        self.with_core(|core| core.ports[port.index()].skip_frames(frames));
    }

    // ── Data path ──────────────────────────────────────────────────────

    /// Hand a buffer back to the driver.
    pub fn queue(&self, port: PortId, id: BufferId) -> Result<()> {
        self.with_core(|core| {
            let Core {
                hw, ports, dummy, ..
            } = core;
            ports[port.index()].queue(hw, id, dummy.as_ref())
        })
    }

    /// Take the oldest completed frame, if any. Safe to call from several
    /// threads; each frame is handed out once.
    pub fn dequeue(&self, port: PortId) -> Option<Buffer> {
        critical_section::with(|_| self.ready[port.index()].pop())
    }

    // ── Stream control ─────────────────────────────────────────────────

    /// Take a stream reference on `port`. The first reference arms the
    /// port; the first reference on any port powers the block up.
    ///
    /// A port with nothing to write into still counts as streaming and
    /// arms itself when a buffer is queued.
    pub fn start(&self, port: PortId) -> Result<()> {
        let mut guard = self.seq.lock();
        let seq = &mut *guard;
        if seq.suspended.is_some() {
            return Err(Transition::Suspended.into());
        }
        self.with_core(|core| core.ports[port.index()].ready_to_start())?;

        if !seq.streams.acquire(Scope::Port(port)) {
            return Ok(());
        }
        if seq.streams.acquire(Scope::Global) {
            log::info!("powering up");
            seq.power.enable();
            self.with_core(|core| {
                core.overrun_streak = 0;
                core.hw.set_overrun_irq(true);
            });
        }
        seq.streams.settle(Scope::Global);

        self.with_core(|core| core.arm(port));
        seq.streams.settle(Scope::Port(port));
        log::info!("{port:?}: streaming");
        Ok(())
    }

    /// Drop a stream reference on `port`. The last reference re-homes its
    /// buffers, disables it and waits for the engine to go idle; the last
    /// reference on any port powers the block down.
    ///
    /// While suspended the port is already disarmed and the block powered
    /// down, so only the references change.
    pub fn stop(&self, port: PortId) -> Result<()> {
        let mut guard = self.seq.lock();
        let seq = &mut *guard;
        if !seq.streams.release(Scope::Port(port)) {
            return Ok(());
        }
        let result = match seq.suspended {
            Some(_) => Ok(()),
            None => self.halt(seq, port),
        };
        seq.streams.settle(Scope::Port(port));
        if let Some(saved) = seq.suspended.as_mut() {
            saved[port.index()] = false;
        }
        Self::release_global(seq);
        log::info!("{port:?}: stopped");
        result
    }

    /// Stop every port regardless of how many references it holds.
    /// Returns the first error encountered.
    pub fn stop_all(&self) -> Result<()> {
        let mut first = None;
        for port in PortId::ALL {
            while self.seq.lock().streams.refcount(Scope::Port(port)) > 0 {
                if let Err(e) = self.stop(port) {
                    first.get_or_insert(e);
                }
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Disarm every streaming port and power down, keeping stream
    /// references so [`resume()`](Self::resume) can restore them.
    pub fn suspend(&self) -> Result<()> {
        let mut guard = self.seq.lock();
        let seq = &mut *guard;
        if seq.suspended.is_some() {
            return Ok(());
        }
        let mut saved = [false; PORT_COUNT];
        self.with_core(|core| {
            for port in PortId::ALL {
                if core.ports[port.index()].is_streaming() {
                    saved[port.index()] = true;
                    core.disarm(port);
                }
            }
        });

        let mut result = Ok(());
        for port in PortId::ALL.into_iter().filter(|p| saved[p.index()]) {
            if !self.wait_idle(&mut seq.delay, port) {
                log::warn!("{port:?}: still active at suspend");
                result = result.and(Err(Error::HardwareTimeout(port)));
            }
        }
        if seq.streams.refcount(Scope::Global) > 0 {
            log::info!("suspended, powering down");
            seq.power.disable();
        }
        seq.suspended = Some(saved);
        result
    }

    /// Power up and re-arm the ports that were streaming at suspend.
    pub fn resume(&self) {
        let mut guard = self.seq.lock();
        let seq = &mut *guard;
        let Some(saved) = seq.suspended.take() else {
            return;
        };
        if seq.streams.refcount(Scope::Global) > 0 {
            log::info!("resumed, powering up");
            seq.power.enable();
        }
        self.with_core(|core| {
            for port in PortId::ALL.into_iter().filter(|p| saved[p.index()]) {
                core.arm(port);
            }
        });
    }

    pub fn is_suspended(&self) -> bool {
        self.seq.lock().suspended.is_some()
    }

    // ── Interrupt path ─────────────────────────────────────────────────

    /// Interrupt entry: read and clear the status word, then handle one
    /// completion for every port whose flag is set.
    ///
    /// An overrun masks the overrun interrupt until an output port
    /// completes its next frame, so a stalled engine cannot storm the CPU.
    pub fn handle_irq(&self) -> IrqStatus {
        self.with_core(|core| {
            let status = core.hw.take_status();
            core.irq_count = core.irq_count.wrapping_add(1);
            for port in PortId::ALL {
                if status.contains(port.completion_flag()) {
                    let out = core.complete(port, &self.ready[port.index()]);
                    log::trace!("{port:?}: {out:?}");
                }
            }
            if status.contains(IrqStatus::OVERRUN) {
                core.overrun();
            }
            status
        })
    }

    /// Handle one completion of `port`, for hosts that route each port's
    /// end-of-frame to its own handler.
    pub fn on_complete(&self, port: PortId) -> Completion {
        self.with_core(|core| core.complete(port, &self.ready[port.index()]))
    }

    // ── Observation ────────────────────────────────────────────────────

    pub fn stream_state(&self, scope: Scope) -> StreamState {
        self.seq.lock().streams.state(scope)
    }

    pub fn refcount(&self, scope: Scope) -> u32 {
        self.seq.lock().streams.refcount(scope)
    }

    pub fn stats(&self, port: PortId) -> PortStats {
        self.port(port, |p| p.stats())
    }

    pub fn counts(&self, port: PortId) -> PoolCounts {
        self.port(port, |p| p.counts())
    }

    pub fn overruns(&self) -> u32 {
        self.with_core(|core| core.overruns)
    }

    pub fn irq_count(&self) -> u32 {
        self.with_core(|core| core.irq_count)
    }

    // ── Private helpers ────────────────────────────────────────────────

    /// Disarm `port` and wait for the engine to go idle.
    fn halt(&self, seq: &mut Sequencer<P, D>, port: PortId) -> Result<()> {
        self.with_core(|core| core.disarm(port));
        if self.wait_idle(&mut seq.delay, port) {
            seq.streams.clear_timeouts();
            return Ok(());
        }
        log::warn!("{port:?}: still active after stop, forced to stopped");
        if seq.streams.record_timeout() {
            self.force_stop_all(seq);
        }
        Err(Error::HardwareTimeout(port))
    }

    fn wait_idle(&self, delay: &mut D, port: PortId) -> bool {
        poll_until(delay, STATUS_POLL_RETRIES, STATUS_POLL_INTERVAL_US, || {
            !self.with_core(|core| core.hw.port_active(port))
        })
    }

    fn force_stop_all(&self, seq: &mut Sequencer<P, D>) {
        log::error!("repeated stop timeouts, forcing every port down");
        self.with_core(|core| {
            for port in PortId::ALL {
                core.disarm(port);
            }
        });
        for port in PortId::ALL {
            seq.streams.abort(Scope::Port(port));
        }
        if seq.streams.abort(Scope::Global) > 0 && seq.suspended.is_none() {
            seq.power.disable();
        }
        if let Some(saved) = seq.suspended.as_mut() {
            *saved = [false; PORT_COUNT];
        }
    }

    fn release_global(seq: &mut Sequencer<P, D>) {
        if seq.streams.release(Scope::Global) && seq.suspended.is_none() {
            log::info!("powering down");
            seq.power.disable();
        }
        seq.streams.settle(Scope::Global);
    }
}
