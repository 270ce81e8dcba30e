//! DMA ports and their per-frame refill logic.
//!
//! Each port models the one-frame latency of the DMA engine with two
//! register-cache slots:
//!
//! ```text
//!   commit_address()          frame boundary            on_complete()
//!  ───────────────►  shadow  ───────────────►  current  ─────────────► retire
//!   (registers)      staged                    being written            (deliver,
//!                                                                       drop or
//!                                                                       discard)
//! ```
//!
//! On every completion the staged `shadow` is promoted to `current`, the
//! frame that just finished is retired through
//! [`BufferPool::exchange()`], and a new target is staged. When the pool
//! has nothing to offer, output ports fall back to the shared
//! [`DummyBuffer`]; without one they stop themselves rather than let the
//! engine write to memory the driver no longer owns.
//!
//! | Port | Direction | Dummy fallback | Multiplex |
//! |------|-----------|----------------|-----------|
//! | [`PortId::Sink`] | memory → ISP | no (stops at next frame) | no |
//! | [`PortId::CodecSource`] | ISP → memory | yes | 2–4 completions per frame |
//! | [`PortId::DisplaySource`] | ISP → memory | yes | no |

pub mod dummy;
pub mod geometry;
pub mod ready;

use crate::buffer::{Buffer, BufferId, BufferPool, BufferState, DmaAddr, Planes, PoolCounts};
use crate::constants::{MAX_EOF_MULTIPLEX, MIN_DRV_BUF, PORT_COUNT};
use crate::error::{Error, Mismatch, Result, Transition};
use crate::hw::{DmaHardware, IrqStatus};

pub use dummy::DummyBuffer;
pub use geometry::{Geometry, PixelCode, PlaneLayout};
pub use ready::ReadyQueue;

/// The closed set of DMA ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortId {
    /// Memory input: hardware reads frames from application buffers.
    Sink,
    /// Encoder output.
    CodecSource,
    /// Display/preview output.
    DisplaySource,
}

impl PortId {
    pub const ALL: [PortId; PORT_COUNT] = [PortId::Sink, PortId::CodecSource, PortId::DisplaySource];

    pub const fn index(self) -> usize {
        match self {
            PortId::Sink => 0,
            PortId::CodecSource => 1,
            PortId::DisplaySource => 2,
        }
    }

    /// Status bit raised when this port finishes a frame.
    pub const fn completion_flag(self) -> IrqStatus {
        match self {
            PortId::Sink => IrqStatus::SINK_EOF,
            PortId::CodecSource => IrqStatus::CODEC_EOF,
            PortId::DisplaySource => IrqStatus::DISPLAY_EOF,
        }
    }

    /// Whether the port may be pointed at the dummy buffer. The input port
    /// would feed the ISP stale scratch memory, so it never is.
    pub const fn uses_dummy(self) -> bool {
        !matches!(self, PortId::Sink)
    }

    pub const fn supports_multiplex(self) -> bool {
        matches!(self, PortId::CodecSource)
    }

    /// Only output ports capture; the input port always runs in
    /// [`CaptureMode::Normal`].
    pub const fn supports_capture_mode(self) -> bool {
        !matches!(self, PortId::Sink)
    }
}

/// What a register-cache slot points the engine at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Empty,
    Buffer(BufferId),
    Dummy(DmaAddr),
}

/// Buffer-retention policy of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Continuous streaming: the driver keeps [`MIN_DRV_BUF`] buffers.
    #[default]
    Normal,
    /// Single shots: every completed frame is delivered.
    Still,
}

impl CaptureMode {
    pub const fn min_in_flight(self) -> usize {
        match self {
            CaptureMode::Normal => MIN_DRV_BUF,
            CaptureMode::Still => 0,
        }
    }
}

/// Result of handling one completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The port was not enabled; nothing was touched.
    Ignored,
    /// One slice of a multiplexed frame finished.
    SubFrame,
    /// A frame was handed to the application.
    Delivered(BufferId),
    /// A frame was dropped or discarded; its buffer stayed with the driver.
    Dropped,
    /// The finished frame went to the dummy buffer (or nowhere).
    Unused,
    /// The port disabled itself at this frame boundary.
    Stopped,
}

/// Per-port event counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortStats {
    pub completions: u32,
    pub delivered: u32,
    pub dropped: u32,
    pub dummy_frames: u32,
    pub sub_frames: u32,
    /// Completions that arrived while the port was disabled.
    pub missed: u32,
    pub scheduled_stops: u32,
    /// Times the port was re-armed by a queued buffer after stopping itself.
    pub rearms: u32,
}

/// One DMA channel: its buffer pool, register cache and refill state.
pub struct DmaPort {
    id: PortId,
    pool: BufferPool,
    geometry: Option<Geometry>,
    layout: Option<PlaneLayout>,
    /// The format changed after buffers were registered.
    needs_reconfig: bool,
    mode: CaptureMode,
    current: Target,
    shadow: Target,
    enabled: bool,
    /// Mirrors the stream controller: the application wants frames.
    streaming: bool,
    scheduled_stop: bool,
    eof_count: u32,
    eof_max: u32,
    /// Retirements still to be discarded.
    skip: u32,
    stats: PortStats,
}

impl DmaPort {
    pub fn new(id: PortId) -> Self {
        let mode = CaptureMode::Normal;
        let mut pool = BufferPool::new();
        pool.set_min_in_flight(mode.min_in_flight());
        DmaPort {
            id,
            pool,
            geometry: None,
            layout: None,
            needs_reconfig: false,
            mode,
            current: Target::Empty,
            shadow: Target::Empty,
            enabled: false,
            streaming: false,
            scheduled_stop: false,
            eof_count: 0,
            eof_max: 0,
            skip: 0,
            stats: PortStats::default(),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn scheduled_stop(&self) -> bool {
        self.scheduled_stop
    }

    pub fn current(&self) -> Target {
        self.current
    }

    pub fn shadow(&self) -> Target {
        self.shadow
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn layout(&self) -> Option<&PlaneLayout> {
        self.layout.as_ref()
    }

    pub fn capture_mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn multiplex(&self) -> u32 {
        self.eof_max
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn counts(&self) -> PoolCounts {
        self.pool.counts()
    }

    pub fn stats(&self) -> PortStats {
        PortStats {
            dropped: self.pool.dropped(),
            ..self.stats
        }
    }

    // ── Configuration (port stopped) ───────────────────────────────────

    fn ensure_stopped(&self) -> Result<()> {
        if self.streaming {
            return Err(Transition::Streaming.into());
        }
        Ok(())
    }

    /// Set the frame geometry. A registered buffer set that no longer fits
    /// must be re-registered before the next start.
    pub fn set_format(&mut self, geometry: Geometry) -> Result<()> {
        self.ensure_stopped()?;
        let layout = geometry.layout()?;
        if self.pool.is_configured() {
            let total = self.pool.counts().total;
            self.needs_reconfig = (0..total)
                .filter_map(|i| self.pool.get(BufferId::new(i as u8)))
                .any(|b| layout.check(b.planes()).is_err());
        }
        self.geometry = Some(geometry);
        self.layout = Some(layout);
        Ok(())
    }

    /// Register the buffer set. All buffers start out with the application.
    pub fn configure_buffers(&mut self, buffers: &[Planes]) -> Result<()> {
        self.ensure_stopped()?;
        let layout = self.layout.ok_or(Error::ConfigMismatch(Mismatch::NoFormat))?;
        for planes in buffers {
            layout.check(planes)?;
        }
        self.pool.configure(buffers)?;
        self.needs_reconfig = false;
        self.skip = 0;
        self.stats = PortStats::default();
        Ok(())
    }

    pub fn release_buffers(&mut self) -> Result<()> {
        self.ensure_stopped()?;
        self.pool.release();
        self.needs_reconfig = false;
        Ok(())
    }

    pub fn set_capture_mode(&mut self, mode: CaptureMode) -> Result<()> {
        if !self.id.supports_capture_mode() {
            return Err(Transition::UnsupportedPort(self.id).into());
        }
        self.ensure_stopped()?;
        self.mode = mode;
        self.pool.set_min_in_flight(mode.min_in_flight());
        Ok(())
    }

    /// Split each frame into `slices` completion events. 0 and 1 turn
    /// multiplexing off.
    pub fn set_multiplex(&mut self, slices: u32) -> Result<()> {
        if !self.id.supports_multiplex() {
            return Err(Transition::UnsupportedPort(self.id).into());
        }
        self.ensure_stopped()?;
        self.eof_max = match slices {
            0 | 1 => 0,
            n if n <= MAX_EOF_MULTIPLEX => n,
            n => return Err(Mismatch::Multiplex(n).into()),
        };
        self.eof_count = 0;
        Ok(())
    }

    /// Discard the next `frames` completed frames without handing them out.
    pub fn skip_frames(&mut self, frames: u32) {
        self.skip = frames;
    }

    /// Check that the port can be started.
    pub fn ready_to_start(&self) -> Result<()> {
        if self.layout.is_none() || !self.pool.is_configured() {
            return Err(Transition::NotConfigured.into());
        }
        if self.needs_reconfig {
            return Err(Transition::NeedsReconfiguration.into());
        }
        Ok(())
    }

    // ── Capability interface ───────────────────────────────────────────

    /// Write `target` to the destination registers; it becomes `shadow`.
    pub fn commit_address<H: DmaHardware>(&mut self, hw: &mut H, target: Target) {
        let Some(layout) = self.layout else {
            return;
        };
        let regs = match target {
            Target::Empty => return,
            Target::Buffer(id) => match self.pool.get(id) {
                Some(buf) => layout.regs(buf.planes()),
                None => return,
            },
            Target::Dummy(addr) => layout.dummy_regs(addr),
        };
        hw.write_destination(self.id, &regs);
        self.shadow = target;
    }

    /// Prime and start the port.
    ///
    /// Commits a first target, enables DMA and the completion signal (the
    /// engine latches the first target at once), then stages a second
    /// target. Fails with [`Error::ResourceExhausted`] and leaves the port
    /// disarmed when neither a buffer nor the dummy buffer is available.
    pub fn enable<H: DmaHardware>(&mut self, hw: &mut H, dummy: Option<&DummyBuffer>) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        // Nothing is latched while disabled.
        self.pool.rehome_busy();
        let first = self.pick_target(dummy)?;

        self.scheduled_stop = false;
        self.eof_count = 0;
        self.commit_address(hw, first);
        hw.clear_pending(self.id);
        hw.set_completion_irq(self.id, true);
        hw.set_dma_enabled(self.id, true);
        self.enabled = true;
        self.current = self.shadow;

        match self.pick_target(dummy) {
            Ok(next) => self.commit_address(hw, next),
            // The registers still hold the first target.
            Err(_) => self.shadow = self.current,
        }
        log::debug!("{:?}: armed, current {:?}, shadow {:?}", self.id, self.current, self.shadow);
        Ok(())
    }

    /// Stop the engine: disable DMA, mask the completion signal and clear
    /// any latched completion. Buffers are left where they are.
    pub fn disable<H: DmaHardware>(&mut self, hw: &mut H) {
        hw.set_dma_enabled(self.id, false);
        hw.set_completion_irq(self.id, false);
        hw.clear_pending(self.id);
        self.enabled = false;
        self.current = Target::Empty;
        self.shadow = Target::Empty;
        self.eof_count = 0;
    }

    /// Handle one end-of-frame event.
    pub fn on_complete<H: DmaHardware>(
        &mut self,
        hw: &mut H,
        dummy: Option<&DummyBuffer>,
        ready: &ReadyQueue,
        now_us: u64,
    ) -> Completion {
        if !self.enabled {
            self.stats.missed = self.stats.missed.wrapping_add(1);
            return Completion::Ignored;
        }
        self.stats.completions = self.stats.completions.wrapping_add(1);

        if self.eof_max > 1 {
            self.eof_count += 1;
            if self.eof_count < self.eof_max {
                self.stats.sub_frames = self.stats.sub_frames.wrapping_add(1);
                let shadow = self.shadow;
                self.commit_address(hw, shadow);
                return Completion::SubFrame;
            }
            self.eof_count = 0;
        }

        let completed = self.current;
        self.current = self.shadow;

        if self.scheduled_stop {
            self.disable(hw);
            self.retire(completed, ready, now_us);
            self.pool.rehome_busy();
            self.stats.scheduled_stops = self.stats.scheduled_stops.wrapping_add(1);
            log::info!("{:?}: stopped at frame boundary", self.id);
            return Completion::Stopped;
        }

        let (outcome, next) = self.retire(completed, ready, now_us);
        self.install(hw, next, dummy);
        outcome
    }

    // ── Stream control ─────────────────────────────────────────────────

    pub(crate) fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    /// Re-home every busy buffer, then disable. Used on stream stop and
    /// suspend.
    pub(crate) fn shutdown<H: DmaHardware>(&mut self, hw: &mut H) {
        self.pool.rehome_busy();
        self.disable(hw);
        self.scheduled_stop = false;
    }

    /// Return a buffer from the application.
    ///
    /// On a streaming port the buffer is put to work at once. It replaces a
    /// staged dummy address, a re-staged current buffer or a pending
    /// self-stop, and it re-arms a port that is waiting for buffers.
    pub fn queue<H: DmaHardware>(
        &mut self,
        hw: &mut H,
        id: BufferId,
        dummy: Option<&DummyBuffer>,
    ) -> Result<()> {
        self.pool.queue(id)?;
        if !self.streaming {
            return Ok(());
        }
        if !self.enabled {
            if self.enable(hw, dummy).is_ok() {
                self.stats.rearms = self.stats.rearms.wrapping_add(1);
                log::debug!("{:?}: re-armed by queued buffer", self.id);
            }
            return Ok(());
        }
        let restaged = self.shadow == self.current;
        if matches!(self.shadow, Target::Dummy(_)) || restaged || self.scheduled_stop {
            if let Some(buf) = self.pool.exchange(false, false, 0) {
                self.commit_address(hw, Target::Buffer(buf.id()));
                self.scheduled_stop = false;
            }
        }
        Ok(())
    }

    // ── Private helpers ────────────────────────────────────────────────

    /// Next target: a pool buffer, else the dummy buffer if this port may
    /// use it.
    fn pick_target(&mut self, dummy: Option<&DummyBuffer>) -> Result<Target> {
        if let Some(buf) = self.pool.exchange(false, false, 0) {
            return Ok(Target::Buffer(buf.id()));
        }
        self.fallback(dummy)
    }

    fn fallback(&self, dummy: Option<&DummyBuffer>) -> Result<Target> {
        match dummy {
            Some(d) if self.id.uses_dummy() => Ok(Target::Dummy(d.addr())),
            _ => Err(Error::ResourceExhausted),
        }
    }

    /// Retire the frame that was written to `completed`. Returns the
    /// outcome and, when the pool already chose one, the next target.
    fn retire(&mut self, completed: Target, ready: &ReadyQueue, now_us: u64) -> (Completion, Option<Buffer>) {
        match completed {
            // Re-committed by the steal path: hardware is writing it again.
            Target::Buffer(id) if self.current == Target::Buffer(id) => {
                self.pool.note_drop();
                log::debug!("{:?}: buffer {} still latched, frame dropped", self.id, id.index());
                (Completion::Dropped, self.pool.exchange(false, false, now_us))
            }
            Target::Buffer(id) => {
                debug_assert_eq!(self.pool.oldest_busy(), Some(id));
                let discard = self.skip > 0;
                if discard {
                    self.skip -= 1;
                }
                match self.pool.exchange(true, discard, now_us) {
                    Some(buf) if buf.state() == BufferState::WithConsumer => {
                        let outcome = if self.deliver(buf, ready) {
                            Completion::Delivered(buf.id())
                        } else {
                            Completion::Dropped
                        };
                        (outcome, self.pool.exchange(false, false, now_us))
                    }
                    next => (Completion::Dropped, next),
                }
            }
            Target::Dummy(_) => {
                self.stats.dummy_frames = self.stats.dummy_frames.wrapping_add(1);
                (Completion::Unused, self.pool.exchange(false, false, now_us))
            }
            Target::Empty => (Completion::Unused, self.pool.exchange(false, false, now_us)),
        }
    }

    fn deliver(&mut self, buf: Buffer, ready: &ReadyQueue) -> bool {
        match ready.push(buf) {
            Ok(()) => {
                self.stats.delivered = self.stats.delivered.wrapping_add(1);
                true
            }
            Err(buf) => {
                log::error!("{:?}: ready queue full, buffer {} requeued", self.id, buf.id().index());
                if let Err(e) = self.pool.reclaim(buf.id()) {
                    log::error!("{:?}: buffer {} lost: {}", self.id, buf.id().index(), e);
                }
                false
            }
        }
    }

    /// Stage the next target, falling back to the dummy buffer or stopping.
    fn install<H: DmaHardware>(&mut self, hw: &mut H, next: Option<Buffer>, dummy: Option<&DummyBuffer>) {
        let target = match next {
            Some(buf) => Ok(Target::Buffer(buf.id())),
            None => self.fallback(dummy),
        };
        match target {
            Ok(t) => self.commit_address(hw, t),
            Err(_) if self.id.uses_dummy() => {
                log::warn!("{:?}: out of buffers and no dummy buffer, stopping", self.id);
                self.scheduled_stop = true;
                self.disable(hw);
                self.pool.rehome_busy();
                self.stats.scheduled_stops = self.stats.scheduled_stops.wrapping_add(1);
            }
            Err(_) => {
                // Registers still hold the current frame; stop after it.
                log::debug!("{:?}: drained, stopping at next frame", self.id);
                self.scheduled_stop = true;
                self.shadow = self.current;
            }
        }
    }
}
