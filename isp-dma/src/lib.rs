//! # isp-dma
//!
//! A `no_std`, zero-allocation buffer scheduler for the DMA ports of an
//! image signal processor. It keeps a pool of application-provided frame
//! buffers, hands the engine a destination for every frame, delivers
//! completed frames in order and falls back to a scratch buffer instead of
//! stalling when the application is slow.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Memory | [`buffer`] | Slot-arena buffer pool with idle and busy chains |
//! | Ports | [`port`] | Per-port register cache, refill and dummy fallback |
//! | Control | [`stream`] / [`control`] | Reference-counted start/stop, power seam |
//! | Hardware | [`hw`] | `DmaHardware` register trait, status flags, idle polling |
//! | Context | [`pipeline`] | Everything above behind the interrupt/process split |
//!
//! ## Frame lifecycle
//!
//! ```text
//!   queue()          selected as target       completion          dequeue()
//! ─────────► idle ─────────────────────► busy ───────────► ready ───────────► application
//!                                          │
//!                                          └── dropped or skipped: back to idle/busy
//! ```
//!
//! ## Parameters
//!
//! - **Pool size:** 16 buffers per port ([`constants::MAX_BUFFERS`])
//! - **Planes:** up to 3 per buffer ([`constants::MAX_PLANES`])
//! - **Driver-held buffers:** 2 in normal capture mode ([`constants::MIN_DRV_BUF`])
//! - **Address alignment:** 8 bytes ([`constants::DMA_ALIGN`])

#![no_std]

#[cfg(test)]
extern crate std;

pub mod buffer;
pub mod constants;
pub mod control;
pub mod error;
pub mod hw;
pub mod pipeline;
pub mod port;
pub mod stream;


pub use buffer::{Buffer, BufferId, BufferState, Plane, Planes};
pub use control::PowerControl;
pub use error::{Error, Result};
pub use hw::{DmaHardware, IrqStatus};
pub use pipeline::Pipeline;
pub use port::{CaptureMode, DummyBuffer, Geometry, PixelCode, PortId};
pub use stream::{Scope, StreamState};
