//! Capture buffers and the per-port buffer pool.
//!
//! A buffer is a fixed set of 1–3 physically contiguous planes registered
//! once at configuration time. From then on it is always in exactly one of
//! three places:
//!
//! ```text
//!            queue()                exchange(deliver=false)
//! ┌──────────────┐ ──────► ┌──────┐ ──────────────────────► ┌──────┐
//! │ WithConsumer │         │ idle │                         │ busy │ (FIFO)
//! └──────────────┘ ◄────── └──────┘ ◄────────────────────── └──────┘
//!         ▲       dequeue()            rehome_busy() / drop      │
//!         └──────────────────────────────────────────────────────┘
//!                        exchange(deliver=true)
//! ```
//!
//! The pool never allocates: slots live in a fixed array and the `idle`
//! and `busy` lists are intrusive index chains through that array.

mod handle;
pub mod pool;

pub use handle::{Buffer, BufferId, BufferState, DmaAddr, Plane, Planes};
pub use pool::{BufferPool, PoolCounts};
