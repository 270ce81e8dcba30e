//! Delivered-frame queue between the completion handler and `dequeue()`.
//!
//! A Lamport ring: the completion handler is the only producer, the
//! application's dequeue path the only consumer. Neither side takes a
//! lock, so a slow consumer never lengthens the interrupt path.
//!
//! # Safety Contract
//!
//! - Only the completion path (inside the pipeline's critical section)
//!   calls [`push()`](ReadyQueue::push).
//! - [`pop()`](ReadyQueue::pop) and [`clear()`](ReadyQueue::clear) run
//!   inside the same critical section, so consumers on several threads are
//!   serialized against each other.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::Buffer;
use crate::constants::MAX_BUFFERS;

/// One slot more than a pool can hold, so a push can never fail while the
/// pool invariants hold.
const SLOTS: usize = MAX_BUFFERS + 1;

/// FIFO of buffers waiting for the application.
pub struct ReadyQueue {
    slots: [UnsafeCell<MaybeUninit<Buffer>>; SLOTS],
    /// Next slot to write (producer only).
    head: AtomicUsize,
    /// Next slot to read (consumer only).
    tail: AtomicUsize,
}

// SAFETY: `Buffer` is plain `Copy` data. The single-producer/single-consumer
// contract means each index is only advanced by its own side, and the
// acquire/release pairs below publish slot contents before the index move.
unsafe impl Sync for ReadyQueue {}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue {
    #[allow(clippy::declare_interior_mut_const)]
    pub const fn new() -> Self {
        const EMPTY: UnsafeCell<MaybeUninit<Buffer>> = UnsafeCell::new(MaybeUninit::uninit());
        ReadyQueue {
            slots: [EMPTY; SLOTS],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Append a delivered buffer. Hands it back if the ring is full.
    pub fn push(&self, buf: Buffer) -> Result<(), Buffer> {
        let head = self.head.load(Ordering::Relaxed);
        let next = (head + 1) % SLOTS;
        if next == self.tail.load(Ordering::Acquire) {
            return Err(buf);
        }
        // SAFETY: sole producer; `next != tail` means the consumer is not
        // reading this slot.
        unsafe { (*self.slots[head].get()).write(buf) };
        self.head.store(next, Ordering::Release);
        Ok(())
    }

    /// Take the oldest delivered buffer.
    pub fn pop(&self) -> Option<Buffer> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: sole consumer; `tail != head` means the producer has
        // published this slot.
        let buf = unsafe { (*self.slots[tail].get()).assume_init_read() };
        self.tail.store((tail + 1) % SLOTS, Ordering::Release);
        Some(buf)
    }

    /// Discard everything queued. Consumer side.
    pub fn clear(&self) {
        while self.pop().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Acquire) == self.head.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + SLOTS - tail) % SLOTS
    }
}
