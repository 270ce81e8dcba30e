use crate::constants::MAX_BUFFERS;
use crate::error::{Mismatch, Result, Transition};

use super::handle::{Buffer, BufferId, BufferState, Planes};

/// Chain terminator.
const NIL: u8 = u8::MAX;

#[derive(Clone, Copy)]
struct Slot {
    planes: Planes,
    state: BufferState,
    prev: u8,
    next: u8,
    timestamp_us: u64,
    sequence: u32,
}

impl Slot {
    const EMPTY: Slot = Slot {
        planes: Planes::EMPTY,
        state: BufferState::WithConsumer,
        prev: NIL,
        next: NIL,
        timestamp_us: 0,
        sequence: 0,
    };
}

/// Doubly linked index chain through the slot array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Chain {
    head: u8,
    tail: u8,
    len: u8,
}

impl Chain {
    const EMPTY: Chain = Chain {
        head: NIL,
        tail: NIL,
        len: 0,
    };
}

#[derive(Clone, Copy)]
enum List {
    Idle,
    Busy,
}

/// Number of buffers in each ownership state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolCounts {
    pub idle: usize,
    pub busy: usize,
    pub with_consumer: usize,
    pub total: usize,
}

/// Fixed-capacity pool of capture buffers for one DMA port.
///
/// Buffers are registered with [`configure()`](Self::configure) and stay in
/// the pool until the next reconfiguration. `idle` is an unordered set and
/// `busy` is strictly FIFO in the order buffers were committed to hardware.
///
/// The pool itself is not synchronized. The pipeline keeps it inside the
/// same critical section as the owning port's register cache, so every
/// method here runs in bounded time with no allocation.
pub struct BufferPool {
    slots: [Slot; MAX_BUFFERS],
    total: u8,
    idle: Chain,
    busy: Chain,
    min_in_flight: usize,
    /// Sequence number given to the next retired frame.
    sequence: u32,
    dropped: u32,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    /// Create an empty pool. Minimum in-flight defaults to zero.
    pub const fn new() -> Self {
        BufferPool {
            slots: [Slot::EMPTY; MAX_BUFFERS],
            total: 0,
            idle: Chain::EMPTY,
            busy: Chain::EMPTY,
            min_in_flight: 0,
            sequence: 0,
            dropped: 0,
        }
    }

    /// Replace the buffer set.
    ///
    /// Every previous buffer is forgotten, counters are reset and the new
    /// buffers start out owned by the application: they enter the pool
    /// proper when [`queue()`](Self::queue)d. Ids are assigned in slice
    /// order.
    pub fn configure(&mut self, buffers: &[Planes]) -> Result<()> {
        if buffers.len() > MAX_BUFFERS {
            return Err(Mismatch::TooManyBuffers(buffers.len()).into());
        }
        self.release();
        for (slot, planes) in self.slots.iter_mut().zip(buffers) {
            *slot = Slot {
                planes: *planes,
                ..Slot::EMPTY
            };
        }
        self.total = buffers.len() as u8;
        Ok(())
    }

    /// Forget every buffer and reset the counters.
    pub fn release(&mut self) {
        self.slots = [Slot::EMPTY; MAX_BUFFERS];
        self.total = 0;
        self.idle = Chain::EMPTY;
        self.busy = Chain::EMPTY;
        self.sequence = 0;
        self.dropped = 0;
    }

    /// Number of buffers the driver tries to keep for itself before it
    /// starts dropping frames instead of delivering them.
    pub fn set_min_in_flight(&mut self, min: usize) {
        self.min_in_flight = min;
    }

    pub fn min_in_flight(&self) -> usize {
        self.min_in_flight
    }

    /// Return a buffer from the application to the pool. It becomes idle.
    pub fn queue(&mut self, id: BufferId) -> Result<()> {
        match self.state(id) {
            None => Err(Transition::UnknownBuffer(id).into()),
            Some(BufferState::WithConsumer) => {
                self.push_back(List::Idle, id.slot());
                Ok(())
            }
            Some(_) => Err(Transition::NotWithConsumer(id).into()),
        }
    }

    /// The exchange primitive shared by the completion path and the
    /// application path.
    ///
    /// With `deliver == false` this selects the next buffer for hardware:
    /// any idle buffer (moved to the tail of `busy`), otherwise the oldest
    /// busy buffer re-committed in place once at least
    /// `max(min_in_flight, 1)` are busy, otherwise `None`. Existing busy
    /// entries are never removed or reordered.
    ///
    /// With `deliver == true` the oldest busy buffer is retired first:
    ///
    /// - `discard`: it goes straight back to the tail of `busy` and is
    ///   returned in state `Busy` as the next hardware target. The frame
    ///   counts as dropped.
    /// - fewer than `min_in_flight` buffers would stay with the driver:
    ///   the frame is dropped, selection proceeds as for
    ///   `deliver == false`, and the retired buffer then becomes idle.
    /// - otherwise it is stamped with `now_us` and a sequence number and
    ///   returned in state `WithConsumer`.
    ///
    /// With `busy` empty there is nothing to retire and `deliver == true`
    /// behaves like `deliver == false`. Callers tell a delivered buffer
    /// from a hardware target by [`Buffer::state()`].
    pub fn exchange(&mut self, deliver: bool, discard: bool, now_us: u64) -> Option<Buffer> {
        if deliver {
            if let Some(slot) = self.pop_front(List::Busy) {
                let sequence = self.sequence;
                self.sequence = self.sequence.wrapping_add(1);

                if discard {
                    self.dropped = self.dropped.wrapping_add(1);
                    self.push_back(List::Busy, slot);
                    return Some(self.snapshot(slot));
                }

                let remaining = self.idle.len as usize + self.busy.len as usize;
                if remaining < self.min_in_flight {
                    self.dropped = self.dropped.wrapping_add(1);
                    log::warn!(
                        "frame {} dropped: {} buffers left in flight, need {}",
                        sequence,
                        remaining,
                        self.min_in_flight
                    );
                    let next = self.select();
                    self.push_back(List::Idle, slot);
                    return next;
                }

                let s = &mut self.slots[slot as usize];
                s.state = BufferState::WithConsumer;
                s.timestamp_us = now_us;
                s.sequence = sequence;
                return Some(self.snapshot(slot));
            }
        }
        self.select()
    }

    /// Move every busy buffer back to idle.
    ///
    /// The former busy buffers keep their order and end up ahead of the
    /// buffers that were already idle.
    pub fn rehome_busy(&mut self) {
        if self.busy.len == 0 {
            return;
        }
        let mut cursor = self.busy.head;
        while cursor != NIL {
            let slot = &mut self.slots[cursor as usize];
            slot.state = BufferState::Idle;
            cursor = slot.next;
        }

        let old_idle = self.idle;
        self.idle = self.busy;
        self.busy = Chain::EMPTY;
        if old_idle.len > 0 {
            self.slots[self.idle.tail as usize].next = old_idle.head;
            self.slots[old_idle.head as usize].prev = self.idle.tail;
            self.idle.tail = old_idle.tail;
            self.idle.len += old_idle.len;
        }
    }

    /// Count a frame that retired without passing through
    /// [`exchange()`](Self::exchange). It still consumes a sequence number,
    /// so the application sees the gap.
    pub fn note_drop(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
        self.dropped = self.dropped.wrapping_add(1);
    }

    /// Take back a delivered buffer the application never received and
    /// count its frame as dropped. Its sequence number is already spent.
    pub fn reclaim(&mut self, id: BufferId) -> Result<()> {
        self.queue(id)?;
        self.dropped = self.dropped.wrapping_add(1);
        Ok(())
    }

    /// Frames dropped since the last (re)configuration.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn counts(&self) -> PoolCounts {
        let idle = self.idle.len as usize;
        let busy = self.busy.len as usize;
        let total = self.total as usize;
        PoolCounts {
            idle,
            busy,
            with_consumer: total - idle - busy,
            total,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.total > 0
    }

    /// State of a buffer, or `None` if the id is not part of this pool.
    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        (id.slot() < self.total).then(|| self.slots[id.index()].state)
    }

    pub fn get(&self, id: BufferId) -> Option<Buffer> {
        (id.slot() < self.total).then(|| self.snapshot(id.slot()))
    }

    /// The buffer the next delivery will retire.
    pub fn oldest_busy(&self) -> Option<BufferId> {
        (self.busy.head != NIL).then(|| BufferId::new(self.busy.head))
    }

    /// Busy buffers, oldest first.
    pub fn busy(&self) -> ChainIter<'_> {
        ChainIter {
            slots: &self.slots,
            cursor: self.busy.head,
        }
    }

    /// Idle buffers in selection order.
    pub fn idle(&self) -> ChainIter<'_> {
        ChainIter {
            slots: &self.slots,
            cursor: self.idle.head,
        }
    }

    // ── Private helpers ────────────────────────────────────────────────

    fn select(&mut self) -> Option<Buffer> {
        if let Some(slot) = self.pop_front(List::Idle) {
            self.push_back(List::Busy, slot);
            return Some(self.snapshot(slot));
        }
        if self.busy.len as usize >= self.min_in_flight.max(1) {
            log::debug!("no idle buffer, re-committing oldest busy buffer");
            return Some(self.snapshot(self.busy.head));
        }
        None
    }

    fn snapshot(&self, slot: u8) -> Buffer {
        let s = &self.slots[slot as usize];
        Buffer {
            id: BufferId::new(slot),
            planes: s.planes,
            state: s.state,
            timestamp_us: s.timestamp_us,
            sequence: s.sequence,
        }
    }

    fn chain(&mut self, list: List) -> &mut Chain {
        match list {
            List::Idle => &mut self.idle,
            List::Busy => &mut self.busy,
        }
    }

    fn push_back(&mut self, list: List, slot: u8) {
        let chain = *self.chain(list);
        {
            let s = &mut self.slots[slot as usize];
            s.state = match list {
                List::Idle => BufferState::Idle,
                List::Busy => BufferState::Busy,
            };
            s.prev = chain.tail;
            s.next = NIL;
        }
        if chain.tail != NIL {
            self.slots[chain.tail as usize].next = slot;
        }
        let chain = self.chain(list);
        if chain.head == NIL {
            chain.head = slot;
        }
        chain.tail = slot;
        chain.len += 1;
    }

    /// Unlink the head of a chain. The slot's state is left for the caller
    /// to overwrite.
    fn pop_front(&mut self, list: List) -> Option<u8> {
        let head = self.chain(list).head;
        if head == NIL {
            return None;
        }
        let next = self.slots[head as usize].next;
        if next != NIL {
            self.slots[next as usize].prev = NIL;
        }
        self.slots[head as usize].next = NIL;
        let chain = self.chain(list);
        chain.head = next;
        if next == NIL {
            chain.tail = NIL;
        }
        chain.len -= 1;
        Some(head)
    }
}

/// Iterator over one of the pool's chains.
pub struct ChainIter<'a> {
    slots: &'a [Slot; MAX_BUFFERS],
    cursor: u8,
}

impl Iterator for ChainIter<'_> {
    type Item = BufferId;

    fn next(&mut self) -> Option<BufferId> {
        if self.cursor == NIL {
            return None;
        }
        let id = BufferId::new(self.cursor);
        self.cursor = self.slots[self.cursor as usize].next;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn ids(iter: ChainIter<'_>) -> ([usize; MAX_BUFFERS], usize) {
        let mut out = [usize::MAX; MAX_BUFFERS];
        let mut n = 0;
        for id in iter {
            out[n] = id.index();
            n += 1;
        }
        (out, n)
    }

    fn busy_order(pool: &BufferPool) -> ([usize; MAX_BUFFERS], usize) {
        ids(pool.busy())
    }

    /// Pool with `n` single-plane buffers, all queued (idle).
    fn queued_pool(n: usize, min: usize) -> BufferPool {
        let mut planes = [Planes::EMPTY; MAX_BUFFERS];
        for (i, p) in planes.iter_mut().enumerate().take(n) {
            *p = Planes::single(0x1000_0000 + (i as u32) * 0x1000, 0x1000);
        }
        let mut pool = BufferPool::new();
        pool.configure(&planes[..n]).unwrap();
        pool.set_min_in_flight(min);
        for i in 0..n {
            pool.queue(BufferId::new(i as u8)).unwrap();
        }
        pool
    }

    fn assert_conserved(pool: &BufferPool, total: usize) {
        let c = pool.counts();
        assert_eq!(c.idle + c.busy + c.with_consumer, total);
        assert_eq!(c.total, total);
        assert_eq!(pool.idle().count(), c.idle);
        assert_eq!(pool.busy().count(), c.busy);
    }

    // ── Configuration ─────────────────────────────────────────────────

    #[test]
    fn configured_buffers_start_with_consumer() {
        let mut pool = BufferPool::new();
        pool.configure(&[Planes::single(0x1000, 64), Planes::single(0x2000, 64)])
            .unwrap();
        let c = pool.counts();
        assert_eq!(c.with_consumer, 2);
        assert_eq!(c.idle, 0);
        assert_eq!(pool.state(BufferId::new(1)), Some(BufferState::WithConsumer));
        assert_eq!(pool.state(BufferId::new(2)), None);
    }

    #[test]
    fn configure_rejects_too_many() {
        let mut pool = BufferPool::new();
        let planes = [Planes::single(0x1000, 64); MAX_BUFFERS + 1];
        assert_eq!(
            pool.configure(&planes),
            Err(Error::ConfigMismatch(Mismatch::TooManyBuffers(MAX_BUFFERS + 1)))
        );
    }

    #[test]
    fn queue_rejects_unknown_and_owned_buffers() {
        let mut pool = queued_pool(2, 0);
        assert_eq!(
            pool.queue(BufferId::new(5)),
            Err(Error::InvalidTransition(Transition::UnknownBuffer(BufferId::new(5))))
        );
        assert_eq!(
            pool.queue(BufferId::new(0)),
            Err(Error::InvalidTransition(Transition::NotWithConsumer(BufferId::new(0))))
        );
        assert_conserved(&pool, 2);
    }

    #[test]
    fn reconfigure_forgets_previous_set() {
        let mut pool = queued_pool(4, 0);
        pool.exchange(false, false, 0);
        pool.configure(&[Planes::single(0x8000, 64)]).unwrap();
        assert_conserved(&pool, 1);
        assert_eq!(pool.counts().with_consumer, 1);
        assert_eq!(pool.dropped(), 0);
    }

    // ── Selection ─────────────────────────────────────────────────────

    #[test]
    fn select_prefers_idle() {
        let mut pool = queued_pool(3, 1);
        let b = pool.exchange(false, false, 0).unwrap();
        assert_eq!(b.id().index(), 0);
        assert_eq!(b.state(), BufferState::Busy);
        assert_eq!(pool.counts().busy, 1);
        assert_eq!(pool.counts().idle, 2);
    }

    #[test]
    fn empty_pool_returns_none() {
        let mut pool = queued_pool(0, 0);
        for _ in 0..4 {
            assert!(pool.exchange(false, false, 0).is_none());
            assert!(pool.exchange(false, true, 0).is_none());
        }

        // Configured, but everything is with the application.
        let mut pool = BufferPool::new();
        pool.configure(&[Planes::single(0x1000, 64)]).unwrap();
        assert!(pool.exchange(false, false, 0).is_none());
        assert!(pool.exchange(true, false, 0).is_none());
    }

    #[test]
    fn steals_oldest_busy_when_idle_empty() {
        let mut pool = queued_pool(2, 2);
        pool.exchange(false, false, 0).unwrap();
        pool.exchange(false, false, 0).unwrap();
        assert_eq!(pool.counts().idle, 0);

        let stolen = pool.exchange(false, false, 0).unwrap();
        assert_eq!(stolen.id().index(), 0);
        assert_eq!(stolen.state(), BufferState::Busy);
        let (order, n) = busy_order(&pool);
        assert_eq!(&order[..n], &[0, 1]);
    }

    #[test]
    fn no_steal_below_minimum() {
        let mut pool = queued_pool(1, 2);
        pool.exchange(false, false, 0).unwrap();
        // Only one busy buffer, minimum two: nothing may be re-committed.
        assert!(pool.exchange(false, false, 0).is_none());
    }

    #[test]
    fn steal_with_zero_minimum_needs_one_busy() {
        let mut pool = queued_pool(1, 0);
        pool.exchange(false, false, 0).unwrap();
        let again = pool.exchange(false, false, 0).unwrap();
        assert_eq!(again.id().index(), 0);
        assert_eq!(pool.counts().busy, 1);
    }

    #[test]
    fn select_never_reorders_busy() {
        let mut pool = queued_pool(4, 1);
        pool.exchange(false, false, 0);
        pool.exchange(false, false, 0);
        let (before, n_before) = busy_order(&pool);

        for _ in 0..6 {
            pool.exchange(false, false, 0);
            let (after, n_after) = busy_order(&pool);
            // Existing entries keep their positions; at most an append.
            assert!(n_after >= n_before);
            assert_eq!(&after[..n_before], &before[..n_before]);
        }
        assert_conserved(&pool, 4);
    }

    // ── Delivery ──────────────────────────────────────────────────────

    #[test]
    fn delivery_is_fifo() {
        let mut pool = queued_pool(5, 0);
        for _ in 0..5 {
            pool.exchange(false, false, 0).unwrap();
        }
        for expected in 0..5 {
            let b = pool.exchange(true, false, 100 + expected as u64).unwrap();
            assert_eq!(b.state(), BufferState::WithConsumer);
            assert_eq!(b.id().index(), expected);
            assert_eq!(b.timestamp_us(), 100 + expected as u64);
            assert_eq!(b.sequence(), expected as u32);
        }
        assert_eq!(pool.counts().with_consumer, 5);
    }

    #[test]
    fn discard_resubmits_retired_buffer() {
        let mut pool = queued_pool(3, 1);
        pool.exchange(false, false, 0).unwrap();
        pool.exchange(false, false, 0).unwrap();
        let busy_before = pool.counts().busy;

        let b = pool.exchange(true, true, 0).unwrap();
        assert_eq!(b.id().index(), 0);
        assert_eq!(b.state(), BufferState::Busy);
        assert_eq!(pool.counts().busy, busy_before);
        assert_eq!(pool.dropped(), 1);
        // The retired buffer moved to the back of the line.
        let (order, n) = busy_order(&pool);
        assert_eq!(&order[..n], &[1, 0]);
    }

    #[test]
    fn delivery_drops_below_minimum_and_falls_through() {
        // Two buffers, minimum two: delivering either one would leave one.
        let mut pool = queued_pool(2, 2);
        pool.exchange(false, false, 0).unwrap();
        pool.exchange(false, false, 0).unwrap();

        // Idle is empty and one busy buffer is below the steal threshold.
        assert!(pool.exchange(true, false, 0).is_none());
        assert_eq!(pool.dropped(), 1);
        assert_eq!(pool.state(BufferId::new(0)), Some(BufferState::Idle));
        assert_eq!(pool.counts().with_consumer, 0);
        assert_conserved(&pool, 2);

        // The fall-through selection still takes an idle buffer.
        let mut pool = queued_pool(3, 3);
        pool.exchange(false, false, 0).unwrap();
        pool.exchange(false, false, 0).unwrap();
        let next = pool.exchange(true, false, 0).unwrap();
        assert_eq!(next.id().index(), 2);
        assert_eq!(next.state(), BufferState::Busy);
        assert_eq!(pool.dropped(), 1);
        let (order, n) = busy_order(&pool);
        assert_eq!(&order[..n], &[1, 2]);
    }

    #[test]
    fn dropped_buffer_is_not_reselected_immediately() {
        // Scenario: one busy buffer, nothing idle, minimum one.
        let mut pool = queued_pool(1, 1);
        pool.exchange(false, false, 0).unwrap();

        assert!(pool.exchange(true, false, 0).is_none());
        assert_eq!(pool.dropped(), 1);
        assert_eq!(pool.state(BufferId::new(0)), Some(BufferState::Idle));

        // Next frame picks it up again.
        let b = pool.exchange(false, false, 0).unwrap();
        assert_eq!(b.id().index(), 0);
    }

    #[test]
    fn deliver_with_empty_busy_selects() {
        let mut pool = queued_pool(2, 1);
        let b = pool.exchange(true, false, 0).unwrap();
        assert_eq!(b.state(), BufferState::Busy);
        assert_eq!(pool.dropped(), 0);
    }

    #[test]
    fn sequence_counts_dropped_frames() {
        let mut pool = queued_pool(3, 0);
        for _ in 0..3 {
            pool.exchange(false, false, 0).unwrap();
        }
        pool.exchange(true, true, 0).unwrap();
        let b = pool.exchange(true, false, 0).unwrap();
        assert_eq!(b.sequence(), 1);
    }

    #[test]
    fn drop_outside_exchange_spends_a_sequence_number() {
        let mut pool = queued_pool(3, 0);
        for _ in 0..3 {
            pool.exchange(false, false, 0).unwrap();
        }
        let first = pool.exchange(true, false, 0).unwrap();
        assert_eq!(first.sequence(), 0);

        pool.note_drop();
        let next = pool.exchange(true, false, 0).unwrap();
        assert_eq!(next.sequence(), 2);
        assert_eq!(pool.dropped(), 1);
    }

    #[test]
    fn reclaim_keeps_the_sequence_and_counts_a_drop() {
        let mut pool = queued_pool(3, 0);
        for _ in 0..3 {
            pool.exchange(false, false, 0).unwrap();
        }
        let lost = pool.exchange(true, false, 0).unwrap();
        pool.reclaim(lost.id()).unwrap();
        assert_eq!(pool.state(lost.id()), Some(BufferState::Idle));
        assert_eq!(pool.dropped(), 1);

        let next = pool.exchange(true, false, 0).unwrap();
        assert_eq!(next.sequence(), 1);

        // Only buffers the application holds can be reclaimed.
        assert!(matches!(
            pool.reclaim(BufferId::new(2)),
            Err(Error::InvalidTransition(Transition::NotWithConsumer(_)))
        ));
    }

    // ── Re-homing ─────────────────────────────────────────────────────

    #[test]
    fn rehome_puts_busy_ahead_of_idle() {
        let mut pool = queued_pool(4, 0);
        pool.exchange(false, false, 0).unwrap(); // 0 busy
        pool.exchange(false, false, 0).unwrap(); // 1 busy
        pool.rehome_busy();

        let (order, n) = ids(pool.idle());
        assert_eq!(&order[..n], &[0, 1, 2, 3]);
        assert_eq!(pool.counts().busy, 0);
        assert_eq!(pool.state(BufferId::new(1)), Some(BufferState::Idle));
        assert_conserved(&pool, 4);

        // Chain links survive the splice.
        pool.exchange(false, false, 0).unwrap();
        pool.exchange(false, false, 0).unwrap();
        let (order, n) = busy_order(&pool);
        assert_eq!(&order[..n], &[0, 1]);
    }

    #[test]
    fn rehome_with_empty_idle() {
        let mut pool = queued_pool(2, 0);
        pool.exchange(false, false, 0).unwrap();
        pool.exchange(false, false, 0).unwrap();
        pool.rehome_busy();
        let (order, n) = ids(pool.idle());
        assert_eq!(&order[..n], &[0, 1]);
    }

    // ── Conservation under mixed traffic ──────────────────────────────

    #[test]
    fn total_is_conserved() {
        const TOTAL: usize = 6;
        let mut pool = queued_pool(TOTAL, 2);
        let mut held = [None::<BufferId>; TOTAL];
        let mut rng: u32 = 0x1234_5678;

        for step in 0..2000u64 {
            rng = rng.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            match (rng >> 24) % 5 {
                0 => {
                    pool.exchange(false, false, step);
                }
                1 | 2 => {
                    if let Some(b) = pool.exchange(true, (rng & 1) == 1, step) {
                        if b.state() == BufferState::WithConsumer {
                            held[b.id().index()] = Some(b.id());
                        }
                    }
                }
                3 => {
                    if let Some(slot) = held.iter_mut().find(|h| h.is_some()) {
                        let id = slot.take().unwrap();
                        pool.queue(id).unwrap();
                    }
                }
                _ => pool.rehome_busy(),
            }
            assert_conserved(&pool, TOTAL);
        }
    }
}
