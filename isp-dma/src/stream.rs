//! Reference-counted stream state.
//!
//! Each port and the pipeline as a whole run the same state machine:
//!
//! ```text
//!            acquire() 0→1               settle()
//! Stopped ──────────────────► Starting ────────────► Streaming
//!    ▲                                                   │
//!    │ settle()                            release() 1→0 │
//!    └──────────────────────── Stopping ◄────────────────┘
//! ```
//!
//! Only the 0→1 and 1→0 edges are reported to the caller; those are the
//! points where hardware is enabled or disabled. Every other acquire or
//! release only moves the counter.

use crate::constants::{MAX_CONSECUTIVE_TIMEOUTS, PORT_COUNT};
use crate::port::PortId;

/// Stream state of a port or of the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Stopped,
    Starting,
    Streaming,
    Stopping,
}

/// What a reference count applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Pipeline power: held by every streaming port.
    Global,
    Port(PortId),
}

#[derive(Debug, Clone, Copy)]
struct Refcount {
    count: u32,
    state: StreamState,
}

impl Refcount {
    const STOPPED: Refcount = Refcount {
        count: 0,
        state: StreamState::Stopped,
    };
}

/// Reference counts and states for every port plus the global scope.
pub struct StreamController {
    global: Refcount,
    ports: [Refcount; PORT_COUNT],
    timeouts: u32,
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController {
    pub const fn new() -> Self {
        StreamController {
            global: Refcount::STOPPED,
            ports: [Refcount::STOPPED; PORT_COUNT],
            timeouts: 0,
        }
    }

    fn slot(&mut self, scope: Scope) -> &mut Refcount {
        match scope {
            Scope::Global => &mut self.global,
            Scope::Port(p) => &mut self.ports[p.index()],
        }
    }

    fn get(&self, scope: Scope) -> Refcount {
        match scope {
            Scope::Global => self.global,
            Scope::Port(p) => self.ports[p.index()],
        }
    }

    pub fn state(&self, scope: Scope) -> StreamState {
        self.get(scope).state
    }

    pub fn refcount(&self, scope: Scope) -> u32 {
        self.get(scope).count
    }

    /// Take a reference. Returns `true` on the 0→1 edge, after which the
    /// scope is `Starting` until [`settle()`](Self::settle).
    pub fn acquire(&mut self, scope: Scope) -> bool {
        let rc = self.slot(scope);
        rc.count += 1;
        if rc.count == 1 {
            rc.state = StreamState::Starting;
            true
        } else {
            false
        }
    }

    /// Drop a reference. Returns `true` on the 1→0 edge, after which the
    /// scope is `Stopping` until [`settle()`](Self::settle). Releasing at
    /// zero does nothing.
    pub fn release(&mut self, scope: Scope) -> bool {
        let rc = self.slot(scope);
        match rc.count {
            0 => false,
            1 => {
                rc.count = 0;
                rc.state = StreamState::Stopping;
                true
            }
            _ => {
                rc.count -= 1;
                false
            }
        }
    }

    /// Finish a transition: `Starting` becomes `Streaming`, `Stopping`
    /// becomes `Stopped`.
    pub fn settle(&mut self, scope: Scope) {
        let rc = self.slot(scope);
        rc.state = if rc.count > 0 {
            StreamState::Streaming
        } else {
            StreamState::Stopped
        };
    }

    /// Force a scope to `Stopped` regardless of its count. Returns the
    /// count that was dropped.
    pub fn abort(&mut self, scope: Scope) -> u32 {
        let rc = self.slot(scope);
        let dropped = rc.count;
        *rc = Refcount::STOPPED;
        dropped
    }

    /// Record a stop timeout. Returns `true` once enough consecutive
    /// timeouts have accumulated that everything must be forced down.
    pub fn record_timeout(&mut self) -> bool {
        self.timeouts += 1;
        if self.timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
            self.timeouts = 0;
            return true;
        }
        false
    }

    pub fn clear_timeouts(&mut self) {
        self.timeouts = 0;
    }
}
