//! Bookkeeping for the outer handles that share one inner connection.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::{Result, TelemetryError};

static NEXT_OUTER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one outer [`Connection`](super::Connection) handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OuterId(u64);

impl OuterId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_OUTER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OuterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "outer#{}", self.0)
    }
}

/// Set of outer handles attached to one inner connection.
///
/// The inner connection's data is orphaned once the tracker is closed and
/// its last handle detached. That moment is reported exactly once, either by
/// the [`detach`](Self::detach) that empties a closed tracker or by a
/// [`close`](Self::close) of an already-empty one. From then on nothing can
/// attach.
#[derive(Default)]
pub struct OuterConnectionTracker {
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    attached: HashSet<OuterId>,
    closed: bool,
    orphaned: bool,
}

impl OuterConnectionTracker {
    /// Empty, open tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `outer`. Attaching an already-attached handle is a no-op.
    pub fn attach(&self, outer: OuterId) -> Result<()> {
        let mut state = self.state.lock();
        if state.orphaned {
            return Err(TelemetryError::invalid_operation(
                "connection has been closed and released by all handles",
            ));
        }
        if state.attached.insert(outer) {
            debug!(%outer, attached = state.attached.len(), "Attached outer connection");
        }
        Ok(())
    }

    /// Removes `outer`; returns true when this call orphaned the inner
    /// connection.
    pub fn detach(&self, outer: OuterId) -> bool {
        let mut state = self.state.lock();
        if !state.attached.remove(&outer) {
            return false;
        }
        debug!(%outer, attached = state.attached.len(), "Detached outer connection");
        Self::orphan_if_drained(&mut state)
    }

    /// Detaches every handle; returns true when this call orphaned the inner
    /// connection.
    pub fn detach_all(&self) -> bool {
        let mut state = self.state.lock();
        if state.attached.is_empty() {
            return false;
        }
        state.attached.clear();
        Self::orphan_if_drained(&mut state)
    }

    /// Marks the inner connection closed; returns true when no handle was
    /// attached, so the close itself orphaned it.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        Self::orphan_if_drained(&mut state)
    }

    fn orphan_if_drained(state: &mut TrackerState) -> bool {
        if state.closed && state.attached.is_empty() && !state.orphaned {
            state.orphaned = true;
            return true;
        }
        false
    }

    /// False once the tracker has been closed and drained.
    pub fn can_attach(&self) -> bool {
        !self.state.lock().orphaned
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// True when no handle is attached.
    pub fn is_empty(&self) -> bool {
        self.state.lock().attached.is_empty()
    }

    /// Number of attached handles.
    pub fn attached_count(&self) -> usize {
        self.state.lock().attached.len()
    }

    /// True while `outer` is attached.
    pub fn is_attached(&self, outer: OuterId) -> bool {
        self.state.lock().attached.contains(&outer)
    }
}

impl fmt::Debug for OuterConnectionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OuterConnectionTracker")
            .field("attached", &state.attached.len())
            .field("closed", &state.closed)
            .field("orphaned", &state.orphaned)
            .finish()
    }
}
