//! Debounced write scheduling.
//!
//! A burst of rapid mutations becomes one durable write: each `schedule`
//! overwrites the pending value and re-arms the deadline, so only the final
//! state at flush time is persisted. Intermediate states inside the window
//! are deliberately never written.
//!
//! The scheduler is a passive timer: callers pass `Instant`s explicitly and
//! collect due work via [`take_due`](WriteScheduler::take_due), which keeps
//! every state change on the engine's single cooperative timeline and makes
//! the component deterministic under test.

use std::time::{Duration, Instant};

/// The most recent not-yet-durable value plus its armed deadline.
#[derive(Debug, Clone)]
struct PendingWrite {
    serialized: String,
    deadline: Instant,
}

/// Coalesces rapid mutations into a single deferred write.
///
/// Invariant: a pending value exists iff a deadline is armed. `cancel` clears
/// both together; there is no state where a timer fires with nothing to
/// write.
#[derive(Debug)]
pub struct WriteScheduler {
    window: Duration,
    pending: Option<PendingWrite>,
}

impl WriteScheduler {
    /// Create a scheduler with the given debounce window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
        }
    }

    /// Record `serialized` as the value to write and re-arm the deadline to
    /// `now + window`. Any previously pending value is overwritten.
    pub fn schedule(&mut self, serialized: String, now: Instant) {
        self.pending = Some(PendingWrite {
            serialized,
            deadline: now + self.window,
        });
    }

    /// Clear the timer and pending value with no side effects.
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// Whether a write is pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// The armed deadline, if a write is pending.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Hand back the pending value if its deadline has passed, disarming the
    /// timer. Returns `None` while still inside the quiet window.
    pub fn take_due(&mut self, now: Instant) -> Option<String> {
        if self.pending.as_ref().is_some_and(|p| now >= p.deadline) {
            self.pending.take().map(|p| p.serialized)
        } else {
            None
        }
    }

    /// Hand back the pending value regardless of the deadline, disarming the
    /// timer. Used by flush and teardown paths that bypass the window.
    pub fn take_pending(&mut self) -> Option<String> {
        self.pending.take().map(|p| p.serialized)
    }
}
