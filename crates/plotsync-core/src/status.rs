//! Save-status state machine.
//!
//! The single channel through which persistence health reaches the UI layer.
//! Transitions:
//!
//! ```text
//! idle --mutate--> saving --success--> saved --decay(2s)--> idle
//!                    |
//!                    +-----failure--> error --mutate--> saving
//!                                       |
//!                                       +---clear---> idle
//! ```
//!
//! Foreign updates bypass the machine entirely by forcing `idle`: the
//! foreign value is already durable, so there is nothing to report.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transient persistence status. Not persisted itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    /// No write scheduled or in flight.
    #[default]
    Idle,
    /// A write is scheduled or in flight.
    Saving,
    /// The last write succeeded. Decays back to `Idle`.
    Saved,
    /// The last write failed. Persists until cleared or a new write starts.
    Error,
}

/// Tracks [`SaveStatus`] plus the last-success timestamp and last failure
/// message.
#[derive(Debug)]
pub struct StatusTracker {
    status: SaveStatus,
    decay: Duration,
    saved_until: Option<Instant>,
    last_saved_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl StatusTracker {
    /// Create a tracker whose `Saved` status decays after `decay`.
    #[must_use]
    pub fn new(decay: Duration) -> Self {
        Self {
            status: SaveStatus::Idle,
            decay,
            saved_until: None,
            last_saved_at: None,
            last_error: None,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SaveStatus {
        self.status
    }

    /// Wall-clock time of the last successful write.
    #[must_use]
    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    /// Message from the last failed write, if the last write failed.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// A write was scheduled. Valid from any state; retrying after an error
    /// is just a new write.
    pub fn mark_saving(&mut self) {
        self.status = SaveStatus::Saving;
        self.saved_until = None;
    }

    /// The write settled successfully.
    pub fn mark_saved(&mut self, now: Instant) {
        self.status = SaveStatus::Saved;
        self.saved_until = Some(now + self.decay);
        self.last_saved_at = Some(Utc::now());
        self.last_error = None;
    }

    /// The write settled with a failure.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = SaveStatus::Error;
        self.saved_until = None;
        self.last_error = Some(message.into());
    }

    /// Explicit user dismissal of an error.
    pub fn clear_error(&mut self) {
        if self.status == SaveStatus::Error {
            self.status = SaveStatus::Idle;
        }
        self.last_error = None;
    }

    /// A foreign update superseded any local write; there is nothing to
    /// report. Clears a stale error as well: the durable state is healthy.
    pub fn force_idle(&mut self) {
        self.status = SaveStatus::Idle;
        self.saved_until = None;
        self.last_error = None;
    }

    /// Decay `Saved` back to `Idle` once its display window lapses.
    /// Returns `true` if the status changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.status == SaveStatus::Saved
            && self.saved_until.is_some_and(|until| now >= until)
        {
            self.status = SaveStatus::Idle;
            self.saved_until = None;
            return true;
        }
        false
    }

    /// When the `Saved` display window lapses, for drivers.
    #[must_use]
    pub fn decay_deadline(&self) -> Option<Instant> {
        if self.status == SaveStatus::Saved {
            self.saved_until
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECAY: Duration = Duration::from_millis(2_000);

    #[test]
    fn starts_idle() {
        let tracker = StatusTracker::new(DECAY);
        assert_eq!(tracker.status(), SaveStatus::Idle);
        assert_eq!(tracker.last_saved_at(), None);
        assert_eq!(tracker.last_error(), None);
    }

    #[test]
    fn mutate_then_success_then_decay() {
        let t0 = Instant::now();
        let mut tracker = StatusTracker::new(DECAY);

        tracker.mark_saving();
        assert_eq!(tracker.status(), SaveStatus::Saving);

        tracker.mark_saved(t0);
        assert_eq!(tracker.status(), SaveStatus::Saved);
        assert!(tracker.last_saved_at().is_some());

        // Inside the display window: no change.
        assert!(!tracker.tick(t0 + Duration::from_millis(1_999)));
        assert_eq!(tracker.status(), SaveStatus::Saved);

        // Window lapsed: decays to idle.
        assert!(tracker.tick(t0 + DECAY));
        assert_eq!(tracker.status(), SaveStatus::Idle);
    }

    #[test]
    fn failure_persists_until_cleared() {
        let t0 = Instant::now();
        let mut tracker = StatusTracker::new(DECAY);
        tracker.mark_saving();
        tracker.mark_error("quota exceeded");

        assert_eq!(tracker.status(), SaveStatus::Error);
        assert_eq!(tracker.last_error(), Some("quota exceeded"));

        // Error does not decay.
        assert!(!tracker.tick(t0 + Duration::from_secs(60)));
        assert_eq!(tracker.status(), SaveStatus::Error);

        tracker.clear_error();
        assert_eq!(tracker.status(), SaveStatus::Idle);
        assert_eq!(tracker.last_error(), None);
    }

    #[test]
    fn retry_after_error_is_a_new_write() {
        let t0 = Instant::now();
        let mut tracker = StatusTracker::new(DECAY);
        tracker.mark_saving();
        tracker.mark_error("disk full");

        tracker.mark_saving();
        assert_eq!(tracker.status(), SaveStatus::Saving);
        // The old message survives until the retry settles.
        assert_eq!(tracker.last_error(), Some("disk full"));

        tracker.mark_saved(t0);
        assert_eq!(tracker.status(), SaveStatus::Saved);
        assert_eq!(tracker.last_error(), None);
    }

    #[test]
    fn force_idle_clears_everything_transient() {
        let t0 = Instant::now();
        let mut tracker = StatusTracker::new(DECAY);
        tracker.mark_saving();
        tracker.mark_error("lock contention");

        tracker.force_idle();
        assert_eq!(tracker.status(), SaveStatus::Idle);
        assert_eq!(tracker.last_error(), None);
        assert!(!tracker.tick(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn decay_deadline_only_while_saved() {
        let t0 = Instant::now();
        let mut tracker = StatusTracker::new(DECAY);
        assert_eq!(tracker.decay_deadline(), None);

        tracker.mark_saved(t0);
        assert_eq!(tracker.decay_deadline(), Some(t0 + DECAY));

        tracker.mark_saving();
        assert_eq!(tracker.decay_deadline(), None);
    }

    #[test]
    fn status_serde_roundtrip() {
        for status in [
            SaveStatus::Idle,
            SaveStatus::Saving,
            SaveStatus::Saved,
            SaveStatus::Error,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            let parsed: SaveStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(serde_json::to_string(&SaveStatus::Saving).unwrap(), "\"saving\"");
    }
}
