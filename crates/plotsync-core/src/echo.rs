//! Recent-write echo filter.
//!
//! Distinguishes "the store changed because I changed it" from "the store
//! changed because another context changed it". Values this context just
//! wrote are remembered for a short TTL; when a change notification arrives
//! carrying a remembered value, it is an echo of our own write and must not
//! be treated as a foreign update.
//!
//! A TTL-based set is used instead of a single just-wrote flag because
//! multiple writes can be in flight across the debounce/flush boundary; a
//! lone boolean gets stomped by overlapping write/notify timings. The set
//! bounds memory but does not fully close the race where two *different*
//! values round-trip through the store faster than the notification arrives —
//! that is an accepted limitation (closing it would need sequence numbers the
//! store does not provide).
//!
//! Membership is keyed on the **serialized** form, digested with SHA-256,
//! because the notification channel only carries serialized data.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

type ValueDigest = [u8; 32];

fn digest(serialized: &str) -> ValueDigest {
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hasher.finalize().into()
}

/// Short-lived record of values this context recently wrote.
#[derive(Debug)]
pub struct EchoFilter {
    ttl: Duration,
    entries: HashMap<ValueDigest, Instant>,
}

impl EchoFilter {
    /// Create a filter whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Remember a value written at `now`. Re-remembering the same value
    /// extends its TTL.
    pub fn remember(&mut self, serialized: &str, now: Instant) {
        self.entries.insert(digest(serialized), now + self.ttl);
    }

    /// Check whether `serialized` is an echo of a recent write. A live entry
    /// is consumed by the observation; expired entries are discarded.
    pub fn observe(&mut self, serialized: &str, now: Instant) -> bool {
        match self.entries.remove(&digest(serialized)) {
            Some(expiry) => now <= expiry,
            None => false,
        }
    }

    /// Drop entries whose TTL has lapsed.
    pub fn purge(&mut self, now: Instant) {
        self.entries.retain(|_, expiry| now <= *expiry);
    }

    /// Earliest entry expiry, for drivers scheduling housekeeping.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.values().min().copied()
    }

    /// Number of live entries (including not-yet-purged expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the filter holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
