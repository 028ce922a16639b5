//! Durable store adapter contract and the in-memory reference implementation.
//!
//! A [`DurableStore`] is an opaque string-keyed store with one extra duty: a
//! side-channel broadcast of changes to *other* contexts sharing the same
//! key. A context never receives notifications for its own writes — that is
//! a property the engine depends on at this layer, while echo suppression
//! for values that round-trip through a genuinely shared medium is handled
//! above it by the engine's echo filter.
//!
//! # Key properties
//!
//! - **Atomic per key**: `load`/`save` never expose a partially written value.
//! - **Explicit subscriptions**: [`subscribe`](DurableStore::subscribe)
//!   returns a [`Subscription`] disposer, so teardown can detach listeners
//!   deterministically instead of leaning on host-runtime lifecycle.
//! - **Queue delivery**: change events are delivered into an `mpsc` sender
//!   rather than invoked as callbacks, keeping all engine state mutation on
//!   the engine's own cooperative timeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, Weak};

use crate::error::StoreError;

// =============================================================================
// Contract
// =============================================================================

/// A change to a durable key observed from another context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The durable key that changed.
    pub key: String,
    /// The new raw value, or `None` if the key was cleared.
    pub value: Option<String>,
}

/// String-keyed durable store with cross-context change notification.
pub trait DurableStore: Send + Sync {
    /// Read the current value for `key`. `Ok(None)` means no value stored.
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Durably write `value` under `key`.
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Register `tx` to receive [`ChangeEvent`]s for `key` caused by **other**
    /// contexts. Writes through this handle never echo back through `tx`.
    fn subscribe(&self, key: &str, tx: Sender<ChangeEvent>) -> Subscription;
}

// =============================================================================
// Notification hub
// =============================================================================

struct Listener {
    id: u64,
    key: String,
    context: u64,
    tx: Sender<ChangeEvent>,
}

/// Shared fan-out point for change notifications.
///
/// Store implementations embed one hub per shared medium. Each context handle
/// broadcasts with its own context id; the hub skips listeners registered by
/// the same context, which is what gives adapters the "no self notification"
/// property the engine contract requires.
pub struct ChangeHub {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl ChangeHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Attach a listener for `key` on behalf of `context`.
    pub fn attach(self: &Arc<Self>, key: &str, context: u64, tx: Sender<ChangeEvent>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        listeners.push(Listener {
            id,
            key: key.to_string(),
            context,
            tx,
        });
        Subscription {
            hub: Arc::downgrade(self),
            id,
        }
    }

    /// Deliver `event` to every listener on the same key from a different
    /// context. Listeners whose receiver has been dropped are pruned.
    pub fn broadcast(&self, origin_context: u64, event: &ChangeEvent) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        listeners.retain(|listener| {
            if listener.key != event.key || listener.context == origin_context {
                return true;
            }
            listener.tx.send(event.clone()).is_ok()
        });
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    fn detach(&self, id: u64) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        listeners.retain(|listener| listener.id != id);
    }
}

/// Disposer for a store subscription. Dropping it detaches the listener.
pub struct Subscription {
    hub: Weak<ChangeHub>,
    id: u64,
}

impl Subscription {
    /// Detach the listener now. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// =============================================================================
// In-memory store
// =============================================================================

struct MemoryShared {
    values: Mutex<HashMap<String, String>>,
    hub: Arc<ChangeHub>,
    next_context: AtomicU64,
    capacity_bytes: Option<usize>,
    saves: AtomicU64,
    /// Fault-injection hook: acknowledge writes but drop the last byte, so
    /// read-back diverges from what was written.
    truncate_writes: std::sync::atomic::AtomicBool,
}

/// In-memory [`DurableStore`] where each handle is a distinct context.
///
/// [`new_context`](MemoryStore::new_context) clones a handle onto the same
/// underlying map, modelling a second browser tab or process sharing one
/// durable key. Used as the reference adapter in tests.
pub struct MemoryStore {
    shared: Arc<MemoryShared>,
    context_id: u64,
}

impl MemoryStore {
    /// Create a fresh store with unlimited capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// Create a store that rejects values larger than `capacity_bytes`.
    #[must_use]
    pub fn with_capacity(capacity_bytes: Option<usize>) -> Self {
        Self {
            shared: Arc::new(MemoryShared {
                values: Mutex::new(HashMap::new()),
                hub: ChangeHub::new(),
                next_context: AtomicU64::new(2),
                capacity_bytes,
                saves: AtomicU64::new(0),
                truncate_writes: std::sync::atomic::AtomicBool::new(false),
            }),
            context_id: 1,
        }
    }

    /// Open another context onto the same underlying store.
    #[must_use]
    pub fn new_context(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            context_id: self.shared.next_context.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// The id distinguishing this handle from other contexts.
    #[must_use]
    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    /// Total number of acknowledged saves across all contexts.
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.shared.saves.load(Ordering::Relaxed)
    }

    /// Fault-injection hook for tests: when enabled, `save` acknowledges the
    /// write but stores the value with its last byte dropped.
    pub fn truncate_writes(&self, enabled: bool) {
        self.shared
            .truncate_writes
            .store(enabled, Ordering::Relaxed);
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.shared.values.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(capacity) = self.shared.capacity_bytes {
            if value.len() > capacity {
                return Err(StoreError::CapacityExceeded {
                    key: key.to_string(),
                    detail: format!("value is {} bytes, capacity is {capacity}", value.len()),
                });
            }
        }

        let stored = if self.shared.truncate_writes.load(Ordering::Relaxed) {
            let mut truncated = value.to_string();
            truncated.pop();
            truncated
        } else {
            value.to_string()
        };

        self.values().insert(key.to_string(), stored.clone());
        self.shared.saves.fetch_add(1, Ordering::Relaxed);
        self.shared.hub.broadcast(
            self.context_id,
            &ChangeEvent {
                key: key.to_string(),
                value: Some(stored),
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.values().remove(key).is_some();
        if removed {
            self.shared.hub.broadcast(
                self.context_id,
                &ChangeEvent {
                    key: key.to_string(),
                    value: None,
                },
            );
        }
        Ok(())
    }

    fn subscribe(&self, key: &str, tx: Sender<ChangeEvent>) -> Subscription {
        self.shared.hub.attach(key, self.context_id, tx)
    }
}

// =============================================================================
// Tests
// =============================================================================
