//! Record engine: the public-facing persisted-record synchronization unit.
//!
//! One [`RecordEngine`] instance owns one durable key for the lifetime of a
//! context. It keeps an in-memory record synchronized with the durable
//! store, coalesces rapid mutations into infrequent writes, and reconciles
//! foreign updates from other contexts sharing the same key — without a
//! server, without locks, and without dropping the last debounce window of
//! mutations on teardown.
//!
//! # Key properties
//!
//! - **Coalescing**: any burst of `set` calls inside the debounce window
//!   produces exactly one durable write, carrying the last value.
//! - **Self-echo suppression**: notifications caused by this context's own
//!   writes are filtered out via a TTL'd set of recently written values.
//! - **Foreign-update precedence**: an accepted foreign value cancels any
//!   pending local write; the superseded mutation is never written.
//! - **Teardown durability**: tearing down with a pending write performs
//!   exactly one synchronous write of the latest value first.
//!
//! # Cooperative timeline
//!
//! All engine state lives on one logical timeline: `set`/`get` never block,
//! and deferred work (the debounce timer, status decay, queued foreign
//! change events) runs when the owner calls [`pump`](RecordEngine::pump).
//! Hosts that want a background task can hand the engine to
//! [`drive`](RecordEngine::drive), which pumps on a tokio timer until a
//! shutdown signal arrives.
//!
//! Across contexts the model is deliberately weak: last notification
//! observed wins. There is no merge of divergent histories.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::debounce::WriteScheduler;
use crate::echo::EchoFilter;
use crate::error::{FlushError, LoadError, StoreError};
use crate::status::{SaveStatus, StatusTracker};
use crate::store::{ChangeEvent, DurableStore, Subscription};
use crate::validate::{Validation, Validator};

/// Poll interval for [`RecordEngine::drive`] when no timer is armed, chosen
/// to keep foreign-update latency low without busy-waiting.
const DRIVE_IDLE_POLL: Duration = Duration::from_millis(50);

/// Why a record-change callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordChange {
    /// An in-process `set` replaced the record.
    Local,
    /// A validated foreign update (or foreign reset) replaced the record.
    Foreign,
    /// An explicit `reload` replaced the record.
    Reloaded,
}

/// Handle for unsubscribing a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type RecordCallback<T> = Box<dyn Fn(&T, RecordChange) + Send>;
type StatusCallback = Box<dyn Fn(SaveStatus) + Send>;

/// Persisted-record synchronization engine for a single durable key.
pub struct RecordEngine<T> {
    key: String,
    store: Arc<dyn DurableStore>,
    validator: Box<dyn Validator<T>>,
    config: EngineConfig,
    record: T,
    default: T,
    scheduler: WriteScheduler,
    echo: EchoFilter,
    status: StatusTracker,
    sync_flag_until: Option<Instant>,
    changes: Receiver<ChangeEvent>,
    subscription: Option<Subscription>,
    record_subs: Vec<(CallbackId, RecordCallback<T>)>,
    status_subs: Vec<(CallbackId, StatusCallback)>,
    next_callback_id: u64,
    torn_down: bool,
}

impl<T> RecordEngine<T>
where
    T: Serialize + Clone,
{
    /// Open an engine for `key`.
    ///
    /// Subscribes to cross-context changes, then loads and validates the
    /// initial value. On any load failure the engine starts from `default`
    /// and the failure is handed back alongside the engine — it is the
    /// caller's to display, never a crash.
    pub fn open(
        key: impl Into<String>,
        store: Arc<dyn DurableStore>,
        validator: Box<dyn Validator<T>>,
        default: T,
        config: EngineConfig,
    ) -> (Self, Option<LoadError>) {
        let key = key.into();
        let (tx, rx) = mpsc::channel();
        let subscription = store.subscribe(&key, tx);

        let mut load_error = None;
        let record = match store.load(&key) {
            Ok(Some(raw)) => match validator.validate(&raw) {
                Validation::Accepted(value) => value,
                Validation::Rejected(reasons) => {
                    warn!(key = %key, ?reasons, "stored value rejected at load; using default");
                    load_error = Some(LoadError::Rejected { reasons });
                    default.clone()
                }
            },
            Ok(None) => {
                load_error = Some(LoadError::Missing(key.clone()));
                default.clone()
            }
            Err(err) => {
                warn!(key = %key, error = %err, "load failed; using default");
                load_error = Some(LoadError::Store(err));
                default.clone()
            }
        };

        let engine = Self {
            scheduler: WriteScheduler::new(config.debounce_window()),
            echo: EchoFilter::new(config.echo_ttl()),
            status: StatusTracker::new(config.saved_decay()),
            sync_flag_until: None,
            changes: rx,
            subscription: Some(subscription),
            record_subs: Vec::new(),
            status_subs: Vec::new(),
            next_callback_id: 1,
            torn_down: false,
            record,
            default,
            key,
            store,
            validator,
            config,
        };
        (engine, load_error)
    }

    // =========================================================================
    // Read side
    // =========================================================================

    /// The current in-memory record. Never blocks.
    #[must_use]
    pub fn get(&self) -> &T {
        &self.record
    }

    /// The durable key this engine owns.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The timing configuration in effect.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current save status.
    #[must_use]
    pub fn status(&self) -> SaveStatus {
        self.status.status()
    }

    /// Wall-clock time of the last successful write.
    #[must_use]
    pub fn last_saved_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.status.last_saved_at()
    }

    /// Message from the last failed write, while status is `Error`.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.status.last_error()
    }

    /// Whether the record was recently replaced by a foreign update.
    /// Display-only; carries no correctness weight.
    #[must_use]
    pub fn synced_externally(&self) -> bool {
        self.sync_flag_until.is_some()
    }

    /// Whether a debounced write is pending.
    #[must_use]
    pub fn has_pending_write(&self) -> bool {
        self.scheduler.is_pending()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Replace the in-memory record and schedule a debounced durable write.
    pub fn set(&mut self, next: T) -> crate::error::Result<()> {
        self.set_at(next, Instant::now())
    }

    /// [`set`](Self::set) with an explicit timestamp, for deterministic tests
    /// and drivers with their own clock.
    pub fn set_at(&mut self, next: T, now: Instant) -> crate::error::Result<()> {
        let serialized = serde_json::to_string(&next)?;
        self.record = next;
        self.scheduler.schedule(serialized, now);
        self.status.mark_saving();
        self.notify_status();
        self.notify_record(RecordChange::Local);
        Ok(())
    }

    /// Compute the next record from the **current** in-memory record.
    ///
    /// Because writes are debounced and foreign updates can replace the
    /// record at any pump, callers must not capture a stale previous value;
    /// recomputing from the current record at set-time is what prevents lost
    /// updates.
    pub fn set_with(&mut self, f: impl FnOnce(&T) -> T) -> crate::error::Result<()> {
        self.set_with_at(f, Instant::now())
    }

    /// [`set_with`](Self::set_with) with an explicit timestamp.
    pub fn set_with_at(
        &mut self,
        f: impl FnOnce(&T) -> T,
        now: Instant,
    ) -> crate::error::Result<()> {
        let next = f(&self.record);
        self.set_at(next, now)
    }

    /// Dismiss an `Error` status without retrying.
    pub fn clear_error(&mut self) {
        self.status.clear_error();
        self.notify_status();
    }

    // =========================================================================
    // Pumping the cooperative timeline
    // =========================================================================

    /// Run all deferred work that is due at `now`: drain queued foreign
    /// change events, fire a due debounced write, decay the save status and
    /// sync flag, and purge expired echo entries.
    pub fn pump(&mut self, now: Instant) {
        while let Ok(event) = self.changes.try_recv() {
            self.apply_change(event, now);
        }

        if let Some(serialized) = self.scheduler.take_due(now) {
            self.write(&serialized, now);
        }

        if self.status.tick(now) {
            self.notify_status();
        }
        if self.sync_flag_until.is_some_and(|until| now >= until) {
            self.sync_flag_until = None;
        }
        self.echo.purge(now);
    }

    /// The earliest armed timer, for drivers scheduling the next pump.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.scheduler.deadline(),
            self.status.decay_deadline(),
            self.sync_flag_until,
            self.echo.next_expiry(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Pump the engine on a tokio timer until `shutdown` flips to `true` (or
    /// its sender is dropped), then tear down.
    ///
    /// Foreign change events arrive over a plain queue with no async wakeup,
    /// so the loop polls at least every 50 ms even when no timer is armed.
    pub async fn drive(
        &mut self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Result<bool, StoreError> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = Instant::now();
            let sleep_for = self
                .next_deadline()
                .map_or(DRIVE_IDLE_POLL, |deadline| {
                    deadline.saturating_duration_since(now).min(DRIVE_IDLE_POLL)
                });
            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            self.pump(Instant::now());
        }
        self.teardown()
    }

    // =========================================================================
    // Flush / reload / teardown
    // =========================================================================

    /// Write the pending value now, bypassing the debounce window, and verify
    /// durability by reading the key back and comparing serialized equality.
    ///
    /// With no write pending: if the last write failed, the current record is
    /// serialized and written as the retry; otherwise this is a no-op
    /// returning `Ok(false)`.
    ///
    /// A read-back mismatch is [`FlushError::VerificationFailed`] — the write
    /// was acknowledged but the durable state diverged, which points at a
    /// racing context. Callers should `reload()` to resolve from the
    /// authoritative durable value.
    pub fn flush(&mut self) -> Result<bool, FlushError> {
        self.flush_at(Instant::now())
    }

    /// [`flush`](Self::flush) with an explicit timestamp.
    pub fn flush_at(&mut self, now: Instant) -> Result<bool, FlushError> {
        let serialized = match self.scheduler.take_pending() {
            Some(pending) => pending,
            None if self.status.status() == SaveStatus::Error => {
                match serde_json::to_string(&self.record) {
                    Ok(serialized) => serialized,
                    Err(err) => {
                        return Err(FlushError::Save(StoreError::Io {
                            key: self.key.clone(),
                            detail: format!("serialization failed: {err}"),
                        }));
                    }
                }
            }
            None => return Ok(false),
        };

        if let Err(err) = self.store.save(&self.key, &serialized) {
            warn!(key = %self.key, error = %err, "flush write failed");
            self.status.mark_error(err.to_string());
            self.notify_status();
            return Err(FlushError::Save(err));
        }
        self.echo.remember(&serialized, now);

        match self.store.load(&self.key) {
            Ok(Some(durable)) if durable == serialized => {
                debug!(key = %self.key, "verified flush");
                self.status.mark_saved(now);
                self.notify_status();
                Ok(true)
            }
            Ok(_) => {
                warn!(key = %self.key, "flush verification failed: durable value diverged");
                let err = FlushError::VerificationFailed {
                    key: self.key.clone(),
                };
                self.status.mark_error(err.to_string());
                self.notify_status();
                Err(err)
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "flush read-back failed");
                self.status.mark_error(err.to_string());
                self.notify_status();
                Err(FlushError::ReadBack(err))
            }
        }
    }

    /// Discard the in-memory record and re-load from the durable store,
    /// cancelling any pending write. Falls back to the default record when
    /// the key is missing or the stored value is rejected; the failure is
    /// returned for display.
    pub fn reload(&mut self) -> Result<(), LoadError> {
        self.scheduler.cancel();
        self.status.force_idle();

        let outcome = match self.store.load(&self.key) {
            Ok(Some(raw)) => match self.validator.validate(&raw) {
                Validation::Accepted(value) => {
                    self.record = value;
                    Ok(())
                }
                Validation::Rejected(reasons) => {
                    warn!(key = %self.key, ?reasons, "stored value rejected on reload; using default");
                    self.record = self.default.clone();
                    Err(LoadError::Rejected { reasons })
                }
            },
            Ok(None) => {
                self.record = self.default.clone();
                Err(LoadError::Missing(self.key.clone()))
            }
            Err(err) => {
                self.record = self.default.clone();
                Err(LoadError::Store(err))
            }
        };

        self.notify_status();
        self.notify_record(RecordChange::Reloaded);
        outcome
    }

    /// Flush any pending write synchronously and detach the store
    /// subscription. Idempotent; also runs on drop as a safety net, so
    /// process exit never silently drops the last debounce window of
    /// mutations.
    ///
    /// Queued change events are drained first: a foreign update that
    /// already arrived still cancels the pending write, so a superseded
    /// local value is never flushed over the newer durable one.
    ///
    /// Returns whether a write was flushed.
    pub fn teardown(&mut self) -> Result<bool, StoreError> {
        if self.torn_down {
            return Ok(false);
        }
        let now = Instant::now();
        while let Ok(event) = self.changes.try_recv() {
            self.apply_change(event, now);
        }
        self.torn_down = true;

        let flushed = match self.scheduler.take_pending() {
            None => Ok(false),
            Some(serialized) => match self.store.save(&self.key, &serialized) {
                Ok(()) => {
                    let now = Instant::now();
                    self.echo.remember(&serialized, now);
                    self.status.mark_saved(now);
                    self.notify_status();
                    Ok(true)
                }
                Err(err) => {
                    warn!(key = %self.key, error = %err, "teardown flush failed");
                    self.status.mark_error(err.to_string());
                    self.notify_status();
                    Err(err)
                }
            },
        };

        self.subscription.take();
        flushed
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Register a callback invoked whenever the record is replaced.
    pub fn subscribe_record(
        &mut self,
        callback: impl Fn(&T, RecordChange) + Send + 'static,
    ) -> CallbackId {
        let id = self.alloc_callback_id();
        self.record_subs.push((id, Box::new(callback)));
        id
    }

    /// Register a callback invoked on every save-status change.
    pub fn subscribe_status(
        &mut self,
        callback: impl Fn(SaveStatus) + Send + 'static,
    ) -> CallbackId {
        let id = self.alloc_callback_id();
        self.status_subs.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback registered with either subscribe method.
    /// Returns whether anything was removed.
    pub fn unsubscribe(&mut self, id: CallbackId) -> bool {
        let before = self.record_subs.len() + self.status_subs.len();
        self.record_subs.retain(|(cb_id, _)| *cb_id != id);
        self.status_subs.retain(|(cb_id, _)| *cb_id != id);
        before != self.record_subs.len() + self.status_subs.len()
    }

    // =========================================================================
    // Cross-context listener
    // =========================================================================

    fn apply_change(&mut self, event: ChangeEvent, now: Instant) {
        if event.key != self.key {
            return;
        }

        match event.value {
            // Key cleared externally: treat as a foreign reset.
            None => {
                self.scheduler.cancel();
                self.record = match self.store.load(&self.key) {
                    Ok(Some(raw)) => match self.validator.validate(&raw) {
                        Validation::Accepted(value) => value,
                        Validation::Rejected(_) => self.default.clone(),
                    },
                    _ => self.default.clone(),
                };
                self.sync_flag_until = Some(now + self.config.sync_flag_window());
                self.status.force_idle();
                self.notify_status();
                self.notify_record(RecordChange::Foreign);
            }
            Some(raw) => {
                if self.echo.observe(&raw, now) {
                    debug!(key = %self.key, "suppressed self-echo notification");
                    return;
                }
                match self.validator.validate(&raw) {
                    Validation::Rejected(reasons) => {
                        // Foreign data must never corrupt local state.
                        warn!(key = %self.key, ?reasons, "rejected foreign update");
                    }
                    Validation::Accepted(value) => {
                        self.scheduler.cancel();
                        self.record = value;
                        self.sync_flag_until = Some(now + self.config.sync_flag_window());
                        // The foreign value is already durable; nothing to
                        // report through the save-status machine.
                        self.status.force_idle();
                        self.notify_status();
                        self.notify_record(RecordChange::Foreign);
                    }
                }
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn write(&mut self, serialized: &str, now: Instant) {
        match self.store.save(&self.key, serialized) {
            Ok(()) => {
                debug!(key = %self.key, bytes = serialized.len(), "debounced write fired");
                self.echo.remember(serialized, now);
                self.status.mark_saved(now);
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "debounced write failed");
                self.status.mark_error(err.to_string());
            }
        }
        self.notify_status();
    }

    fn alloc_callback_id(&mut self) -> CallbackId {
        let id = CallbackId(self.next_callback_id);
        self.next_callback_id += 1;
        id
    }

    fn notify_record(&self, change: RecordChange) {
        for (_, callback) in &self.record_subs {
            callback(&self.record, change);
        }
    }

    fn notify_status(&self) {
        let status = self.status.status();
        for (_, callback) in &self.status_subs {
            callback(status);
        }
    }
}

impl<T> Drop for RecordEngine<T> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        // Same precedence rule as `teardown`, without touching the record:
        // an accepted foreign update (or reset) that already arrived cancels
        // the pending write instead of being overwritten by it.
        let now = Instant::now();
        while let Ok(event) = self.changes.try_recv() {
            if event.key != self.key {
                continue;
            }
            match event.value {
                None => self.scheduler.cancel(),
                Some(raw) => {
                    if !self.echo.observe(&raw, now)
                        && self.validator.validate(&raw).is_accepted()
                    {
                        self.scheduler.cancel();
                    }
                }
            }
        }
        if let Some(serialized) = self.scheduler.take_pending() {
            if let Err(err) = self.store.save(&self.key, &serialized) {
                warn!(key = %self.key, error = %err, "drop-time flush failed");
            }
        }
    }
}

impl<T> std::fmt::Debug for RecordEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordEngine")
            .field("key", &self.key)
            .field("status", &self.status.status())
            .field("pending", &self.scheduler.is_pending())
            .field("synced_externally", &self.sync_flag_until.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
