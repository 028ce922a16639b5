//! plotsync-core: Local persisted-record synchronization engine
//!
//! This crate keeps an in-memory record synchronized with a local durable
//! store across multiple concurrent contexts (tabs, windows, processes)
//! sharing the same key — no server, no merge, last write wins.
//!
//! # Architecture
//!
//! ```text
//! set() → WriteScheduler (debounce) → DurableStore → other contexts
//!             ↓                            ↓
//!        StatusTracker              ChangeEvent queue
//!                                         ↓
//!                            EchoFilter → Validator → record
//! ```
//!
//! # Modules
//!
//! - `engine`: [`engine::RecordEngine`], the per-key composition root
//! - `store`: Durable store contract, change hub, in-memory reference store
//! - `file_store`: Filesystem-backed store (one file per key, atomic writes)
//! - `debounce`: Write coalescing
//! - `echo`: Self-echo suppression for change notifications
//! - `validate`: Validation pipeline for values arriving from the store
//! - `status`: Save-status state machine
//! - `domain`: The allotment record payload and its schema validator
//! - `config`: Engine timing configuration
//! - `logging`: Structured logging setup
//! - `error`: Error taxonomy
//!
//! # Safety
//!
//! This crate forbids unsafe code.

pub mod config;
pub mod debounce;
pub mod domain;
pub mod echo;
pub mod engine;
pub mod error;
pub mod file_store;
pub mod logging;
pub mod status;
pub mod store;
pub mod validate;

pub use config::EngineConfig;
pub use engine::{CallbackId, RecordChange, RecordEngine};
pub use error::{Error, FlushError, LoadError, Result, StoreError};
pub use file_store::FileStore;
pub use status::SaveStatus;
pub use store::{ChangeEvent, DurableStore, MemoryStore, Subscription};
pub use validate::{SchemaValidator, Validation, Validator};
