//! Error types for plotsync-core
//!
//! The taxonomy keeps "no data", "bad data", "write refused", and "write
//! landed but diverged" as distinct kinds so callers can react differently
//! to each. All engine entry points return typed results; nothing inside the
//! debounce timer or the cross-context listener panics.

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for plotsync-core
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store errors
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Initial-load / reload errors
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// Verified-flush errors
    #[error("flush error: {0}")]
    Flush(#[from] FlushError),

    /// Configuration errors
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by a [`crate::store::DurableStore`] implementation.
///
/// Details are carried as strings rather than source errors so the type stays
/// `Clone` — the engine keeps the last failure message around for the
/// save-status channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store refused the write because it is full.
    #[error("capacity exceeded for key `{key}`: {detail}")]
    CapacityExceeded {
        /// Durable key being written.
        key: String,
        /// Store-specific detail (quota, byte counts).
        detail: String,
    },

    /// The store refused access to the key.
    #[error("access denied for key `{key}`: {detail}")]
    AccessDenied {
        /// Durable key being accessed.
        key: String,
        /// Store-specific detail.
        detail: String,
    },

    /// Underlying I/O failure (filesystem, lock acquisition).
    #[error("I/O failure for key `{key}`: {detail}")]
    Io {
        /// Durable key being accessed.
        key: String,
        /// Rendered I/O error.
        detail: String,
    },
}

impl StoreError {
    pub(crate) fn io(key: &str, err: &std::io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            detail: err.to_string(),
        }
    }
}

/// Failure to produce a usable record from the durable store.
///
/// The engine never propagates these as panics: on any load failure it falls
/// back to the domain-supplied default record and hands the error to the
/// caller for display.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// No value stored under the key. Normal for first-run contexts.
    #[error("no value stored under key `{0}`")]
    Missing(String),

    /// The store itself failed to read.
    #[error("store read failed: {0}")]
    Store(#[from] StoreError),

    /// The stored value was decoded but rejected by the validator.
    #[error("stored value rejected: {}", reasons.join("; "))]
    Rejected {
        /// Human-readable rejection reasons from the validator.
        reasons: Vec<String>,
    },
}

/// Failure of a verified flush.
///
/// `VerificationFailed` is deliberately distinct from `Save`: the write was
/// acknowledged but the durable value does not match what was written, which
/// points at a racing context rather than an I/O fault. The recommended
/// caller action is `reload()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlushError {
    /// The underlying store rejected the write.
    #[error("write failed: {0}")]
    Save(#[from] StoreError),

    /// The write was acknowledged but the read-back diverged.
    #[error("write verification failed for key `{key}`: durable value diverged from written value")]
    VerificationFailed {
        /// Durable key whose read-back diverged.
        key: String,
    },

    /// The verification read itself failed.
    #[error("read-back after write failed: {0}")]
    ReadBack(StoreError),
}
