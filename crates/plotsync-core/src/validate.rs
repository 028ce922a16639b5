//! Validation pipeline for raw durable values.
//!
//! Foreign contexts are untrusted relative to schema drift — a newer or older
//! build may be writing the same key — so every value arriving from the store
//! (initial load, foreign notification) passes through a [`Validator`] before
//! it can touch the in-memory record. Values the engine itself writes are
//! never re-validated: they were only ever produced from validated or freshly
//! constructed data.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

/// Outcome of validating a raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation<T> {
    /// The value decoded and passed all checks.
    Accepted(T),
    /// The value was rejected; reasons are human-readable diagnostics.
    Rejected(Vec<String>),
}

impl<T> Validation<T> {
    /// Whether this outcome is `Accepted`.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// Convert into a `Result`, surfacing rejection reasons as the error.
    pub fn into_result(self) -> Result<T, Vec<String>> {
        match self {
            Self::Accepted(value) => Ok(value),
            Self::Rejected(reasons) => Err(reasons),
        }
    }
}

/// Pure, deterministic accept/reject check over raw decoded input.
pub trait Validator<T>: Send + Sync {
    /// Validate `raw`, producing the decoded value or rejection diagnostics.
    fn validate(&self, raw: &str) -> Validation<T>;
}

impl<T, F> Validator<T> for F
where
    F: Fn(&str) -> Validation<T> + Send + Sync,
{
    fn validate(&self, raw: &str) -> Validation<T> {
        self(raw)
    }
}

/// Serde-based validator with a version-field gate.
///
/// Expects the raw value to be a JSON object carrying an integer `version`
/// field within `[min_version, max_version]`; the payload is then decoded
/// into `T`. Versions outside the window are rejected rather than decoded,
/// so a record written by an incompatible build never reaches the engine.
pub struct SchemaValidator<T> {
    min_version: u64,
    max_version: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SchemaValidator<T> {
    /// Accept versions in `[min_version, max_version]` inclusive.
    #[must_use]
    pub fn new(min_version: u64, max_version: u64) -> Self {
        Self {
            min_version,
            max_version,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Validator<T> for SchemaValidator<T> {
    fn validate(&self, raw: &str) -> Validation<T> {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => return Validation::Rejected(vec![format!("not valid JSON: {err}")]),
        };

        let Some(object) = value.as_object() else {
            return Validation::Rejected(vec!["expected a JSON object".into()]);
        };

        let Some(version) = object.get("version").and_then(serde_json::Value::as_u64) else {
            return Validation::Rejected(vec!["missing or non-integer `version` field".into()]);
        };

        if version < self.min_version || version > self.max_version {
            return Validation::Rejected(vec![format!(
                "unsupported version {version} (supported: {}..={})",
                self.min_version, self.max_version
            )]);
        }

        match serde_json::from_value::<T>(value) {
            Ok(decoded) => Validation::Accepted(decoded),
            Err(err) => Validation::Rejected(vec![format!("schema mismatch: {err}")]),
        }
    }
}
