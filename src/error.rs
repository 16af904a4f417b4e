//! Error taxonomy for the tracker.

use thiserror::Error;
use wasm_bindgen::JsValue;

/// Failures of the key-value backing behind the completion store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read key '{key}': {reason}")]
    Read { key: String, reason: String },
    #[error("failed to write key '{key}': {reason}")]
    Write { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressionError {
    #[error("page declares no sequence slug")]
    MissingSlug,
    #[error("page declares no step regions")]
    NoSteps,
    #[error("required control '{0}' not found")]
    MissingControl(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("progression already started on this page")]
    AlreadyStarted,
    #[error("dom error: {0}")]
    Dom(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProgressionError {
    /// Wrap a thrown JS value as a DOM failure.
    pub fn dom(value: JsValue) -> Self {
        Self::Dom(value.as_string().unwrap_or_else(|| format!("{value:?}")))
    }
}

impl From<ProgressionError> for JsValue {
    fn from(err: ProgressionError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}
