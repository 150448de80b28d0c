#![forbid(unsafe_code)]

//! Error types.
//!
//! [`ControlError`] is domain data: the validation outcome attached to a
//! control. [`FormError`] is the Rust error returned by fallible path
//! lookups.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Validation error attached to a control.
///
/// Two errors are equal when their messages are equal; `details` is carried
/// along for the caller and ignored by comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ControlError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl PartialEq for ControlError {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for ControlError {}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Error type for path lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("unknown field `{field}` under `{parent}`")]
    UnknownField { parent: String, field: String },

    #[error("`{path}` does not address a container control")]
    NotAContainer { path: String },

    #[error("array index `{segment}` in `{path}` is not a number")]
    InvalidIndex { path: String, segment: String },

    #[error("index {index} is out of range for `{path}` with {len} items")]
    ItemOutOfRange { path: String, index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, FormError>;

impl FormError {
    pub fn unknown_field(parent: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            parent: parent.into(),
            field: field.into(),
        }
    }

    pub fn not_a_container(path: impl Into<String>) -> Self {
        Self::NotAContainer { path: path.into() }
    }
}
