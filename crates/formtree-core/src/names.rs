#![forbid(unsafe_code)]

//! Control path names.
//!
//! Every control carries two names: the dynamic one is the concrete path of
//! this node (`users[2].email`), the static one replaces array indices with a
//! placeholder (`users[index].email`) so all items of an array share it.

use serde::{Deserialize, Serialize};

/// Placeholder used in static names for array positions.
pub const INDEX_PLACEHOLDER: &str = "[index]";

/// Static and dynamic path of a control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlNames {
    #[serde(rename = "static")]
    pub static_name: String,
    pub dynamic: String,
}

impl ControlNames {
    /// Names of the form root (both empty).
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new(static_name: impl Into<String>, dynamic: impl Into<String>) -> Self {
        Self {
            static_name: static_name.into(),
            dynamic: dynamic.into(),
        }
    }

    /// Whether these are the root names.
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.dynamic.is_empty() && self.static_name.is_empty()
    }

    /// Names of object field `key` under `self`.
    ///
    /// Fields of the root are named by their key alone.
    #[must_use]
    pub fn field(&self, key: &str) -> Self {
        if self.is_root() {
            return Self::new(key, key);
        }
        Self {
            static_name: format!("{}.{key}", self.static_name),
            dynamic: format!("{}.{key}", self.dynamic),
        }
    }

    /// Names of array item `index` under `self`.
    #[must_use]
    pub fn item(&self, index: usize) -> Self {
        Self {
            static_name: format!("{}{INDEX_PLACEHOLDER}", self.static_name),
            dynamic: format!("{}[{index}]", self.dynamic),
        }
    }
}
