#![forbid(unsafe_code)]

//! Immutable control snapshots.
//!
//! A [`Control`] is one observable state of a control. Reading it never
//! changes anything; mutating it (`set_value`, `touch`, ...) only records a
//! pending change that becomes visible in the snapshot returned by the next
//! root `apply_update`.
//!
//! Snapshots are cheap to clone and compare: unchanged subtrees are shared
//! between consecutive root snapshots, so [`Control::ptr_eq`] tells whether a
//! subtree changed at all.
//!
//! # Stale snapshots
//!
//! Only the latest snapshot of a control accepts mutations. Calling a mutator
//! on a superseded snapshot, or on a snapshot of a destroyed tree, does
//! nothing.

mod array;
mod basic;
mod object;

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use formtree_core::config::{ControlConfig, ControlKind};
use formtree_core::custom_errors::PathNode;
use formtree_core::error::{ControlError, FormError, Result};
use formtree_core::names::ControlNames;
use formtree_core::validation::ValidationType;
use formtree_core::value::{Context, FieldValue};
use serde_json::Value;

pub use array::{ArrayControl, ArrayItem};
pub use basic::BasicControl;
pub use object::ObjectControl;

use crate::core::ControlCore;

/// Options of [`Control::set_value_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetValueOptions {
    /// Leave the touched flag alone.
    pub no_touch: bool,
}

impl SetValueOptions {
    /// Options that do not mark the control as touched.
    #[must_use]
    pub fn no_touch() -> Self {
        Self { no_touch: true }
    }
}

// ─── Node state ──────────────────────────────────────────────────────────────

/// Properties shared by every control kind.
pub struct NodeState {
    pub(crate) core: Rc<ControlCore>,
    pub(crate) generation: u64,
    pub(crate) value: FieldValue,
    pub(crate) default_value: FieldValue,
    pub(crate) context: Context,
    pub(crate) names: ControlNames,
    pub(crate) validation_type: ValidationType,
    pub(crate) is_touched: bool,
    pub(crate) is_dirty: bool,
    pub(crate) is_valid: bool,
    pub(crate) is_validating: bool,
    pub(crate) error: Option<ControlError>,
}

impl NodeState {
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    /// Context passed by the parent (or the root).
    #[inline]
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Dynamic name, e.g. `users[2].email`.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.names.dynamic
    }

    #[inline]
    #[must_use]
    pub fn names(&self) -> &ControlNames {
        &self.names
    }

    #[inline]
    #[must_use]
    pub fn validation_type(&self) -> ValidationType {
        self.validation_type
    }

    #[inline]
    #[must_use]
    pub fn is_touched(&self) -> bool {
        self.is_touched
    }

    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// No own error and, for containers, every child valid.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    #[inline]
    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.is_validating
    }

    /// Own visible error. Containers do not surface child errors here.
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<&ControlError> {
        self.error.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ControlConfig {
        self.core.config()
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ControlKind {
        self.core.config().kind()
    }

    /// Whether a newer snapshot of this control exists or its tree was
    /// destroyed.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        !self.core.is_current(self.generation)
    }

    fn live(&self) -> Option<&ControlCore> {
        self.core.is_current(self.generation).then_some(&*self.core)
    }

    // ── Mutators ─────────────────────────────────────────────────────

    /// Set a new value and mark the control touched.
    pub fn set_value(&self, value: FieldValue) {
        self.set_value_with(value, SetValueOptions::default());
    }

    pub fn set_value_with(&self, value: FieldValue, options: SetValueOptions) {
        if let Some(core) = self.live() {
            core.set_value(value, options);
        }
    }

    /// Mark the control (or every leaf below it) as touched.
    pub fn touch(&self) {
        if let Some(core) = self.live() {
            core.touch();
        }
    }

    /// Set the value back to the default value.
    pub fn reset(&self) {
        if let Some(core) = self.live() {
            core.reset();
        }
    }
}

impl fmt::Debug for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeState")
            .field("name", &self.names.dynamic)
            .field("generation", &self.generation)
            .field("value", &self.value)
            .field("is_touched", &self.is_touched)
            .field("is_dirty", &self.is_dirty)
            .field("is_valid", &self.is_valid)
            .field("is_validating", &self.is_validating)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

// ─── Control ─────────────────────────────────────────────────────────────────

/// Snapshot of any control kind.
#[derive(Debug, Clone)]
pub enum Control {
    Basic(Rc<BasicControl>),
    Object(Rc<ObjectControl>),
    Array(Rc<ArrayControl>),
}

impl Control {
    #[must_use]
    pub fn state(&self) -> &NodeState {
        match self {
            Self::Basic(control) => &control.state,
            Self::Object(control) => &control.state,
            Self::Array(control) => &control.state,
        }
    }

    #[must_use]
    pub fn as_basic(&self) -> Option<&BasicControl> {
        match self {
            Self::Basic(control) => Some(control),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectControl> {
        match self {
            Self::Object(control) => Some(control),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayControl> {
        match self {
            Self::Array(control) => Some(control),
            _ => None,
        }
    }

    /// Field `name` of an object control.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Control> {
        self.as_object()?.field(name)
    }

    /// Item at `index` of an array control.
    #[must_use]
    pub fn item(&self, index: usize) -> Option<&Control> {
        self.as_array()?.item(index).map(ArrayItem::control)
    }

    /// Whether both handles point at the very same snapshot.
    #[must_use]
    pub fn ptr_eq(&self, other: &Control) -> bool {
        match (self, other) {
            (Self::Basic(a), Self::Basic(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Deref for Control {
    type Target = NodeState;

    fn deref(&self) -> &NodeState {
        self.state()
    }
}

impl PathNode for Control {
    fn config(&self) -> &ControlConfig {
        self.state().config()
    }

    fn child(&self, key: &str, at: &str) -> Result<Self> {
        match self {
            Self::Object(object) => object
                .field(key)
                .cloned()
                .ok_or_else(|| FormError::unknown_field(at, key)),
            Self::Array(array) => {
                let index = key.parse::<usize>().map_err(|_| FormError::InvalidIndex {
                    path: at.to_owned(),
                    segment: key.to_owned(),
                })?;
                array
                    .item(index)
                    .map(|item| item.control().clone())
                    .ok_or_else(|| FormError::ItemOutOfRange {
                        path: at.to_owned(),
                        index,
                        len: array.len(),
                    })
            }
            Self::Basic(_) => Err(FormError::not_a_container(at)),
        }
    }
}
