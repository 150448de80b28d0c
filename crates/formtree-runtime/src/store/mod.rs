#![forbid(unsafe_code)]

//! Children stores of container controls.

pub(crate) mod array;
pub(crate) mod object;
pub(crate) mod states;

use std::rc::Weak;

use formtree_core::names::ControlNames;
use formtree_core::validation::ValidationType;
use formtree_core::value::Context;
use serde_json::Value;

pub use array::ItemId;

use crate::core::ControlCore;
use crate::queue::ValidationQueue;

/// What a store needs to know about its parent to create children.
pub(crate) struct ChildSeed<'a> {
    pub parent: Weak<ControlCore>,
    pub queue: &'a ValidationQueue,
    /// Names of the parent.
    pub names: &'a ControlNames,
    /// Descendants context of the parent.
    pub context: &'a Context,
    /// Parent value; children take their slice of it.
    pub value: Option<&'a Value>,
    pub default_value: Option<&'a Value>,
    pub is_touched: bool,
    pub validation_type: ValidationType,
}
