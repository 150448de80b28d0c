#![forbid(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use formtree_core::value::FieldValue;
use serde_json::Value;

use super::{Control, NodeState, SetValueOptions};
use crate::store::ItemId;

/// Control holding a list of items sharing one config.
pub struct ArrayControl {
    pub(crate) state: NodeState,
    pub(crate) items: Rc<[ArrayItem]>,
}

impl ArrayControl {
    #[must_use]
    pub fn items(&self) -> &[ArrayItem] {
        &self.items
    }

    #[must_use]
    pub fn item(&self, index: usize) -> Option<&ArrayItem> {
        self.items.get(index)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append items to the end of the list and mark the array touched.
    pub fn push<I>(&self, values: I)
    where
        I: IntoIterator<Item = FieldValue>,
    {
        if !self.state.is_stale() {
            self.state.core.push(values.into_iter().collect());
        }
    }

    /// Remove every item.
    pub fn clear(&self) {
        self.clear_with(SetValueOptions::default());
    }

    pub fn clear_with(&self, options: SetValueOptions) {
        self.state.set_value_with(Some(Value::Array(Vec::new())), options);
    }
}

impl Deref for ArrayControl {
    type Target = NodeState;

    fn deref(&self) -> &NodeState {
        &self.state
    }
}

impl fmt::Debug for ArrayControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayControl")
            .field("state", &self.state)
            .field("items", &self.items.len())
            .finish()
    }
}

/// One entry of an [`ArrayControl`].
#[derive(Debug, Clone)]
pub struct ArrayItem {
    pub(crate) id: ItemId,
    pub(crate) control: Control,
}

impl ArrayItem {
    /// Stable identity; survives reorders caused by deletes and inserts.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn control(&self) -> &Control {
        &self.control
    }

    /// Remove this item from its array on the next apply.
    pub fn delete(&self) {
        if !self.control.is_stale() {
            self.control.core.delete_from_parent();
        }
    }
}
