#![forbid(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use formtree_core::config::ControlConfig;

use super::{Control, NodeState};

/// Control with a fixed set of named fields.
///
/// Touched and dirty are derived from the fields. Validity also requires
/// the object's own validator to pass.
pub struct ObjectControl {
    pub(crate) state: NodeState,
    pub(crate) fields: Rc<[(Rc<str>, Control)]>,
}

impl ObjectControl {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Control> {
        self.fields
            .iter()
            .find(|(key, _)| **key == *name)
            .map(|(_, control)| control)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = (&str, &Control)> {
        self.fields.iter().map(|(key, control)| (&**key, control))
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        matches!(self.state.config(), ControlConfig::Object(object) if object.is_required())
    }
}

impl Deref for ObjectControl {
    type Target = NodeState;

    fn deref(&self) -> &NodeState {
        &self.state
    }
}

impl fmt::Debug for ObjectControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectControl")
            .field("state", &self.state)
            .field("fields", &self.fields.iter().map(|(key, _)| key).collect::<Vec<_>>())
            .finish()
    }
}
