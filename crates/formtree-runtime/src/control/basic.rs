#![forbid(unsafe_code)]

use std::ops::Deref;

use super::NodeState;

/// Leaf control holding a single value.
#[derive(Debug)]
pub struct BasicControl {
    pub(crate) state: NodeState,
}

impl Deref for BasicControl {
    type Target = NodeState;

    fn deref(&self) -> &NodeState {
        &self.state
    }
}
