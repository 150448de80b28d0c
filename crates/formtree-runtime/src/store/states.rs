#![forbid(unsafe_code)]

//! Aggregated flags over a container's children.
//!
//! Each set holds the keys of children for which the flag is currently set,
//! so "any child dirty" and friends are O(1) and a single child change is
//! O(1) to record.

use std::hash::Hash;

use ahash::AHashSet;

use crate::control::Control;

#[derive(Debug, Clone)]
pub(crate) struct ChildrenStates<K> {
    invalid: AHashSet<K>,
    validating: AHashSet<K>,
    dirty: AHashSet<K>,
    touched: AHashSet<K>,
}

impl<K> Default for ChildrenStates<K> {
    fn default() -> Self {
        Self {
            invalid: AHashSet::new(),
            validating: AHashSet::new(),
            dirty: AHashSet::new(),
            touched: AHashSet::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> ChildrenStates<K> {
    /// Record the flags of `control` under `key`.
    pub(crate) fn set(&mut self, key: &K, control: &Control) {
        toggle(&mut self.invalid, key, !control.is_valid());
        toggle(&mut self.validating, key, control.is_validating());
        toggle(&mut self.dirty, key, control.is_dirty());
        toggle(&mut self.touched, key, control.is_touched());
    }

    pub(crate) fn remove(&mut self, key: &K) {
        self.invalid.remove(key);
        self.validating.remove(key);
        self.dirty.remove(key);
        self.touched.remove(key);
    }

    #[inline]
    pub(crate) fn all_valid(&self) -> bool {
        self.invalid.is_empty()
    }

    #[inline]
    pub(crate) fn any_validating(&self) -> bool {
        !self.validating.is_empty()
    }

    #[inline]
    pub(crate) fn any_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    #[inline]
    pub(crate) fn any_touched(&self) -> bool {
        !self.touched.is_empty()
    }
}

fn toggle<K: Eq + Hash + Clone>(set: &mut AHashSet<K>, key: &K, on: bool) {
    if on {
        if !set.contains(key) {
            set.insert(key.clone());
        }
    } else {
        set.remove(key);
    }
}
