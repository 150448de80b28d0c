#![forbid(unsafe_code)]

//! Children store of an object control.
//!
//! One slot per declared field, in declaration order. Each slot owns the
//! child's core and its latest snapshot; the aggregated flags in
//! [`ChildrenStates`] are refreshed whenever a child produces a new snapshot.

use std::collections::BTreeMap;
use std::rc::Rc;

use ahash::AHashMap;
use formtree_core::config::ObjectConfig;
use formtree_core::custom_errors::split_by_child;
use formtree_core::value::field_of;

use super::ChildSeed;
use super::states::ChildrenStates;
use crate::comparator::Comparator;
use crate::control::Control;
use crate::core::{ControlCore, CoreSeed, ParentLink};
use crate::update::ControlUpdate;

struct FieldSlot {
    key: Rc<str>,
    core: Rc<ControlCore>,
    control: Control,
}

pub(crate) struct FieldStore {
    slots: Vec<FieldSlot>,
    positions: AHashMap<Rc<str>, usize>,
    states: ChildrenStates<Rc<str>>,
}

impl std::fmt::Debug for FieldStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.slots.iter().map(|slot| &slot.key)).finish()
    }
}

impl FieldStore {
    pub(crate) fn new(config: &ObjectConfig, seed: ChildSeed<'_>) -> Self {
        let mut store = Self {
            slots: Vec::with_capacity(config.fields().len()),
            positions: AHashMap::with_capacity(config.fields().len()),
            states: ChildrenStates::default(),
        };
        for (name, child_config) in config.fields() {
            let key: Rc<str> = Rc::from(name);
            let core = ControlCore::create(CoreSeed {
                config: child_config.clone(),
                value: field_of(seed.value, name),
                default_value: field_of(seed.default_value, name),
                context: seed.context.clone(),
                is_touched: seed.is_touched,
                validation_type: seed.validation_type,
                names: seed.names.field(name),
                link: ParentLink::Field {
                    parent: seed.parent.clone(),
                    key: Rc::clone(&key),
                },
                queue: seed.queue.clone(),
            });
            let control = core.snapshot();
            store.states.set(&key, &control);
            store.positions.insert(Rc::clone(&key), store.slots.len());
            store.slots.push(FieldSlot { key, core, control });
        }
        store
    }

    /// Apply per-field updates, enriched where the comparator asks for it.
    ///
    /// Returns whether any field produced a new snapshot.
    pub(crate) fn apply(
        &mut self,
        updates: Option<BTreeMap<String, ControlUpdate>>,
        cmp: &Comparator,
    ) -> bool {
        let mut updates = updates.unwrap_or_default();
        let mut custom: Vec<_> = split_by_child(&cmp.custom_errors)
            .into_iter()
            .filter(|(key, _)| self.positions.contains_key(key.as_str()))
            .collect();

        let ordered: Vec<(usize, ControlUpdate)> = if cmp.should_enrich || !custom.is_empty() {
            self.slots
                .iter()
                .enumerate()
                .map(|(position, slot)| {
                    let initial = updates.remove(&*slot.key).unwrap_or_default();
                    let errors = custom
                        .iter()
                        .position(|(key, _)| **key == *slot.key)
                        .map(|at| custom.swap_remove(at).1);
                    let key = &slot.key;
                    let update = cmp.enriched_update(
                        initial,
                        false,
                        errors,
                        |default| field_of(default, key),
                        |names| names.field(key),
                    );
                    (position, update)
                })
                .collect()
        } else {
            updates
                .into_iter()
                .filter_map(|(key, update)| self.positions.get(key.as_str()).map(|&at| (at, update)))
                .collect()
        };

        let mut any_changed = false;
        for (position, update) in ordered {
            let slot = &mut self.slots[position];
            if let Some(control) = slot.core.apply_update(update) {
                self.states.set(&slot.key, &control);
                slot.control = control;
                any_changed = true;
            }
        }
        any_changed
    }

    pub(crate) fn snapshot(&self) -> Rc<[(Rc<str>, Control)]> {
        self.slots
            .iter()
            .map(|slot| (Rc::clone(&slot.key), slot.control.clone()))
            .collect()
    }

    #[inline]
    pub(crate) fn states(&self) -> &ChildrenStates<Rc<str>> {
        &self.states
    }

    pub(crate) fn core(&self, key: &str) -> Option<&Rc<ControlCore>> {
        self.positions.get(key).map(|&at| &self.slots[at].core)
    }

    pub(crate) fn cores(&self) -> Vec<(Rc<str>, Rc<ControlCore>)> {
        self.slots
            .iter()
            .map(|slot| (Rc::clone(&slot.key), Rc::clone(&slot.core)))
            .collect()
    }

    pub(crate) fn destroy(&mut self) {
        for slot in self.slots.drain(..) {
            slot.core.destroy();
        }
        self.positions.clear();
        self.states = ChildrenStates::default();
    }
}
