#![forbid(unsafe_code)]

//! Children store of an array control.
//!
//! # Design
//!
//! Items live in a [`Slab`] arena; `order` maps positions to [`ItemId`]s.
//! An id pairs the arena slot with a serial from a per-store counter, so a
//! slot reused after a delete never aliases the id of the item it replaced.
//! Every slot also remembers its position as of the last applied update;
//! that position is what child notifications and pending updates are keyed
//! by until the next apply.
//!
//! # Invariants
//!
//! 1. `order` and the arena hold exactly the same ids.
//! 2. After [`ItemStore::apply`], `slot.index` equals the slot's position in
//!    `order`.
//! 3. Serials are never reused within a store.
//!
//! # Apply order
//!
//! 1. `changed` updates by pre-update index.
//! 2. `deleted` indices, highest first, destroying each item.
//! 3. `added` values after their anchor, clamped to the post-delete length.
//! 4. Positions refreshed from the lowest affected index.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use formtree_core::config::{ArrayConfig, ControlConfig};
use formtree_core::custom_errors::{CustomError, split_by_child};
use formtree_core::value::{FieldValue, array_len, item_of};
use slab::Slab;
use tracing::debug;

use super::ChildSeed;
use super::states::ChildrenStates;
use crate::comparator::Comparator;
use crate::control::{ArrayItem, Control};
use crate::core::{ControlCore, CoreSeed, ParentLink};
use crate::update::ItemsUpdate;

/// Stable identity of an array item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    slot: usize,
    serial: u64,
}

impl ItemId {
    /// Creation counter of the item within its array.
    #[inline]
    #[must_use]
    pub fn serial(self) -> u64 {
        self.serial
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.serial)
    }
}

struct ItemSlot {
    serial: u64,
    index: usize,
    core: Rc<ControlCore>,
    control: Control,
}

pub(crate) struct ItemStore {
    config: ControlConfig,
    arena: Slab<ItemSlot>,
    order: Vec<ItemId>,
    next_serial: u64,
    states: ChildrenStates<ItemId>,
}

impl fmt::Debug for ItemStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemStore")
            .field("order", &self.order)
            .field("next_serial", &self.next_serial)
            .finish_non_exhaustive()
    }
}

impl ItemStore {
    pub(crate) fn new(config: &ArrayConfig, seed: ChildSeed<'_>) -> Self {
        let len = array_len(seed.value).unwrap_or(0);
        let mut store = Self {
            config: config.item.clone(),
            arena: Slab::with_capacity(len),
            order: Vec::with_capacity(len),
            next_serial: 0,
            states: ChildrenStates::default(),
        };
        for index in 0..len {
            let id = store.spawn(&seed, index, item_of(seed.value, index));
            store.order.push(id);
        }
        store
    }

    fn spawn(&mut self, seed: &ChildSeed<'_>, index: usize, value: FieldValue) -> ItemId {
        let entry = self.arena.vacant_entry();
        let id = ItemId {
            slot: entry.key(),
            serial: self.next_serial,
        };
        self.next_serial += 1;
        let core = ControlCore::create(CoreSeed {
            config: self.config.clone(),
            value,
            default_value: item_of(seed.default_value, index),
            context: seed.context.clone(),
            is_touched: seed.is_touched,
            validation_type: seed.validation_type,
            names: seed.names.item(index),
            link: ParentLink::Item {
                parent: seed.parent.clone(),
                id,
            },
            queue: seed.queue.clone(),
        });
        let control = core.snapshot();
        self.states.set(&id, &control);
        entry.insert(ItemSlot {
            serial: id.serial,
            index,
            core,
            control,
        });
        id
    }

    fn slot(&self, id: ItemId) -> Option<&ItemSlot> {
        self.arena.get(id.slot).filter(|slot| slot.serial == id.serial)
    }

    /// Position of `id` as of the last applied update.
    pub(crate) fn index_of(&self, id: ItemId) -> Option<usize> {
        self.slot(id).map(|slot| slot.index)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn core_at(&self, index: usize) -> Option<&Rc<ControlCore>> {
        let id = *self.order.get(index)?;
        self.slot(id).map(|slot| &slot.core)
    }

    pub(crate) fn cores(&self) -> Vec<Rc<ControlCore>> {
        self.order
            .iter()
            .filter_map(|&id| self.slot(id).map(|slot| Rc::clone(&slot.core)))
            .collect()
    }

    #[inline]
    pub(crate) fn states(&self) -> &ChildrenStates<ItemId> {
        &self.states
    }

    pub(crate) fn snapshot(&self) -> Rc<[ArrayItem]> {
        self.order
            .iter()
            .filter_map(|&id| {
                self.slot(id).map(|slot| ArrayItem {
                    id,
                    control: slot.control.clone(),
                })
            })
            .collect()
    }

    /// Apply structural and per-item changes. `seed` describes the array as
    /// of this update and is used for newly inserted items.
    ///
    /// Returns whether the item list or any item snapshot changed.
    pub(crate) fn apply(&mut self, update: Option<ItemsUpdate>, cmp: &Comparator, seed: ChildSeed<'_>) -> bool {
        let mut update = update.unwrap_or_default();
        let mut custom = self.custom_errors_by_index(cmp);

        if cmp.should_enrich || !update.deleted.is_empty() || !custom.is_empty() {
            for pre in 0..self.order.len() {
                if update.deleted.contains(&pre) {
                    continue;
                }
                let shift = update.deleted_before(pre);
                let index = pre - shift;
                let initial = update.changed.remove(&pre).unwrap_or_default();
                let enriched = cmp.enriched_update(
                    initial,
                    shift > 0,
                    custom.remove(&pre),
                    |default| item_of(default, index),
                    |names| names.item(index),
                );
                update.changed.insert(pre, enriched);
            }
        }

        let ItemsUpdate {
            changed,
            deleted,
            added,
        } = update;
        let mut any_changed = !added.is_empty() || !deleted.is_empty();

        for (index, child_update) in changed {
            let Some(&id) = self.order.get(index) else {
                continue;
            };
            let Some(slot) = self.arena.get_mut(id.slot) else {
                continue;
            };
            if let Some(control) = slot.core.apply_update(child_update) {
                self.states.set(&id, &control);
                slot.control = control;
                any_changed = true;
            }
        }

        let mut lowest = self.order.len();
        for &index in deleted.iter().rev() {
            if index >= self.order.len() {
                continue;
            }
            let id = self.order.remove(index);
            self.states.remove(&id);
            if self.arena.contains(id.slot) {
                let slot = self.arena.remove(id.slot);
                debug!(item = %id, index, name = %seed.names.dynamic, "array item deleted");
                slot.core.destroy();
            }
            lowest = lowest.min(index);
        }

        for (anchor, values) in added {
            let at = if self.order.is_empty() {
                0
            } else {
                (anchor + 1).min(self.order.len())
            };
            lowest = lowest.min(at);
            for (offset, value) in values.into_iter().enumerate() {
                let index = at + offset;
                let id = self.spawn(&seed, index, value);
                self.order.insert(index, id);
            }
        }

        for (index, id) in self.order.iter().enumerate().skip(lowest) {
            if let Some(slot) = self.arena.get_mut(id.slot) {
                slot.index = index;
            }
        }
        any_changed
    }

    fn custom_errors_by_index(&self, cmp: &Comparator) -> BTreeMap<usize, Vec<CustomError>> {
        let len = array_len(cmp.value.current.as_ref()).unwrap_or(0);
        split_by_child(&cmp.custom_errors)
            .into_iter()
            .filter_map(|(key, errors)| {
                let index = key.parse::<usize>().ok()?;
                (index < len).then_some((index, errors))
            })
            .collect()
    }

    pub(crate) fn destroy(&mut self) {
        for id in self.order.drain(..) {
            if self.arena.contains(id.slot) {
                self.arena.remove(id.slot).core.destroy();
            }
        }
        self.arena.clear();
        self.states = ChildrenStates::default();
    }
}
