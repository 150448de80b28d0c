#![forbid(unsafe_code)]

//! Sparse update payloads.
//!
//! A [`ControlUpdate`] names only the properties that were explicitly set.
//! Every field is an `Option`: `None` means "not part of this update". The
//! value fields are `Option<FieldValue>`, so `Some(None)` ("now has no
//! value") is distinct from `None` ("value untouched").
//!
//! Container controls additionally carry per-child updates (`fields` for
//! objects, `items` for arrays). While a batch is being collected the
//! per-child entries are usually empty markers: the child keeps its own
//! accumulated changes and they are pulled in when the batch is applied.
//!
//! # Invariants
//!
//! 1. `merge` is last-writer-wins per property; children merge recursively.
//! 2. In an [`ItemsUpdate`], an index present in `deleted` never has a
//!    `changed` entry after a merge (delete wins).

use std::collections::{BTreeMap, BTreeSet};

use formtree_core::custom_errors::CustomError;
use formtree_core::names::ControlNames;
use formtree_core::validation::ValidationType;
use formtree_core::value::{Context, FieldValue};

/// Sparse set of changes addressed to one control.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlUpdate {
    pub value: Option<FieldValue>,
    pub default_value: Option<FieldValue>,
    pub context: Option<Context>,
    pub is_touched: Option<bool>,
    pub validation_type: Option<ValidationType>,
    pub names: Option<ControlNames>,
    pub custom_errors: Option<Vec<CustomError>>,
    /// Object field updates by key.
    pub fields: Option<BTreeMap<String, ControlUpdate>>,
    /// Array item updates.
    pub items: Option<ItemsUpdate>,
}

/// Structural and per-item changes of an array.
///
/// Indices in `changed` and `deleted` refer to positions before this update
/// is applied. `added` maps an insertion anchor (the index of the item the
/// new values follow) to the inserted values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemsUpdate {
    pub changed: BTreeMap<usize, ControlUpdate>,
    pub deleted: BTreeSet<usize>,
    pub added: BTreeMap<usize, Vec<FieldValue>>,
}

impl ItemsUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty() && self.added.is_empty()
    }

    /// Number of pending deletions strictly before `index`.
    #[must_use]
    pub fn deleted_before(&self, index: usize) -> usize {
        self.deleted.range(..index).count()
    }

    pub fn merge(&mut self, other: ItemsUpdate) {
        for (index, update) in other.changed {
            self.changed.entry(index).or_default().merge(update);
        }
        self.deleted.extend(other.deleted);
        for (anchor, values) in other.added {
            self.added.entry(anchor).or_default().extend(values);
        }
        let deleted = &self.deleted;
        self.changed.retain(|index, _| !deleted.contains(index));
    }
}

impl ControlUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Builders ─────────────────────────────────────────────────────

    #[must_use]
    pub fn value(mut self, value: FieldValue) -> Self {
        self.value = Some(value);
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: FieldValue) -> Self {
        self.default_value = Some(value);
        self
    }

    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn touched(mut self, is_touched: bool) -> Self {
        self.is_touched = Some(is_touched);
        self
    }

    #[must_use]
    pub fn validation_type(mut self, validation_type: ValidationType) -> Self {
        self.validation_type = Some(validation_type);
        self
    }

    #[must_use]
    pub fn names(mut self, names: ControlNames) -> Self {
        self.names = Some(names);
        self
    }

    #[must_use]
    pub fn custom_errors(mut self, errors: Vec<CustomError>) -> Self {
        self.custom_errors = Some(errors);
        self
    }

    /// Add (or merge into) the update for object field `key`.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, update: ControlUpdate) -> Self {
        self.fields_mut().entry(key.into()).or_default().merge(update);
        self
    }

    #[must_use]
    pub fn items(mut self, items: ItemsUpdate) -> Self {
        self.items_mut().merge(items);
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Whether nothing at all is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
            && self.default_value.is_none()
            && self.context.is_none()
            && self.is_touched.is_none()
            && self.validation_type.is_none()
            && self.names.is_none()
            && self.custom_errors.is_none()
            && self.fields.is_none()
            && self.items.is_none()
    }

    #[inline]
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Pending value, if this update sets one.
    #[must_use]
    pub fn pending_value(&self) -> Option<&FieldValue> {
        self.value.as_ref()
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Overlay `other` onto `self`; properties set in `other` win.
    pub fn merge(&mut self, other: ControlUpdate) {
        let ControlUpdate {
            value,
            default_value,
            context,
            is_touched,
            validation_type,
            names,
            custom_errors,
            fields,
            items,
        } = other;
        overlay(&mut self.value, value);
        overlay(&mut self.default_value, default_value);
        overlay(&mut self.context, context);
        overlay(&mut self.is_touched, is_touched);
        overlay(&mut self.validation_type, validation_type);
        overlay(&mut self.names, names);
        overlay(&mut self.custom_errors, custom_errors);
        if let Some(fields) = fields {
            let mine = self.fields_mut();
            for (key, update) in fields {
                mine.entry(key).or_default().merge(update);
            }
        }
        if let Some(items) = items {
            self.items_mut().merge(items);
        }
    }

    /// `self` overlaid with `other`.
    #[must_use]
    pub fn merged(mut self, other: ControlUpdate) -> Self {
        self.merge(other);
        self
    }

    /// Object field updates, created on demand.
    pub fn fields_mut(&mut self) -> &mut BTreeMap<String, ControlUpdate> {
        self.fields.get_or_insert_with(BTreeMap::new)
    }

    /// Array item updates, created on demand.
    pub fn items_mut(&mut self) -> &mut ItemsUpdate {
        self.items.get_or_insert_with(ItemsUpdate::default)
    }
}

fn overlay<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_differs_from_set_to_none() {
        let unset = ControlUpdate::new();
        let cleared = ControlUpdate::new().value(None);
        assert!(unset.is_empty());
        assert!(!cleared.is_empty());
        assert!(cleared.has_value());
        assert_eq!(cleared.pending_value(), Some(&None));
    }

    #[test]
    fn merge_is_last_writer_wins() {
        let mut base = ControlUpdate::new().value(Some(json!(1))).touched(true);
        base.merge(ControlUpdate::new().value(Some(json!(2))).validation_type(ValidationType::Always));
        assert_eq!(base.value, Some(Some(json!(2))));
        assert_eq!(base.is_touched, Some(true));
        assert_eq!(base.validation_type, Some(ValidationType::Always));
    }

    #[test]
    fn field_updates_merge_recursively() {
        let a = ControlUpdate::new().field("x", ControlUpdate::new().touched(true));
        let b = ControlUpdate::new().field("x", ControlUpdate::new().value(Some(json!("v"))));
        let merged = a.merged(b);
        let fields = merged.fields.unwrap();
        assert_eq!(fields["x"].is_touched, Some(true));
        assert_eq!(fields["x"].value, Some(Some(json!("v"))));
    }

    #[test]
    fn delete_wins_over_pending_change() {
        let mut items = ItemsUpdate::default();
        items.changed.insert(1, ControlUpdate::new().value(Some(json!("b"))));
        items.changed.insert(2, ControlUpdate::new());
        items.merge(ItemsUpdate {
            deleted: BTreeSet::from([1]),
            ..ItemsUpdate::default()
        });
        assert!(!items.changed.contains_key(&1));
        assert!(items.changed.contains_key(&2));
        assert_eq!(items.deleted_before(2), 1);
        assert_eq!(items.deleted_before(1), 0);
    }

    #[test]
    fn added_values_extend_per_anchor() {
        let mut items = ItemsUpdate::default();
        items.added.insert(2, vec![Some(json!(1))]);
        items.merge(ItemsUpdate {
            added: BTreeMap::from([(2, vec![Some(json!(2))])]),
            ..ItemsUpdate::default()
        });
        assert_eq!(items.added[&2], vec![Some(json!(1)), Some(json!(2))]);
    }

    #[test]
    fn children_markers_make_update_non_empty() {
        let mut update = ControlUpdate::new();
        update.items_mut();
        assert!(!update.is_empty());
        assert!(update.items.as_ref().is_some_and(ItemsUpdate::is_empty));
    }

    mod merge_props {
        use super::*;
        use proptest::prelude::*;

        fn update() -> impl Strategy<Value = ControlUpdate> {
            (
                prop::option::of(prop::option::of(0u8..4)),
                prop::option::of(any::<bool>()),
                prop::collection::btree_set(0usize..4, 0..3),
                prop::collection::btree_map(0usize..4, prop::option::of(0u8..4), 0..3),
            )
                .prop_map(|(value, touched, deleted, changed)| {
                    let mut update = ControlUpdate::new();
                    update.value = value.map(|v| v.map(|n| json!(n)));
                    update.is_touched = touched;
                    if !deleted.is_empty() || !changed.is_empty() {
                        update.items = Some(ItemsUpdate {
                            changed: changed
                                .into_iter()
                                .filter(|(i, _)| !deleted.contains(i))
                                .map(|(i, v)| (i, ControlUpdate::new().value(v.map(|n| json!(n)))))
                                .collect(),
                            deleted,
                            added: BTreeMap::new(),
                        });
                    }
                    update
                })
        }

        proptest! {
            #[test]
            fn merge_is_associative(a in update(), b in update(), c in update()) {
                let left = a.clone().merged(b.clone()).merged(c.clone());
                let right = a.merged(b.merged(c));
                prop_assert_eq!(left, right);
            }

            #[test]
            fn merged_changes_never_touch_deleted_items(a in update(), b in update()) {
                let merged = a.merged(b);
                if let Some(items) = merged.items {
                    prop_assert!(items.changed.keys().all(|i| !items.deleted.contains(i)));
                }
            }
        }
    }
}
