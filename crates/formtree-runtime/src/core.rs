#![forbid(unsafe_code)]

//! Mutable core behind every control snapshot.
//!
//! # Design
//!
//! Snapshots ([`Control`]) are immutable. Everything that survives from one
//! snapshot to the next (validator, children, pending changes, the link to
//! the parent) lives in a [`ControlCore`] shared by all snapshots of the same
//! control. A generation counter, bumped whenever `apply_update` produces a
//! new snapshot, tells the current snapshot apart from superseded ones.
//!
//! Changes travel in two directions:
//!
//! - **Upward** (`emit`): a mutation on a snapshot records a pending
//!   [`ControlUpdate`] on its core and notifies the parent, which records an
//!   empty marker for that child plus its own recomputed value, and so on up
//!   to the root listener.
//! - **Downward** (`apply_update`): the root applies its pending update; each
//!   container hands per-child updates to its store, and every child merges
//!   them over its own pending update before diffing.
//!
//! # Invariants
//!
//! 1. A child with a pending update always has a marker in its parent's
//!    pending update, so one root apply reaches every pending change.
//! 2. No `RefCell` borrow is held while calling into a parent or a listener.
//! 3. A destroyed core ignores every mutation and never notifies.
//! 4. `apply_update` always clears the pending update, even when it returns
//!    `None`.
//!
//! # Failure Modes
//!
//! - **Listener applies synchronously**: a root listener that calls
//!   `apply_update` from inside the notification re-enters the tree while
//!   the emitting snapshot is still on the stack. Listeners must defer.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use std::task::Context as TaskContext;

use formtree_core::config::{ControlConfig, ControlKind, DescendantsContext};
use formtree_core::names::ControlNames;
use formtree_core::validation::ValidationType;
use formtree_core::value::{Context, FieldValue, array_len, field_of, is_dirty, items, normalize, set_item, with_field};
use serde_json::Value;
use tracing::{debug, trace};
use web_time::Instant;

use crate::comparator::{ChildValidation, Comparator, NodeProps};
use crate::control::{ArrayControl, BasicControl, Control, NodeState, ObjectControl, SetValueOptions};
use crate::queue::{ValidationQueue, ValidationTask};
use crate::store::ChildSeed;
use crate::store::ItemId;
use crate::store::array::ItemStore;
use crate::store::object::FieldStore;
use crate::update::{ControlUpdate, ItemsUpdate};
use crate::validator::{Validator, ValidatorInput, ValidatorPoll};

/// Receives the root's pending update whenever it needs to be applied.
pub type ChangeListener = Rc<dyn Fn(ControlUpdate)>;

/// Where a control reports its changes.
#[derive(Clone)]
pub(crate) enum ParentLink {
    Root(Option<ChangeListener>),
    Field { parent: Weak<ControlCore>, key: Rc<str> },
    Item { parent: Weak<ControlCore>, id: ItemId },
    Detached,
}

pub(crate) enum Children {
    Leaf,
    Fields(FieldStore),
    Items(ItemStore),
}

impl Children {
    fn cores(&self) -> Vec<Rc<ControlCore>> {
        match self {
            Self::Leaf => Vec::new(),
            Self::Fields(store) => store.cores().into_iter().map(|(_, core)| core).collect(),
            Self::Items(store) => store.cores(),
        }
    }

    fn destroy(&mut self) {
        match self {
            Self::Leaf => {}
            Self::Fields(store) => store.destroy(),
            Self::Items(store) => store.destroy(),
        }
    }
}

struct CoreInner {
    generation: u64,
    destroyed: bool,
    pending: Option<ControlUpdate>,
    link: ParentLink,
    props: NodeProps,
    validator: Validator,
    children: Children,
}

impl CoreInner {
    /// Value as it will be after the pending update is applied.
    fn pending_or_current_value(&self) -> Option<&Value> {
        match self.pending.as_ref().and_then(|p| p.value.as_ref()) {
            Some(pending) => pending.as_ref(),
            None => self.props.value.as_ref(),
        }
    }

    fn pending_items(&self) -> Option<&ItemsUpdate> {
        self.pending.as_ref().and_then(|p| p.items.as_ref())
    }
}

/// Everything needed to create a control.
pub(crate) struct CoreSeed {
    pub config: ControlConfig,
    pub value: FieldValue,
    pub default_value: FieldValue,
    pub context: Context,
    pub is_touched: bool,
    pub validation_type: ValidationType,
    pub names: ControlNames,
    pub link: ParentLink,
    pub queue: ValidationQueue,
}

pub(crate) struct ControlCore {
    this: Weak<ControlCore>,
    config: ControlConfig,
    descendants: DescendantsContext,
    child_validation: ChildValidation,
    queue: ValidationQueue,
    inner: RefCell<CoreInner>,
}

impl std::fmt::Debug for ControlCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ControlCore")
            .field("kind", &self.config.kind())
            .field("name", &inner.props.names.dynamic)
            .field("generation", &inner.generation)
            .field("destroyed", &inner.destroyed)
            .field("pending", &inner.pending.is_some())
            .finish_non_exhaustive()
    }
}

impl ControlCore {
    // ── Construction ─────────────────────────────────────────────────

    pub(crate) fn create(seed: CoreSeed) -> Rc<Self> {
        let CoreSeed {
            config,
            value,
            default_value,
            context,
            is_touched,
            validation_type,
            names,
            link,
            queue,
        } = seed;
        let descendants = config.descendants();
        let child_validation = match &config {
            ControlConfig::Object(object) if !object.is_required() => ChildValidation::SkipWhenEmpty,
            _ => ChildValidation::Inherit,
        };

        let core = Rc::new_cyclic(|this: &Weak<ControlCore>| {
            let descendants_context = descendants.create(value.as_ref(), &context);
            let child_validation_type = child_validation.resolve(validation_type, value.as_ref());
            let validator = Validator::new(
                config.validation(),
                queue.clock().clone(),
                ValidatorInput {
                    value: value.as_ref(),
                    context: &context,
                    is_touched,
                    validation_type,
                    custom_error: None,
                },
            );
            let seed = ChildSeed {
                parent: this.clone(),
                queue: &queue,
                names: &names,
                context: &descendants_context,
                value: value.as_ref(),
                default_value: default_value.as_ref(),
                is_touched,
                validation_type: child_validation_type,
            };
            let children = match &config {
                ControlConfig::Basic(_) => Children::Leaf,
                ControlConfig::Object(object) => Children::Fields(FieldStore::new(object, seed)),
                ControlConfig::Array(array) => Children::Items(ItemStore::new(array, seed)),
            };
            let observed_touched = observed_touched(config.kind(), is_touched, &children);
            trace!(name = %names.dynamic, kind = ?config.kind(), "control created");

            ControlCore {
                this: this.clone(),
                descendants,
                child_validation,
                queue: queue.clone(),
                inner: RefCell::new(CoreInner {
                    generation: 0,
                    destroyed: false,
                    pending: None,
                    link,
                    props: NodeProps {
                        value,
                        default_value,
                        context,
                        descendants_context,
                        is_touched: observed_touched,
                        names,
                        validation_type,
                        child_validation_type,
                    },
                    validator,
                    children,
                }),
                config,
            }
        });
        core.register_pending_validation();
        core
    }

    fn register_pending_validation(self: &Rc<Self>) {
        if self.inner.borrow().validator.has_pending() {
            self.queue.register(Rc::downgrade(self) as Weak<dyn ValidationTask>);
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    #[inline]
    pub(crate) fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Whether `generation` is the live snapshot of this control.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let inner = self.inner.borrow();
        !inner.destroyed && inner.generation == generation
    }

    pub(crate) fn has_pending_update(&self) -> bool {
        self.inner.borrow().pending.is_some()
    }

    /// Build the snapshot of the current generation.
    pub(crate) fn snapshot(self: &Rc<Self>) -> Control {
        let inner = self.inner.borrow();
        let error = inner.validator.error().cloned();
        let own_validating = inner.validator.is_validating();
        let state = |is_touched: bool, is_dirty: bool, is_valid: bool, is_validating: bool| NodeState {
            core: Rc::clone(self),
            generation: inner.generation,
            value: inner.props.value.clone(),
            default_value: inner.props.default_value.clone(),
            context: inner.props.context.clone(),
            names: inner.props.names.clone(),
            validation_type: inner.props.validation_type,
            is_touched,
            is_dirty,
            is_valid,
            is_validating,
            error: error.clone(),
        };
        match &inner.children {
            Children::Leaf => Control::Basic(Rc::new(BasicControl {
                state: state(
                    inner.props.is_touched,
                    is_dirty(inner.props.value.as_ref(), inner.props.default_value.as_ref()),
                    error.is_none(),
                    own_validating,
                ),
            })),
            Children::Fields(store) => {
                let states = store.states();
                Control::Object(Rc::new(ObjectControl {
                    state: state(
                        states.any_touched(),
                        states.any_dirty(),
                        error.is_none() && states.all_valid(),
                        own_validating || states.any_validating(),
                    ),
                    fields: store.snapshot(),
                }))
            }
            Children::Items(store) => {
                let states = store.states();
                let default_len = array_len(inner.props.default_value.as_ref()).unwrap_or(0);
                Control::Array(Rc::new(ArrayControl {
                    state: state(
                        inner.props.is_touched || states.any_touched(),
                        states.any_dirty() || store.len() != default_len,
                        error.is_none() && states.all_valid(),
                        own_validating || states.any_validating(),
                    ),
                    items: store.snapshot(),
                }))
            }
        }
    }

    /// Pending update with every child marker replaced by the child's own
    /// pending content.
    pub(crate) fn materialized_pending(&self) -> Option<ControlUpdate> {
        let inner = self.inner.borrow();
        let mut pending = inner.pending.clone()?;
        match &inner.children {
            Children::Leaf => {}
            Children::Fields(store) => {
                for (key, update) in pending.fields.iter_mut().flatten() {
                    let Some(child) = store.core(key).and_then(|core| core.materialized_pending()) else {
                        continue;
                    };
                    *update = child.merged(std::mem::take(update));
                }
            }
            Children::Items(store) => {
                if let Some(items) = pending.items.as_mut() {
                    for (index, update) in &mut items.changed {
                        let Some(child) = store.core_at(*index).and_then(|core| core.materialized_pending()) else {
                            continue;
                        };
                        *update = child.merged(std::mem::take(update));
                    }
                }
            }
        }
        Some(pending)
    }

    // ── Reconciliation ───────────────────────────────────────────────

    /// Apply the pending update overlaid with `explicit`.
    ///
    /// Returns the new snapshot, or `None` when nothing observable changed.
    pub(crate) fn apply_update(self: &Rc<Self>, explicit: ControlUpdate) -> Option<Control> {
        let recreated = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if inner.destroyed {
                trace!(name = %inner.props.names.dynamic, "apply on destroyed control ignored");
                return None;
            }
            let mut update = inner.pending.take().unwrap_or_default();
            update.merge(explicit);

            let cmp = Comparator::new(
                &inner.props,
                &update,
                &mut inner.validator,
                &self.descendants,
                self.child_validation,
            );
            inner.props.context = cmp.context.current.clone();
            inner.props.descendants_context = cmp.descendants_context.current.clone();
            inner.props.validation_type = cmp.validation_type.current;
            inner.props.child_validation_type = cmp.child_validation_type.current;

            let children_changed = match &mut inner.children {
                Children::Leaf => false,
                Children::Fields(store) => store.apply(update.fields.take(), &cmp),
                Children::Items(store) => store.apply(
                    update.items.take(),
                    &cmp,
                    ChildSeed {
                        parent: self.this.clone(),
                        queue: &self.queue,
                        names: &cmp.names.current,
                        context: &cmp.descendants_context.current,
                        value: cmp.value.current.as_ref(),
                        default_value: cmp.default_value.current.as_ref(),
                        is_touched: false,
                        validation_type: cmp.child_validation_type.current,
                    },
                ),
            };

            let recreate =
                cmp.value.changed || cmp.default_value.changed || cmp.should_recreate || children_changed;
            if recreate {
                let observed = observed_touched(self.config.kind(), cmp.is_touched.current, &inner.children);
                let Comparator {
                    value,
                    default_value,
                    names,
                    ..
                } = cmp;
                inner.props.value = value.current;
                inner.props.default_value = default_value.current;
                inner.props.names = names.current;
                inner.props.is_touched = observed;
                inner.generation += 1;
                inner.validator.acknowledge();
                debug!(
                    name = %inner.props.names.dynamic,
                    generation = inner.generation,
                    children_changed,
                    "control recreated"
                );
            }
            recreate
        };
        self.register_pending_validation();
        recreated.then(|| self.snapshot())
    }

    // ── Emission ─────────────────────────────────────────────────────

    /// Record `changes` as pending and tell the parent when needed.
    fn emit(&self, changes: ControlUpdate) {
        let propagate = {
            let mut inner = self.inner.borrow_mut();
            if inner.destroyed {
                return;
            }
            match inner.pending.as_mut() {
                Some(pending) => {
                    let carries_value = changes.has_value();
                    pending.merge(changes);
                    carries_value
                }
                None => {
                    inner.pending = Some(changes);
                    true
                }
            }
        };
        if propagate {
            self.notify_parent();
        }
    }

    fn notify_parent(&self) {
        let (link, value) = {
            let inner = self.inner.borrow();
            let value = inner.pending.as_ref().and_then(|p| p.value.clone());
            (inner.link.clone(), value)
        };
        match link {
            ParentLink::Root(Some(listener)) => {
                if let Some(update) = self.materialized_pending() {
                    listener(update);
                }
            }
            ParentLink::Root(None) | ParentLink::Detached => {}
            ParentLink::Field { parent, key } => {
                if let Some(parent) = parent.upgrade() {
                    parent.on_field_change(&key, value);
                }
            }
            ParentLink::Item { parent, id } => {
                if let Some(parent) = parent.upgrade() {
                    parent.on_item_change(id, value);
                }
            }
        }
    }

    fn on_field_change(&self, key: &str, value: Option<FieldValue>) {
        let changes = {
            let inner = self.inner.borrow();
            if inner.destroyed {
                return;
            }
            let mut changes = ControlUpdate::new().field(key, ControlUpdate::new());
            if let Some(child) = value {
                let required = matches!(&self.config, ControlConfig::Object(object) if object.is_required());
                let base = inner.pending_or_current_value().cloned();
                changes.value = Some(with_field(base, key, child, required));
            }
            changes
        };
        self.emit(changes);
    }

    fn on_item_change(&self, id: ItemId, value: Option<FieldValue>) {
        let changes = {
            let inner = self.inner.borrow();
            let Children::Items(store) = &inner.children else {
                return;
            };
            let Some(index) = store.index_of(id) else {
                return;
            };
            let pending = inner.pending_items();
            if pending.is_some_and(|items| items.deleted.contains(&index)) {
                return;
            }
            let mut update = ItemsUpdate::default();
            update.changed.insert(index, ControlUpdate::new());
            let mut changes = ControlUpdate::new().items(update);
            if let Some(item) = value {
                let shift = pending.map_or(0, |items| items.deleted_before(index));
                let mut list = items(inner.pending_or_current_value()).to_vec();
                set_item(&mut list, index - shift, item);
                changes.value = Some(Some(Value::Array(list)));
            }
            changes
        };
        self.emit(changes);
    }

    fn on_item_delete(&self, id: ItemId) {
        let changes = {
            let inner = self.inner.borrow();
            let Children::Items(store) = &inner.children else {
                return;
            };
            let Some(index) = store.index_of(id) else {
                return;
            };
            let pending = inner.pending_items();
            if pending.is_some_and(|items| items.deleted.contains(&index)) {
                return;
            }
            let shift = pending.map_or(0, |items| items.deleted_before(index));
            let mut list = items(inner.pending_or_current_value()).to_vec();
            if index - shift < list.len() {
                list.remove(index - shift);
            }
            let mut changes = ControlUpdate::new().value(Some(Value::Array(list))).items(ItemsUpdate {
                deleted: BTreeSet::from([index]),
                ..ItemsUpdate::default()
            });
            if !inner.props.is_touched {
                changes.is_touched = Some(true);
            }
            changes
        };
        self.emit(changes);
    }

    /// Ask the parent array to delete this item.
    pub(crate) fn delete_from_parent(&self) {
        let link = self.inner.borrow().link.clone();
        if let ParentLink::Item { parent, id } = link {
            if let Some(parent) = parent.upgrade() {
                parent.on_item_delete(id);
            }
        }
    }

    // ── Mutations ────────────────────────────────────────────────────

    pub(crate) fn set_value(&self, value: FieldValue, options: SetValueOptions) {
        match self.config.kind() {
            ControlKind::Basic => self.set_basic_value(value, options),
            ControlKind::Object => {
                let fields = match &self.inner.borrow().children {
                    Children::Fields(store) => store.cores(),
                    _ => Vec::new(),
                };
                for (key, core) in fields {
                    core.set_value(field_of(value.as_ref(), &key), options);
                }
            }
            ControlKind::Array => self.set_array_value(value, options),
        }
    }

    fn set_basic_value(&self, value: FieldValue, options: SetValueOptions) {
        let value = normalize(value);
        let changes = {
            let inner = self.inner.borrow();
            if inner.destroyed {
                return;
            }
            let mut changes = ControlUpdate::new();
            if inner.pending_or_current_value() != value.as_ref() {
                changes.value = Some(value);
            }
            if !inner.props.is_touched && !options.no_touch {
                changes.is_touched = Some(true);
            }
            changes
        };
        if !changes.is_empty() {
            self.emit(changes);
        }
    }

    fn set_array_value(&self, value: FieldValue, options: SetValueOptions) {
        let value = normalize(value);
        let next: Vec<Value> = items(value.as_ref()).to_vec();
        let (cores, is_touched, had_structure) = {
            let mut inner = self.inner.borrow_mut();
            if inner.destroyed {
                return;
            }
            let cores = inner.children.cores();
            let is_touched = inner.props.is_touched;
            // Structure is recomputed against the applied list below.
            let had_structure = match inner.pending.as_mut().and_then(|p| p.items.as_mut()) {
                Some(items) => {
                    let had = !items.added.is_empty() || !items.deleted.is_empty();
                    items.added.clear();
                    items.deleted.clear();
                    had
                }
                None => false,
            };
            (cores, is_touched, had_structure)
        };

        let len = cores.len();
        let mut update = ItemsUpdate::default();
        for (index, (core, item)) in cores.iter().zip(&next).enumerate() {
            core.set_value(Some(item.clone()), options);
            if core.has_pending_update() {
                update.changed.insert(index, ControlUpdate::new());
            }
        }
        if next.len() > len {
            let added = next[len..].iter().map(|item| normalize(Some(item.clone()))).collect();
            update.added = BTreeMap::from([(len.saturating_sub(1), added)]);
        }
        update.deleted = (next.len()..len).collect();

        let structural = !update.added.is_empty() || !update.deleted.is_empty();
        let mut changes = ControlUpdate::new();
        if structural || had_structure {
            changes.value = Some(value);
        }
        if !update.is_empty() {
            changes.items = Some(update);
        }
        if !options.no_touch && !is_touched {
            changes.is_touched = Some(true);
        }
        if !changes.is_empty() {
            self.emit(changes);
        }
    }

    /// Append `values` to an array.
    pub(crate) fn push(&self, values: Vec<FieldValue>) {
        let changes = {
            let inner = self.inner.borrow();
            let Children::Items(store) = &inner.children else {
                return;
            };
            if inner.destroyed {
                return;
            }
            let mut changes = ControlUpdate::new();
            if !values.is_empty() {
                let values: Vec<FieldValue> = values.into_iter().map(normalize).collect();
                let mut list = items(inner.pending_or_current_value()).to_vec();
                list.extend(values.iter().map(|v| v.clone().unwrap_or(Value::Null)));
                changes.value = Some(Some(Value::Array(list)));
                changes.items = Some(ItemsUpdate {
                    added: BTreeMap::from([(store.len().saturating_sub(1), values)]),
                    ..ItemsUpdate::default()
                });
            }
            if !inner.props.is_touched {
                changes.is_touched = Some(true);
            }
            changes
        };
        if !changes.is_empty() {
            self.emit(changes);
        }
    }

    pub(crate) fn touch(&self) {
        let (is_touched, children) = {
            let inner = self.inner.borrow();
            if inner.destroyed {
                return;
            }
            (inner.props.is_touched, inner.children.cores())
        };
        match self.config.kind() {
            ControlKind::Basic if !is_touched => self.emit(ControlUpdate::new().touched(true)),
            ControlKind::Basic => {}
            ControlKind::Object | ControlKind::Array => {
                for child in children {
                    child.touch();
                }
            }
        }
    }

    pub(crate) fn reset(&self) {
        let default_value = self.inner.borrow().props.default_value.clone();
        self.set_value(default_value, SetValueOptions::default());
    }

    /// Queue an update for the next apply, as if the control had emitted it.
    pub(crate) fn enqueue(&self, changes: ControlUpdate) {
        self.emit(changes);
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Drop pending updates of this control and all descendants.
    pub(crate) fn clear_update(&self) {
        let children = {
            let mut inner = self.inner.borrow_mut();
            inner.pending = None;
            inner.children.cores()
        };
        for child in children {
            child.clear_update();
        }
    }

    pub(crate) fn destroy(&self) {
        let mut children = {
            let mut inner = self.inner.borrow_mut();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.pending = None;
            inner.link = ParentLink::Detached;
            inner.validator.destroy();
            trace!(name = %inner.props.names.dynamic, "control destroyed");
            std::mem::replace(&mut inner.children, Children::Leaf)
        };
        children.destroy();
    }
}

impl ValidationTask for ControlCore {
    fn poll_validation(&self, cx: &mut TaskContext<'_>) -> ValidatorPoll {
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            if inner.destroyed {
                return ValidatorPoll::Idle;
            }
            inner.validator.poll(cx)
        };
        if outcome == ValidatorPoll::Settled {
            self.emit(ControlUpdate::new());
        }
        outcome
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.inner.borrow().validator.next_deadline()
    }
}

fn observed_touched(kind: ControlKind, own: bool, children: &Children) -> bool {
    match (kind, children) {
        (ControlKind::Object, Children::Fields(store)) => store.states().any_touched(),
        (ControlKind::Array, Children::Items(store)) => own || store.states().any_touched(),
        _ => own,
    }
}
