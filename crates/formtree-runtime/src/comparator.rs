#![forbid(unsafe_code)]

//! Per-update diff of a control's own properties.
//!
//! # Design
//!
//! A [`Comparator`] is built once per `apply_update` call from the control's
//! previous [`NodeProps`] and the incoming [`ControlUpdate`]. It resolves
//! every tracked property into a [`PropDiff`], re-runs the validator when the
//! inputs that matter to it moved, and answers the two questions the control
//! and its children store ask afterwards:
//!
//! - `should_recreate`: does this control need a new snapshot regardless of
//!   its children?
//! - `should_enrich`: must children that received no update of their own
//!   still get a synthetic one (new default slice, context, names, touch
//!   reset or validation type)?
//!
//! # Invariants
//!
//! 1. A property absent from the update is unchanged and keeps its old
//!    value.
//! 2. The descendants context is recomputed only when the value changed, or
//!    the context changed and the derivation declares it reads context.
//! 3. The validator runs at most once per comparator.

use formtree_core::config::DescendantsContext;
use formtree_core::custom_errors::{CustomError, own_error};
use formtree_core::error::ControlError;
use formtree_core::names::ControlNames;
use formtree_core::validation::ValidationType;
use formtree_core::value::{Context, FieldValue};
use serde_json::Value;

use crate::update::ControlUpdate;
use crate::validator::{Validator, ValidatorInput};

/// Properties of a control as of its latest snapshot.
#[derive(Debug, Clone)]
pub(crate) struct NodeProps {
    pub value: FieldValue,
    pub default_value: FieldValue,
    pub context: Context,
    pub descendants_context: Context,
    /// Observable touch state of the latest snapshot.
    pub is_touched: bool,
    pub names: ControlNames,
    pub validation_type: ValidationType,
    pub child_validation_type: ValidationType,
}

/// How a control derives the validation type handed to its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildValidation {
    /// Children inherit the control's own type.
    Inherit,
    /// Children are not validated while the control has no value.
    SkipWhenEmpty,
}

impl ChildValidation {
    pub(crate) fn resolve(self, own: ValidationType, value: Option<&Value>) -> ValidationType {
        match self {
            Self::SkipWhenEmpty if value.is_none() => ValidationType::Never,
            _ => own,
        }
    }
}

/// Old and current value of one tracked property.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PropDiff<T> {
    pub current: T,
    pub old: T,
    pub changed: bool,
}

impl<T: Clone + PartialEq> PropDiff<T> {
    fn unchanged(old: T) -> Self {
        Self {
            current: old.clone(),
            old,
            changed: false,
        }
    }

    fn between(old: T, current: T) -> Self {
        let changed = old != current;
        Self { current, old, changed }
    }

    fn from_update(old: &T, incoming: Option<&T>) -> Self {
        match incoming {
            None => Self::unchanged(old.clone()),
            Some(current) => Self::between(old.clone(), current.clone()),
        }
    }
}

impl PropDiff<bool> {
    /// Whether the property flipped from `true` to `false`.
    #[inline]
    fn became_false(&self) -> bool {
        self.changed && !self.current
    }
}

/// Resolved diff of one `apply_update` pass.
#[derive(Debug)]
pub(crate) struct Comparator {
    pub value: PropDiff<FieldValue>,
    pub default_value: PropDiff<FieldValue>,
    pub context: PropDiff<Context>,
    pub descendants_context: PropDiff<Context>,
    pub is_touched: PropDiff<bool>,
    pub names: PropDiff<ControlNames>,
    pub validation_type: PropDiff<ValidationType>,
    pub child_validation_type: PropDiff<ValidationType>,
    pub error: PropDiff<Option<ControlError>>,
    pub is_validating: PropDiff<bool>,
    pub custom_errors: Vec<CustomError>,
    pub should_recreate: bool,
    pub should_enrich: bool,
}

impl Comparator {
    pub(crate) fn new(
        old: &NodeProps,
        update: &ControlUpdate,
        validator: &mut Validator,
        descendants: &DescendantsContext,
        child_validation: ChildValidation,
    ) -> Self {
        let value = PropDiff::from_update(&old.value, update.value.as_ref());
        let default_value = PropDiff::from_update(&old.default_value, update.default_value.as_ref());
        let context = PropDiff::from_update(&old.context, update.context.as_ref());
        let is_touched = PropDiff::from_update(&old.is_touched, update.is_touched.as_ref());
        let names = PropDiff::from_update(&old.names, update.names.as_ref());
        let validation_type = PropDiff::from_update(&old.validation_type, update.validation_type.as_ref());

        let descendants_context =
            if value.changed || (context.changed && descendants.needs_context()) {
                let fresh = descendants.create(value.current.as_ref(), &context.current);
                PropDiff::between(old.descendants_context.clone(), fresh)
            } else {
                PropDiff::unchanged(old.descendants_context.clone())
            };

        let child_validation_type = PropDiff::between(
            old.child_validation_type,
            child_validation.resolve(validation_type.current, value.current.as_ref()),
        );

        let custom_errors = update.custom_errors.clone().unwrap_or_default();
        let custom_error = own_error(&custom_errors).cloned();

        let old_error = validator.error().cloned();
        let old_validating = validator.is_validating();
        let (error, is_validating) =
            if custom_error.is_some() || needs_new_validation(&value, &context, &is_touched, &validation_type) {
                validator.on_change(ValidatorInput {
                    value: value.current.as_ref(),
                    context: &context.current,
                    is_touched: is_touched.current,
                    validation_type: validation_type.current,
                    custom_error: custom_error.as_ref(),
                });
                (
                    PropDiff::between(old_error, validator.error().cloned()),
                    PropDiff::between(old_validating, validator.is_validating()),
                )
            } else {
                (PropDiff::unchanged(old_error), PropDiff::unchanged(old_validating))
            };

        let should_recreate = is_touched.changed
            || names.changed
            || error.changed
            || is_validating.changed
            || validator.need_update();

        let should_enrich = default_value.changed
            || descendants_context.changed
            || is_touched.became_false()
            || names.changed
            || child_validation_type.changed;

        Self {
            value,
            default_value,
            context,
            descendants_context,
            is_touched,
            names,
            validation_type,
            child_validation_type,
            error,
            is_validating,
            custom_errors,
            should_recreate,
            should_enrich,
        }
    }

    /// Whether custom errors reach below this control.
    #[must_use]
    pub(crate) fn has_child_custom_errors(&self) -> bool {
        self.custom_errors.iter().any(|e| !e.is_here())
    }

    /// Synthetic update for one child, layered over the child's own update.
    ///
    /// `force` pushes default slice, context and names even when they did not
    /// change here (a shifted array item needs all three).
    pub(crate) fn enriched_update(
        &self,
        initial: ControlUpdate,
        force: bool,
        custom_errors: Option<Vec<CustomError>>,
        default_slice: impl FnOnce(Option<&Value>) -> FieldValue,
        names: impl FnOnce(&ControlNames) -> ControlNames,
    ) -> ControlUpdate {
        let mut result = initial;
        if force || self.default_value.changed {
            result.default_value = Some(default_slice(self.default_value.current.as_ref()));
        }
        if force || self.descendants_context.changed {
            result.context = Some(self.descendants_context.current.clone());
        }
        if let Some(errors) = custom_errors.filter(|errors| !errors.is_empty()) {
            result.custom_errors = Some(errors);
        }
        if self.is_touched.became_false() {
            result.is_touched = Some(false);
        }
        if self.child_validation_type.changed {
            result.validation_type = Some(self.child_validation_type.current);
        }
        if force || self.names.changed {
            result.names = Some(names(&self.names.current));
        }
        result
    }
}

fn needs_new_validation(
    value: &PropDiff<FieldValue>,
    context: &PropDiff<Context>,
    is_touched: &PropDiff<bool>,
    validation_type: &PropDiff<ValidationType>,
) -> bool {
    let inputs_changed = value.changed || context.changed;
    let was_visible = validation_type.old.should_validate(is_touched.old);
    let is_visible = validation_type.current.should_validate(is_touched.current);
    if was_visible == is_visible {
        is_visible && inputs_changed
    } else {
        true
    }
}
