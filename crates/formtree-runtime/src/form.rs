#![forbid(unsafe_code)]

//! Form root: a control tree plus the loop that applies its changes.
//!
//! # Design
//!
//! [`FormRoot`] owns the [`ControlHandle`], the [`ValidationQueue`] and a
//! [`CustomErrorMatcher`] for the root config. Control mutations and
//! form-level requests (`reset`, `set_context`, server errors, ...) only
//! schedule work; [`FormRoot::flush`] applies it in one pass and
//! [`FormRoot::run_until_stalled`] additionally drives validation work
//! until nothing is left to do without time passing.
//!
//! # Invariants
//!
//! 1. The root config never reads a context of its own; the form context is
//!    only visible to descendants and to validators that opt in.
//! 2. `needs_flush()` is true whenever a change is waiting, and `flush()`
//!    always clears it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use formtree_core::config::ControlConfig;
use formtree_core::custom_errors::{CustomErrorMatcher, FlatError, walk};
use formtree_core::cx::Clock;
use formtree_core::error::Result;
use formtree_core::validation::ValidationType;
use formtree_core::value::{Context, FieldValue};
use serde_json::Value;
use tracing::{debug, trace};

use crate::control::{Control, SetValueOptions};
use crate::factory::{ChangeListener, ControlHandle, CreateControl, ValidValue, create_control};
use crate::queue::ValidationQueue;
use crate::update::ControlUpdate;

/// Initial state of a [`FormRoot`].
#[derive(Debug, Clone)]
pub struct FormOptions {
    pub value: FieldValue,
    pub default_value: FieldValue,
    pub context: Context,
    pub validation_type: ValidationType,
    pub clock: Clock,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            value: None,
            default_value: None,
            context: Value::Null,
            validation_type: ValidationType::default(),
            clock: Clock::Real,
        }
    }
}

impl FormOptions {
    #[must_use]
    pub fn value(mut self, value: FieldValue) -> Self {
        self.value = value;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: FieldValue) -> Self {
        self.default_value = value;
        self
    }

    #[must_use]
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn validation_type(mut self, validation_type: ValidationType) -> Self {
        self.validation_type = validation_type;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

/// Options of [`FormRoot::reset`].
#[derive(Debug, Clone, Default)]
pub struct ResetOptions {
    /// New value; defaults to the current default value.
    pub value: Option<FieldValue>,
    /// New default; defaults to `value` when that is given.
    pub default_value: Option<FieldValue>,
    pub keep_touched: bool,
}

// ─── FormRoot ────────────────────────────────────────────────────────────────

pub struct FormRoot {
    handle: ControlHandle,
    queue: ValidationQueue,
    matcher: CustomErrorMatcher,
    external: RefCell<Option<ControlUpdate>>,
    scheduled: Rc<Cell<bool>>,
}

impl std::fmt::Debug for FormRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormRoot")
            .field("handle", &self.handle)
            .field("queue", &self.queue)
            .field("scheduled", &self.scheduled.get())
            .finish_non_exhaustive()
    }
}

impl FormRoot {
    #[must_use]
    pub fn new(config: &ControlConfig, options: FormOptions) -> Self {
        let FormOptions {
            value,
            default_value,
            context,
            validation_type,
            clock,
        } = options;
        let config = config.without_own_context();
        let queue = ValidationQueue::new(clock);
        let scheduled = Rc::new(Cell::new(false));
        let flag = Rc::clone(&scheduled);
        let listener: ChangeListener = Rc::new(move |_| flag.set(true));
        let handle = create_control(
            CreateControl::new(config.clone())
                .value(value)
                .default_value(default_value)
                .context(context)
                .validation_type(validation_type)
                .queue(queue.clone()),
            Some(listener),
        );
        debug!(kind = ?config.kind(), "form created");
        Self {
            handle,
            queue,
            matcher: CustomErrorMatcher::new(config),
            external: RefCell::new(None),
            scheduled,
        }
    }

    /// Latest root snapshot.
    #[must_use]
    pub fn control(&self) -> Control {
        self.handle.current()
    }

    #[must_use]
    pub fn handle(&self) -> &ControlHandle {
        &self.handle
    }

    #[must_use]
    pub fn queue(&self) -> &ValidationQueue {
        &self.queue
    }

    // ── Requests ─────────────────────────────────────────────────────

    pub fn set_value(&self, value: FieldValue) {
        self.control().set_value(value);
    }

    pub fn touch(&self) {
        self.control().touch();
    }

    /// Replace value and default, and clear touched state unless asked not to.
    pub fn reset(&self, options: ResetOptions) {
        let ResetOptions {
            value,
            default_value,
            keep_touched,
        } = options;
        let control = self.control();
        let next_default = default_value.or_else(|| value.clone());
        let next_value = value.unwrap_or_else(|| control.default_value().cloned());
        control.set_value_with(next_value, SetValueOptions::no_touch());

        let mut external = ControlUpdate::new();
        external.default_value = next_default;
        if !keep_touched {
            external.is_touched = Some(false);
        }
        self.schedule(external);
    }

    pub fn set_context(&self, context: Context) {
        self.schedule(ControlUpdate::new().context(context));
    }

    pub fn set_validation_type(&self, validation_type: ValidationType) {
        self.schedule(ControlUpdate::new().validation_type(validation_type));
    }

    /// Route errors addressed by flat paths (e.g. from a server) to the
    /// controls they name. Unroutable errors are dropped.
    pub fn apply_flat_errors(&self, errors: &[FlatError]) {
        let resolved = self.matcher.resolve(errors);
        debug!(received = errors.len(), routed = resolved.len(), "applying flat errors");
        if !resolved.is_empty() {
            self.schedule(ControlUpdate::new().custom_errors(resolved));
        }
    }

    fn schedule(&self, update: ControlUpdate) {
        self.external
            .borrow_mut()
            .get_or_insert_with(ControlUpdate::new)
            .merge(update);
        self.scheduled.set(true);
    }

    // ── Driving ──────────────────────────────────────────────────────

    #[must_use]
    pub fn needs_flush(&self) -> bool {
        self.scheduled.get()
    }

    /// Apply everything scheduled so far.
    pub fn flush(&self) -> Option<Control> {
        self.scheduled.set(false);
        let external = self.external.borrow_mut().take().unwrap_or_default();
        let next = self.handle.apply_update(external);
        trace!(changed = next.is_some(), "form flushed");
        next
    }

    /// Poll validation work and flush until neither makes progress.
    ///
    /// Returns the last snapshot produced, if any.
    pub fn run_until_stalled(&self) -> Option<Control> {
        let mut latest = None;
        loop {
            self.queue.run_until_stalled();
            if !self.needs_flush() {
                return latest;
            }
            if let Some(control) = self.flush() {
                latest = Some(control);
            }
        }
    }

    /// See [`ControlHandle::valid_value`].
    pub fn valid_value(&self) -> ValidValue {
        self.handle.valid_value()
    }

    /// Control addressed by `path` in the latest snapshot, e.g.
    /// `users[1].email` or `users.1.email`.
    pub fn find(&self, path: &str) -> Result<Control> {
        walk(self.control(), path)
    }

    /// Tear the tree down; every snapshot becomes stale.
    pub fn destroy(&self) {
        self.handle.destroy();
        self.external.borrow_mut().take();
        self.scheduled.set(false);
    }
}

impl Drop for FormRoot {
    fn drop(&mut self) {
        self.handle.destroy();
    }
}

#[cfg(test)]
mod tests {
    use formtree_core::error::{ControlError, FormError};
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;

    fn login() -> ControlConfig {
        ControlConfig::object()
            .field("email", ControlConfig::basic().build())
            .field("password", ControlConfig::basic().build())
            .build()
    }

    #[test]
    fn mutations_wait_for_flush() {
        let form = FormRoot::new(&login(), FormOptions::default());
        let before = form.control();
        before.field("email").expect("email").set_value(Some(json!("a@b.c")));

        assert!(form.needs_flush());
        assert_eq!(form.control().value(), None);
        let after = form.flush().expect("new snapshot");
        assert!(!form.needs_flush());
        assert_eq!(after.value(), Some(&json!({"email": "a@b.c"})));
    }

    #[test]
    fn reset_replaces_default_and_untouches() {
        let form = FormRoot::new(&login(), FormOptions::default().value(Some(json!({"email": "x"}))));
        form.control().field("email").expect("email").set_value(Some(json!("y")));
        form.flush();
        assert!(form.control().is_touched());

        form.reset(ResetOptions {
            value: Some(Some(json!({"email": "z"}))),
            ..ResetOptions::default()
        });
        let control = form.flush().expect("new snapshot");
        assert_eq!(control.value(), Some(&json!({"email": "z"})));
        assert_eq!(control.default_value(), Some(&json!({"email": "z"})));
        assert!(!control.is_touched());
        assert!(!control.is_dirty());
    }

    #[test]
    fn find_walks_fields_and_reports_unknown_ones() {
        let config = ControlConfig::object()
            .field("users", ControlConfig::array(login()).build())
            .build();
        let form = FormRoot::new(
            &config,
            FormOptions::default().value(Some(json!({"users": [{"email": "a"}, {"email": "b"}]}))),
        );

        let email = form.find("users[1].email").expect("found");
        assert_eq!(email.value(), Some(&json!("b")));
        assert_eq!(email.name(), "users[1].email");
        assert_eq!(form.find("users.0.email").expect("found").value(), Some(&json!("a")));
        assert!(matches!(form.find("users[5]"), Err(FormError::ItemOutOfRange { index: 5, len: 2, .. })));
        assert!(matches!(form.find("nickname"), Err(FormError::UnknownField { .. })));
        assert!(matches!(
            form.find("users[0].email.x"),
            Err(FormError::NotAContainer { .. })
        ));
    }

    #[test]
    fn find_and_config_lookup_agree_on_bad_paths() {
        let config = ControlConfig::object()
            .field("users", ControlConfig::array(login()).build())
            .build();
        let form = FormRoot::new(&config, FormOptions::default().value(Some(json!({"users": [{}]}))));
        for path in ["nickname", "users.first", "users[0].phone", "users[0].email.x"] {
            let from_config = formtree_core::custom_errors::lookup(&config, path).err();
            assert_eq!(form.find(path).err(), from_config, "{path}");
        }
    }

    #[traced_test]
    #[test]
    fn flat_errors_reach_their_control() {
        let options = FormOptions::default()
            .value(Some(json!({})))
            .validation_type(ValidationType::Always);
        let form = FormRoot::new(&login(), options);
        form.apply_flat_errors(&[
            FlatError::new("password", ControlError::new("too weak")),
            FlatError::new("nope", ControlError::new("dropped")),
        ]);
        let control = form.flush().expect("new snapshot");

        let password = control.field("password").expect("password");
        assert_eq!(password.error(), Some(&ControlError::new("too weak")));
        assert!(!control.is_valid());
        assert!(logs_contain("applying flat errors"));
    }

    #[test]
    fn destroyed_form_makes_snapshots_stale() {
        let form = FormRoot::new(&login(), FormOptions::default());
        let control = form.control();
        form.destroy();
        assert!(control.is_stale());
        assert!(form.flush().is_none());
    }
}
