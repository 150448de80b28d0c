#![forbid(unsafe_code)]

//! Per-control validation state machine.
//!
//! # Design
//!
//! A [`Validator`] owns everything about a control's own validation: the
//! user callback, the no-value shortcut, debouncing, the result cache and the
//! visibility gate. It never talks to the tree directly. Work that outlives
//! a call to [`Validator::on_change`] (an open debounce window or a pending
//! async result) is parked in a [`Pending`] slot bound to a [`Cx`]; the
//! owning control registers with the validation queue, which calls
//! [`Validator::poll`] until the work settles.
//!
//! # Invariants
//!
//! 1. At most one piece of pending work exists. Every `on_change` cancels it
//!    before deciding anything else.
//! 2. `error()` and `is_validating()` report nothing while validation is not
//!    visible for the current validation type and touch state. This holds
//!    for applied custom errors too.
//! 3. The user callback is never invoked for a missing value when a
//!    no-value error is configured.
//! 4. A settled debounce or async result always sets `need_update()`; it is
//!    cleared only by [`Validator::acknowledge`].
//! 5. The cache holds the last result for a `(value, context)` pair, settled
//!    or still pending. A repeated pair re-attaches to the cached future
//!    instead of calling the user callback again.
//!
//! # Failure Modes
//!
//! - **Validator panics**: the panic propagates to whoever triggered the
//!   validation (`apply_update` or a queue poll). The validator keeps its
//!   previous result.
//! - **Future dropped by cancellation**: the continuation never runs; a
//!   cancelled `Cx` is observed on the next poll and the slot is cleared.

use std::task::{Context as TaskContext, Poll};

use formtree_core::config::ValidationConfig;
use formtree_core::cx::{Clock, Cx, CxController};
use formtree_core::error::ControlError;
use formtree_core::validation::{ValidateFn, Validation, ValidationType};
use formtree_core::value::{Context, FieldValue};
use futures::FutureExt;
use futures::future::{LocalBoxFuture, Shared};
use serde_json::Value;
use tracing::{debug, trace};
use web_time::{Duration, Instant};

/// Observable state of a [`Validator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorState {
    IdleValid,
    IdleInvalid,
    Validating,
    CustomErrorApplied,
}

/// Inputs of one validation decision.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorInput<'a> {
    pub value: Option<&'a Value>,
    pub context: &'a Context,
    pub is_touched: bool,
    pub validation_type: ValidationType,
    pub custom_error: Option<&'a ControlError>,
}

/// Outcome of polling pending validation work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorPoll {
    /// Nothing pending.
    Idle,
    /// Still waiting on a deadline or a future.
    Pending,
    /// A result arrived; the owner must be re-diffed.
    Settled,
}

type SharedResult = Shared<LocalBoxFuture<'static, Option<ControlError>>>;

#[derive(Clone)]
enum CachedResult {
    Ready(Option<ControlError>),
    Pending(SharedResult),
}

struct CacheEntry {
    value: FieldValue,
    context: Context,
    result: CachedResult,
}

impl CacheEntry {
    fn matches(&self, value: &FieldValue, context: &Context) -> bool {
        self.value == *value && self.context == *context
    }
}

enum Pending {
    Idle,
    Debounce {
        cx: Cx,
        ctrl: CxController,
        value: FieldValue,
        context: Context,
    },
    Async {
        cx: Cx,
        ctrl: CxController,
        value: FieldValue,
        context: Context,
        future: SharedResult,
    },
}

impl Pending {
    fn cancel(&mut self) {
        match std::mem::replace(self, Pending::Idle) {
            Pending::Idle => {}
            Pending::Debounce { ctrl, .. } | Pending::Async { ctrl, .. } => ctrl.cancel(),
        }
    }

    fn is_idle(&self) -> bool {
        matches!(self, Pending::Idle)
    }
}

/// Validation state machine of one control.
pub struct Validator {
    validate: ValidateFn,
    debounce: Duration,
    uses_context: bool,
    no_value_error: Option<ControlError>,
    clock: Clock,

    current_error: Option<ControlError>,
    is_visible: bool,
    is_validating: bool,
    custom_applied: bool,
    need_update: bool,

    cache: Option<CacheEntry>,
    pending: Pending,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("state", &self.state())
            .field("error", &self.current_error)
            .field("need_update", &self.need_update)
            .field("pending", &!self.pending.is_idle())
            .finish_non_exhaustive()
    }
}

impl Validator {
    /// Create a validator and run the initial decision for `initial`.
    pub fn new(config: &ValidationConfig, clock: Clock, initial: ValidatorInput<'_>) -> Self {
        let mut validator = Self {
            validate: config.validate.clone(),
            debounce: config.debounce,
            uses_context: config.uses_context,
            no_value_error: config.no_value_error.clone(),
            clock,
            current_error: None,
            is_visible: false,
            is_validating: false,
            custom_applied: false,
            need_update: false,
            cache: None,
            pending: Pending::Idle,
        };
        validator.on_change(initial);
        validator
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Current error, hidden while validation is not visible.
    #[must_use]
    pub fn error(&self) -> Option<&ControlError> {
        if self.is_visible {
            self.current_error.as_ref()
        } else {
            None
        }
    }

    /// Whether a result is outstanding, hidden while not visible.
    #[inline]
    #[must_use]
    pub fn is_validating(&self) -> bool {
        self.is_visible && self.is_validating
    }

    #[must_use]
    pub fn state(&self) -> ValidatorState {
        if self.is_validating() {
            ValidatorState::Validating
        } else if self.error().is_none() {
            ValidatorState::IdleValid
        } else if self.custom_applied {
            ValidatorState::CustomErrorApplied
        } else {
            ValidatorState::IdleInvalid
        }
    }

    /// Whether a result settled outside an update pass and is not yet
    /// reflected in a snapshot.
    #[inline]
    #[must_use]
    pub fn need_update(&self) -> bool {
        self.need_update
    }

    /// Mark the settled result as reflected in a new snapshot.
    pub fn acknowledge(&mut self) {
        self.need_update = false;
    }

    #[inline]
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_idle()
    }

    /// Instant at which an open debounce window closes.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.pending {
            Pending::Debounce { cx, .. } => cx.deadline_at(),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Re-decide the validation outcome for new inputs.
    pub fn on_change(&mut self, input: ValidatorInput<'_>) {
        self.pending.cancel();
        self.is_visible = input.validation_type.should_validate(input.is_touched);
        self.custom_applied = false;

        if let Some(custom) = input.custom_error {
            self.current_error = Some(custom.clone());
            self.is_validating = false;
            self.custom_applied = true;
            return;
        }

        if !self.is_visible {
            self.current_error = None;
            self.is_validating = false;
            return;
        }

        if input.value.is_none() {
            if let Some(error) = &self.no_value_error {
                self.current_error = Some(error.clone());
                self.is_validating = false;
                return;
            }
        }

        let value = input.value.cloned();
        let context = self.effective_context(input.context);
        if self.debounce.is_zero() || value.is_none() {
            self.run(value, context);
            return;
        }

        self.is_validating = true;
        self.current_error = None;
        let (cx, ctrl) = Cx::with_deadline(&self.clock, self.debounce);
        debug!(cx_id = cx.id(), debounce_ms = self.debounce.as_millis() as u64, "validation debounced");
        self.pending = Pending::Debounce {
            cx,
            ctrl,
            value,
            context,
        };
    }

    /// Drive pending work.
    pub fn poll(&mut self, task_cx: &mut TaskContext<'_>) -> ValidatorPoll {
        loop {
            match &mut self.pending {
                Pending::Idle => return ValidatorPoll::Idle,
                Pending::Debounce { cx, .. } => {
                    if cx.is_cancelled() {
                        self.pending = Pending::Idle;
                        return ValidatorPoll::Idle;
                    }
                    if !cx.is_expired() {
                        return ValidatorPoll::Pending;
                    }
                    let Pending::Debounce { value, context, .. } =
                        std::mem::replace(&mut self.pending, Pending::Idle)
                    else {
                        return ValidatorPoll::Idle;
                    };
                    self.run(value, context);
                    if self.pending.is_idle() {
                        self.need_update = true;
                        return ValidatorPoll::Settled;
                    }
                    // The debounced call went async; poll it right away.
                }
                Pending::Async { cx, future, .. } => {
                    if cx.is_cancelled() {
                        self.pending = Pending::Idle;
                        return ValidatorPoll::Idle;
                    }
                    let Poll::Ready(result) = future.poll_unpin(task_cx) else {
                        return ValidatorPoll::Pending;
                    };
                    let Pending::Async { cx, value, context, .. } =
                        std::mem::replace(&mut self.pending, Pending::Idle)
                    else {
                        return ValidatorPoll::Idle;
                    };
                    debug!(cx_id = cx.id(), valid = result.is_none(), "async validation settled");
                    self.cache = Some(CacheEntry {
                        value,
                        context,
                        result: CachedResult::Ready(result.clone()),
                    });
                    self.current_error = result;
                    self.is_validating = false;
                    self.need_update = true;
                    return ValidatorPoll::Settled;
                }
            }
        }
    }

    /// Cancel pending work and forget cached results.
    pub fn destroy(&mut self) {
        self.pending.cancel();
        self.cache = None;
    }

    // ── Internals ────────────────────────────────────────────────────

    fn effective_context(&self, context: &Context) -> Context {
        if self.uses_context {
            context.clone()
        } else {
            Value::Null
        }
    }

    fn run(&mut self, value: FieldValue, context: Context) {
        let hit = self
            .cache
            .as_ref()
            .filter(|cache| cache.matches(&value, &context))
            .map(|cache| cache.result.clone());
        match hit {
            Some(CachedResult::Pending(shared)) if shared.peek().is_none() => {
                trace!("re-attaching to in-flight validation");
                self.attach(value, context, shared);
                return;
            }
            Some(CachedResult::Pending(shared)) => {
                trace!("validation cache hit");
                self.current_error = shared.peek().cloned().flatten();
                self.is_validating = false;
                return;
            }
            Some(CachedResult::Ready(result)) => {
                trace!("validation cache hit");
                self.current_error = result;
                self.is_validating = false;
                return;
            }
            None => {}
        }

        match (self.validate)(value.as_ref(), &context) {
            Validation::Ready(result) => {
                self.cache = Some(CacheEntry {
                    value,
                    context,
                    result: CachedResult::Ready(result.clone()),
                });
                self.current_error = result;
                self.is_validating = false;
            }
            Validation::Pending(future) => {
                let shared = future.shared();
                self.cache = Some(CacheEntry {
                    value: value.clone(),
                    context: context.clone(),
                    result: CachedResult::Pending(shared.clone()),
                });
                self.attach(value, context, shared);
            }
        }
    }

    fn attach(&mut self, value: FieldValue, context: Context, future: SharedResult) {
        let (cx, ctrl) = Cx::background(&self.clock);
        debug!(cx_id = cx.id(), "async validation started");
        self.current_error = None;
        self.is_validating = true;
        self.pending = Pending::Async {
            cx,
            ctrl,
            value,
            context,
            future,
        };
    }
}

impl Drop for Validator {
    fn drop(&mut self) {
        self.pending.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use formtree_core::config::ControlConfig;
    use formtree_core::cx::LabClock;
    use futures::channel::oneshot;
    use futures::task::noop_waker_ref;
    use serde_json::json;

    fn input<'a>(value: Option<&'a Value>, context: &'a Context) -> ValidatorInput<'a> {
        ValidatorInput {
            value,
            context,
            is_touched: false,
            validation_type: ValidationType::Always,
            custom_error: None,
        }
    }

    fn poll(validator: &mut Validator) -> ValidatorPoll {
        let mut cx = TaskContext::from_waker(noop_waker_ref());
        validator.poll(&mut cx)
    }

    fn counting(calls: &Rc<Cell<u32>>) -> ControlConfig {
        let calls = Rc::clone(calls);
        ControlConfig::basic()
            .validate(move |value, _| {
                calls.set(calls.get() + 1);
                match value {
                    Some(v) if v == "a" => Validation::valid(),
                    _ => Validation::invalid(ControlError::new("bad")),
                }
            })
            .build()
    }

    #[test]
    fn sync_validation_sets_error() {
        let calls = Rc::new(Cell::new(0));
        let config = counting(&calls);
        let ctx = Value::Null;
        let b = json!("b");
        let v = Validator::new(config.validation(), Clock::Real, input(Some(&b), &ctx));
        assert_eq!(v.error(), Some(&ControlError::new("bad")));
        assert_eq!(v.state(), ValidatorState::IdleInvalid);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn hidden_when_not_visible() {
        let calls = Rc::new(Cell::new(0));
        let config = counting(&calls);
        let ctx = Value::Null;
        let b = json!("b");
        let mut v = Validator::new(config.validation(), Clock::Real, input(Some(&b), &ctx));
        v.on_change(ValidatorInput {
            validation_type: ValidationType::OnlyTouched,
            ..input(Some(&b), &ctx)
        });
        assert_eq!(v.error(), None);
        assert!(!v.is_validating());
        assert_eq!(v.state(), ValidatorState::IdleValid);
    }

    #[test]
    fn no_value_error_skips_callback() {
        let calls = Rc::new(Cell::new(0));
        let mut validation = counting(&calls).validation().clone();
        validation.no_value_error = Some(ControlError::new("required"));
        let ctx = Value::Null;
        let v = Validator::new(&validation, Clock::Real, input(None, &ctx));
        assert_eq!(v.error(), Some(&ControlError::new("required")));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn custom_error_wins_until_next_change() {
        let calls = Rc::new(Cell::new(0));
        let config = counting(&calls);
        let ctx = Value::Null;
        let a = json!("a");
        let mut v = Validator::new(config.validation(), Clock::Real, input(Some(&a), &ctx));
        let custom = ControlError::new("server says no");
        v.on_change(ValidatorInput {
            custom_error: Some(&custom),
            ..input(Some(&a), &ctx)
        });
        assert_eq!(v.state(), ValidatorState::CustomErrorApplied);
        assert_eq!(v.error(), Some(&custom));
        v.on_change(input(Some(&a), &ctx));
        assert_eq!(v.error(), None);
    }

    #[test]
    fn custom_error_is_hidden_like_any_other() {
        let calls = Rc::new(Cell::new(0));
        let config = counting(&calls);
        let ctx = Value::Null;
        let a = json!("a");
        let untouched = |custom| ValidatorInput {
            validation_type: ValidationType::OnlyTouched,
            custom_error: custom,
            ..input(Some(&a), &ctx)
        };
        let mut v = Validator::new(config.validation(), Clock::Real, untouched(None));
        let custom = ControlError::new("server says no");
        v.on_change(untouched(Some(&custom)));
        assert_eq!(v.error(), None);
        assert_eq!(v.state(), ValidatorState::IdleValid);

        v.on_change(ValidatorInput {
            is_touched: true,
            ..untouched(Some(&custom))
        });
        assert_eq!(v.error(), Some(&custom));
        assert_eq!(v.state(), ValidatorState::CustomErrorApplied);
    }

    #[test]
    fn cache_skips_repeated_inputs() {
        let calls = Rc::new(Cell::new(0));
        let config = counting(&calls);
        let ctx = json!({"ignored": true});
        let a = json!("a");
        let mut v = Validator::new(config.validation(), Clock::Real, input(Some(&a), &ctx));
        v.on_change(input(Some(&a), &json!({"other": 1})));
        assert_eq!(calls.get(), 1, "context is not part of the key unless used");
    }

    #[test]
    fn debounce_runs_once_with_last_value() {
        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen_in = Rc::clone(&seen);
        let config = ControlConfig::basic()
            .validate(move |value, _| {
                seen_in.borrow_mut().push(value.cloned());
                Validation::valid()
            })
            .debounce(Duration::from_millis(300))
            .build();
        let lab = LabClock::new();
        let ctx = Value::Null;
        let (x, y, z) = (json!("x"), json!("y"), json!("z"));
        let mut v = Validator::new(config.validation(), Clock::Lab(lab.clone()), input(Some(&x), &ctx));
        assert!(v.is_validating());
        lab.advance(Duration::from_millis(100));
        v.on_change(input(Some(&y), &ctx));
        lab.advance(Duration::from_millis(100));
        v.on_change(input(Some(&z), &ctx));
        assert_eq!(poll(&mut v), ValidatorPoll::Pending);
        assert!(v.next_deadline().is_some());

        lab.advance(Duration::from_millis(300));
        assert_eq!(poll(&mut v), ValidatorPoll::Settled);
        assert!(v.need_update());
        assert!(!v.is_validating());
        assert_eq!(*seen.borrow(), vec![Some(json!("z"))]);
        assert_eq!(poll(&mut v), ValidatorPoll::Idle);
        v.acknowledge();
        assert!(!v.need_update());
    }

    #[test]
    fn async_result_settles_through_poll() {
        let (tx, rx) = oneshot::channel::<Option<ControlError>>();
        let rx = Rc::new(std::cell::RefCell::new(Some(rx)));
        let config = ControlConfig::basic()
            .validate(move |_, _| {
                let rx = rx.borrow_mut().take();
                Validation::pending(async move {
                    match rx {
                        Some(rx) => rx.await.ok().flatten(),
                        None => None,
                    }
                })
            })
            .build();
        let ctx = Value::Null;
        let a = json!("a");
        let mut v = Validator::new(config.validation(), Clock::Real, input(Some(&a), &ctx));
        assert_eq!(v.state(), ValidatorState::Validating);
        assert_eq!(v.error(), None);
        assert_eq!(poll(&mut v), ValidatorPoll::Pending);

        tx.send(Some(ControlError::new("taken"))).unwrap();
        assert_eq!(poll(&mut v), ValidatorPoll::Settled);
        assert_eq!(v.error(), Some(&ControlError::new("taken")));
        assert!(v.need_update());

        // Settled async results are cached.
        v.on_change(input(Some(&a), &ctx));
        assert!(!v.has_pending());
        assert_eq!(v.error(), Some(&ControlError::new("taken")));
    }

    #[test]
    fn repeated_inputs_reattach_to_inflight_validation() {
        let calls = Rc::new(Cell::new(0));
        let (tx, rx) = oneshot::channel::<Option<ControlError>>();
        let rx = Rc::new(std::cell::RefCell::new(Some(rx)));
        let counter = Rc::clone(&calls);
        let config = ControlConfig::basic()
            .validate(move |_, _| {
                counter.set(counter.get() + 1);
                let rx = rx.borrow_mut().take();
                Validation::pending(async move {
                    match rx {
                        Some(rx) => rx.await.ok().flatten(),
                        None => None,
                    }
                })
            })
            .build();
        let a = json!("a");
        let mut v = Validator::new(config.validation(), Clock::Real, input(Some(&a), &Value::Null));
        assert_eq!(poll(&mut v), ValidatorPoll::Pending);

        // The context is not used, so the effective inputs are unchanged.
        let ctx = json!({"k": 1});
        v.on_change(input(Some(&a), &ctx));
        assert_eq!(calls.get(), 1);
        assert!(v.is_validating());

        tx.send(Some(ControlError::new("taken"))).unwrap();
        assert_eq!(poll(&mut v), ValidatorPoll::Settled);
        assert_eq!(v.error(), Some(&ControlError::new("taken")));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn change_cancels_async_continuation() {
        let (tx, rx) = oneshot::channel::<Option<ControlError>>();
        let rx = Rc::new(std::cell::RefCell::new(Some(rx)));
        let config = ControlConfig::basic()
            .validate(move |value, _| {
                if value.is_some_and(|v| v == "slow") {
                    let rx = rx.borrow_mut().take();
                    return Validation::pending(async move {
                        match rx {
                            Some(rx) => rx.await.ok().flatten(),
                            None => None,
                        }
                    });
                }
                Validation::valid()
            })
            .build();
        let ctx = Value::Null;
        let (slow, fast) = (json!("slow"), json!("fast"));
        let mut v = Validator::new(config.validation(), Clock::Real, input(Some(&slow), &ctx));
        assert!(v.has_pending());
        v.on_change(input(Some(&fast), &ctx));
        assert!(!v.has_pending());
        assert!(tx.send(Some(ControlError::new("late"))).is_err(), "receiver dropped with the future");
        assert_eq!(poll(&mut v), ValidatorPoll::Idle);
        assert_eq!(v.error(), None);
    }

    #[test]
    fn destroy_cancels_debounce() {
        let config = ControlConfig::basic()
            .debounce(Duration::from_millis(50))
            .build();
        let lab = LabClock::new();
        let ctx = Value::Null;
        let a = json!("a");
        let mut v = Validator::new(config.validation(), Clock::Lab(lab.clone()), input(Some(&a), &ctx));
        assert!(v.has_pending());
        v.destroy();
        lab.advance(Duration::from_millis(100));
        assert_eq!(poll(&mut v), ValidatorPoll::Idle);
        assert!(!v.need_update());
    }
}
