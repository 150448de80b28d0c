#![forbid(unsafe_code)]

//! Creating a control tree and driving its updates.
//!
//! [`create_control`] builds the root control and returns a
//! [`ControlHandle`], the only way to move the tree forward: controls record
//! changes, the handle applies them.
//!
//! ```ignore
//! let handle = create_control(CreateControl::new(config).value(Some(json!("a"))), None);
//! handle.current().set_value(Some(json!("b")));
//! let next = handle.apply_update(ControlUpdate::new());
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll};

use formtree_core::config::ControlConfig;
use formtree_core::names::ControlNames;
use formtree_core::validation::ValidationType;
use formtree_core::value::{Context, FieldValue, normalize};
use futures::channel::oneshot;
use serde_json::Value;
use tracing::debug;

pub use crate::core::ChangeListener;
use crate::control::Control;
use crate::core::{ControlCore, CoreSeed, ParentLink};
use crate::queue::ValidationQueue;
use crate::update::ControlUpdate;

/// Parameters of [`create_control`].
#[derive(Clone)]
pub struct CreateControl {
    pub config: ControlConfig,
    pub value: FieldValue,
    pub default_value: FieldValue,
    pub context: Context,
    pub is_touched: bool,
    pub validation_type: ValidationType,
    pub names: ControlNames,
    pub queue: ValidationQueue,
}

impl CreateControl {
    /// Untouched root control with no value and a null context.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            value: None,
            default_value: None,
            context: Value::Null,
            is_touched: false,
            validation_type: ValidationType::default(),
            names: ControlNames::root(),
            queue: ValidationQueue::default(),
        }
    }

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
    pub fn touched(mut self, is_touched: bool) -> Self {
        self.is_touched = is_touched;
        self
    }

    #[must_use]
    pub fn validation_type(mut self, validation_type: ValidationType) -> Self {
        self.validation_type = validation_type;
        self
    }

    #[must_use]
    pub fn names(mut self, names: ControlNames) -> Self {
        self.names = names;
        self
    }

    /// Queue that drives debounced and asynchronous validation.
    #[must_use]
    pub fn queue(mut self, queue: ValidationQueue) -> Self {
        self.queue = queue;
        self
    }
}

/// Build a control tree.
///
/// `on_change` receives the root's pending update every time a change needs
/// applying. It must not call [`ControlHandle::apply_update`] synchronously;
/// schedule the apply instead.
#[must_use]
pub fn create_control(params: CreateControl, on_change: Option<ChangeListener>) -> ControlHandle {
    let CreateControl {
        config,
        value,
        default_value,
        context,
        is_touched,
        validation_type,
        names,
        queue,
    } = params;
    debug!(name = %names.dynamic, kind = ?config.kind(), "creating control tree");
    let core = ControlCore::create(CoreSeed {
        config,
        value: normalize(value),
        default_value: normalize(default_value),
        context,
        is_touched,
        validation_type,
        names,
        link: ParentLink::Root(on_change),
        queue,
    });
    let current = core.snapshot();
    ControlHandle {
        core,
        current: RefCell::new(current),
        observers: RefCell::new(Vec::new()),
    }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Owner of a control tree.
pub struct ControlHandle {
    core: Rc<ControlCore>,
    current: RefCell<Control>,
    observers: RefCell<Vec<oneshot::Sender<Option<FieldValue>>>>,
}

impl std::fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandle")
            .field("core", &self.core)
            .field("observers", &self.observers.borrow().len())
            .finish()
    }
}

impl ControlHandle {
    /// Latest snapshot.
    #[must_use]
    pub fn current(&self) -> Control {
        self.current.borrow().clone()
    }

    /// Apply every pending change plus `update` to the whole tree.
    ///
    /// Returns the new root snapshot, or `None` when nothing observable
    /// changed.
    pub fn apply_update(&self, update: ControlUpdate) -> Option<Control> {
        let next = self.core.apply_update(update);
        if let Some(control) = &next {
            *self.current.borrow_mut() = control.clone();
        }
        self.settle_observers();
        next
    }

    /// Drop every pending change in the tree.
    pub fn clear_update(&self) {
        self.core.clear_update();
    }

    /// Changes waiting for the next apply.
    #[must_use]
    pub fn pending_update(&self) -> Option<ControlUpdate> {
        self.core.materialized_pending()
    }

    /// Record `update` as if the root had emitted it.
    pub fn enqueue(&self, update: ControlUpdate) {
        self.core.enqueue(update);
    }

    /// Detach the tree. Every snapshot becomes stale and pending validation
    /// is cancelled.
    pub fn destroy(&self) {
        self.core.destroy();
        self.observers.borrow_mut().clear();
    }

    /// Resolve with the value once validation has settled, or `None` if the
    /// tree is invalid or destroyed first.
    ///
    /// Forces [`ValidationType::Always`] so hidden errors are computed.
    pub fn valid_value(&self) -> ValidValue {
        let control = self.current();
        if control.validation_type() != ValidationType::Always {
            self.core
                .enqueue(ControlUpdate::new().validation_type(ValidationType::Always));
        }
        if !self.core.has_pending_update() && !control.is_validating() {
            return ValidValue(ValidValueState::Ready(Some(settled_value(&control))));
        }
        let (tx, rx) = oneshot::channel();
        self.observers.borrow_mut().push(tx);
        ValidValue(ValidValueState::Waiting(rx))
    }

    fn settle_observers(&self) {
        let control = self.current();
        if control.is_validating() || self.core.has_pending_update() || self.observers.borrow().is_empty() {
            return;
        }
        let observers = std::mem::take(&mut *self.observers.borrow_mut());
        let result = settled_value(&control);
        for observer in observers {
            let _ = observer.send(result.clone());
        }
    }
}

fn settled_value(control: &Control) -> Option<FieldValue> {
    control.is_valid().then(|| control.value().cloned())
}

// ─── ValidValue ──────────────────────────────────────────────────────────────

/// Future returned by [`ControlHandle::valid_value`].
///
/// Resolves to `Some(value)` when the tree is valid and `None` otherwise.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct ValidValue(ValidValueState);

#[derive(Debug)]
enum ValidValueState {
    Ready(Option<Option<FieldValue>>),
    Waiting(oneshot::Receiver<Option<FieldValue>>),
}

impl Future for ValidValue {
    type Output = Option<FieldValue>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().0 {
            ValidValueState::Ready(result) => Poll::Ready(result.take().flatten()),
            ValidValueState::Waiting(rx) => Pin::new(rx).poll(cx).map(|result| result.ok().flatten()),
        }
    }
}
