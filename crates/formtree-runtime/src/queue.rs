#![forbid(unsafe_code)]

//! Registry of controls with outstanding validation work.
//!
//! # Design
//!
//! Debounce windows and async validators do not run on their own. A control
//! whose [`Validator`](crate::validator::Validator) parks work registers a
//! weak handle here; the embedding application drives the queue with
//! [`ValidationQueue::poll`] (from its own executor or event loop) or, in
//! tests, [`ValidationQueue::run_until_stalled`]. A task that settles emits
//! an empty update toward the root so the next `apply_update` materializes
//! the result.
//!
//! # Invariants
//!
//! 1. A task is registered at most once (pointer identity).
//! 2. Dropped or idle tasks are removed on the next poll.
//! 3. Tasks registered while a poll is running are picked up by the next
//!    poll, never by the running one.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::task::Context as TaskContext;

use formtree_core::cx::Clock;
use futures::task::noop_waker_ref;
use tracing::trace;
use web_time::Instant;

use crate::validator::ValidatorPoll;

/// Something that owns pending validation work.
pub trait ValidationTask {
    /// Drive the pending work once.
    fn poll_validation(&self, cx: &mut TaskContext<'_>) -> ValidatorPoll;

    /// Earliest debounce deadline, if any.
    fn next_deadline(&self) -> Option<Instant>;
}

struct QueueInner {
    clock: Clock,
    tasks: RefCell<Vec<Weak<dyn ValidationTask>>>,
    settled: Cell<u64>,
}

/// Shared handle to a validation queue. Clones share the same registry.
#[derive(Clone)]
pub struct ValidationQueue {
    inner: Rc<QueueInner>,
}

impl std::fmt::Debug for ValidationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationQueue")
            .field("clock", &self.inner.clock)
            .field("tasks", &self.inner.tasks.borrow().len())
            .field("settled", &self.inner.settled.get())
            .finish()
    }
}

impl Default for ValidationQueue {
    fn default() -> Self {
        Self::new(Clock::Real)
    }
}

impl ValidationQueue {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            inner: Rc::new(QueueInner {
                clock,
                tasks: RefCell::new(Vec::new()),
                settled: Cell::new(0),
            }),
        }
    }

    /// Time source for debounce deadlines.
    #[inline]
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    pub fn register(&self, task: Weak<dyn ValidationTask>) {
        let mut tasks = self.inner.tasks.borrow_mut();
        if tasks
            .iter()
            .any(|existing| std::ptr::addr_eq(existing.as_ptr(), task.as_ptr()))
        {
            return;
        }
        tasks.push(task);
    }

    /// Number of registered tasks, including ones that may already be idle.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether no live task remains registered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.tasks.borrow().iter().all(|task| task.strong_count() == 0)
    }

    /// Total number of settled validations since creation.
    #[must_use]
    pub fn settled_total(&self) -> u64 {
        self.inner.settled.get()
    }

    /// Poll every registered task once. Returns how many settled.
    pub fn poll(&self, cx: &mut TaskContext<'_>) -> usize {
        let snapshot: Vec<_> = self.inner.tasks.borrow_mut().drain(..).collect();
        let mut settled = 0;
        let mut keep = Vec::with_capacity(snapshot.len());
        for weak in snapshot {
            let Some(task) = weak.upgrade() else {
                continue;
            };
            match task.poll_validation(cx) {
                ValidatorPoll::Pending => keep.push(weak),
                ValidatorPoll::Settled => settled += 1,
                ValidatorPoll::Idle => {}
            }
        }
        // Registrations made during the pass were appended to the drained list.
        let mut tasks = self.inner.tasks.borrow_mut();
        let late = std::mem::take(&mut *tasks);
        *tasks = keep;
        drop(tasks);
        for weak in late {
            self.register(weak);
        }
        if settled > 0 {
            self.inner.settled.set(self.inner.settled.get() + settled as u64);
            trace!(settled, pending = self.len(), "validation queue polled");
        }
        settled
    }

    /// Poll with a no-op waker until a pass settles nothing.
    ///
    /// Debounce windows only close when the clock reaches their deadline, so
    /// with a [`LabClock`](formtree_core::cx::LabClock) advance it first.
    pub fn run_until_stalled(&self) -> usize {
        let mut cx = TaskContext::from_waker(noop_waker_ref());
        let mut total = 0;
        loop {
            let settled = self.poll(&mut cx);
            if settled == 0 {
                return total;
            }
            total += settled;
        }
    }

    /// Earliest debounce deadline among registered tasks.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner
            .tasks
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .filter_map(|task| task.next_deadline())
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        left: Cell<u32>,
        deadline: Option<Instant>,
    }

    impl ValidationTask for Countdown {
        fn poll_validation(&self, _cx: &mut TaskContext<'_>) -> ValidatorPoll {
            match self.left.get() {
                0 => ValidatorPoll::Idle,
                1 => {
                    self.left.set(0);
                    ValidatorPoll::Settled
                }
                n => {
                    self.left.set(n - 1);
                    ValidatorPoll::Pending
                }
            }
        }

        fn next_deadline(&self) -> Option<Instant> {
            self.deadline
        }
    }

    fn task(left: u32) -> Rc<Countdown> {
        Rc::new(Countdown {
            left: Cell::new(left),
            deadline: None,
        })
    }

    #[test]
    fn register_dedups_by_identity() {
        let queue = ValidationQueue::default();
        let t = task(1);
        let weak: Weak<dyn ValidationTask> = Rc::downgrade(&t) as Weak<dyn ValidationTask>;
        queue.register(weak.clone());
        queue.register(weak);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn poll_keeps_pending_and_drops_settled() {
        let queue = ValidationQueue::default();
        let a = task(1);
        let b = task(2);
        queue.register(Rc::downgrade(&a) as Weak<dyn ValidationTask>);
        queue.register(Rc::downgrade(&b) as Weak<dyn ValidationTask>);
        let mut cx = TaskContext::from_waker(noop_waker_ref());
        assert_eq!(queue.poll(&mut cx), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.run_until_stalled(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.settled_total(), 2);
    }

    #[test]
    fn dropped_tasks_are_pruned() {
        let queue = ValidationQueue::default();
        let t = task(5);
        queue.register(Rc::downgrade(&t) as Weak<dyn ValidationTask>);
        drop(t);
        assert!(queue.is_idle());
        assert_eq!(queue.run_until_stalled(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn next_deadline_is_the_earliest() {
        let queue = ValidationQueue::default();
        let now = Instant::now();
        let early = Rc::new(Countdown {
            left: Cell::new(2),
            deadline: Some(now),
        });
        let late = Rc::new(Countdown {
            left: Cell::new(2),
            deadline: Some(now + web_time::Duration::from_millis(10)),
        });
        queue.register(Rc::downgrade(&late) as Weak<dyn ValidationTask>);
        queue.register(Rc::downgrade(&early) as Weak<dyn ValidationTask>);
        assert_eq!(queue.next_deadline(), Some(now));
    }
}
