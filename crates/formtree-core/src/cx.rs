#![forbid(unsafe_code)]

//! Cancellation context (`Cx`) for debounced and asynchronous validation.
//!
//! Every piece of validation work that outlives a single `apply_update` pass
//! (a debounce window, a pending async validator) is bound to a `Cx`. The
//! owning validator keeps the companion [`CxController`] and cancels it as
//! soon as a newer change supersedes the work.
//!
//! # Design
//!
//! `Cx` is cheaply cloneable (`Arc` inside) and read-only. Deadlines are
//! measured against a [`Clock`]: [`Clock::Real`] reads `web_time::Instant`,
//! [`Clock::Lab`] reads a [`LabClock`] that tests advance by hand, so that
//! debounce behaviour is reproducible without sleeping.
//!
//! # Invariants
//!
//! 1. Cancellation is sticky: once `is_cancelled()` returns `true` it never
//!    flips back.
//! 2. `remaining()` saturates at zero; `is_expired()` is exactly
//!    `remaining() == Some(0)`.
//! 3. Dropping a `CxController` does not cancel the context.
//!
//! # Example
//!
//! ```
//! use formtree_core::cx::{Clock, Cx, LabClock};
//! use web_time::Duration;
//!
//! let lab = LabClock::new();
//! let (cx, ctrl) = Cx::with_deadline(&Clock::Lab(lab.clone()), Duration::from_millis(300));
//! assert!(!cx.is_expired());
//! lab.advance(Duration::from_millis(300));
//! assert!(cx.is_expired());
//! ctrl.cancel();
//! assert!(cx.is_cancelled());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::debug;
use web_time::{Duration, Instant};

// ─── Cx ID generation ────────────────────────────────────────────────────────

static NEXT_CX_ID: AtomicU64 = AtomicU64::new(1);

fn next_cx_id() -> u64 {
    NEXT_CX_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Time source ─────────────────────────────────────────────────────────────

/// Time source used for validation deadlines.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    /// Real wall-clock time.
    #[default]
    Real,
    /// Deterministic lab clock for testing.
    Lab(LabClock),
}

impl Clock {
    /// Current time according to this clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        match self {
            Self::Real => Instant::now(),
            Self::Lab(lab) => lab.now(),
        }
    }
}

/// A manually-advanceable clock for deterministic tests.
///
/// All clones share the same offset.
#[derive(Debug, Clone)]
pub struct LabClock {
    epoch: Instant,
    offset_us: Arc<AtomicU64>,
}

impl LabClock {
    /// Create a new lab clock starting at `Instant::now()`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            offset_us: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Advance the lab clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let us = delta.as_micros().min(u64::MAX as u128) as u64;
        self.offset_us.fetch_add(us, Ordering::Release);
    }

    /// Current lab time.
    #[must_use]
    pub fn now(&self) -> Instant {
        let offset = Duration::from_micros(self.offset_us.load(Ordering::Acquire));
        self.epoch + offset
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner shared state ──────────────────────────────────────────────────────

#[derive(Debug)]
struct CxInner {
    id: u64,
    cancelled: AtomicBool,
    /// Deadline as microseconds since `created_at`. `u64::MAX` means no deadline.
    deadline_us: u64,
    created_at: Instant,
    clock: Clock,
}

// ─── Cx ──────────────────────────────────────────────────────────────────────

/// Cancellation context handle.
#[derive(Clone, Debug)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Cx {
    /// Create a context with no deadline.
    #[must_use]
    pub fn background(clock: &Clock) -> (Self, CxController) {
        Self::new_inner(u64::MAX, clock.clone())
    }

    /// Create a context whose deadline is `deadline` from now.
    #[must_use]
    pub fn with_deadline(clock: &Clock, deadline: Duration) -> (Self, CxController) {
        let us = deadline.as_micros().min(u64::MAX as u128) as u64;
        Self::new_inner(us, clock.clone())
    }

    fn new_inner(deadline_us: u64, clock: Clock) -> (Self, CxController) {
        let inner = Arc::new(CxInner {
            id: next_cx_id(),
            cancelled: AtomicBool::new(false),
            deadline_us,
            created_at: clock.now(),
            clock,
        });
        let cx = Self {
            inner: inner.clone(),
        };
        (cx, CxController { inner })
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Unique identifier for this context (for logging).
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Check if this context has been cancelled.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Check if the deadline has passed.
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|d| d.is_zero())
    }

    /// Remaining time until the deadline (saturates to zero).
    /// Returns `None` if no deadline is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let own = self.inner.deadline_us;
        if own == u64::MAX {
            return None;
        }
        let elapsed = self
            .now()
            .checked_duration_since(self.inner.created_at)
            .unwrap_or(Duration::ZERO);
        let elapsed_us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        Some(Duration::from_micros(own.saturating_sub(elapsed_us)))
    }

    /// Absolute instant at which the deadline expires, if any.
    #[must_use]
    pub fn deadline_at(&self) -> Option<Instant> {
        (self.inner.deadline_us != u64::MAX)
            .then(|| self.inner.created_at + Duration::from_micros(self.inner.deadline_us))
    }

    /// Current time according to this context's clock.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.inner.clock.now()
    }
}

// ─── CxController ────────────────────────────────────────────────────────────

/// Control handle for a [`Cx`], held by the owner of the pending work.
#[derive(Debug)]
pub struct CxController {
    inner: Arc<CxInner>,
}

impl CxController {
    /// Cancel the associated context.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::Release) {
            debug!(cx_id = self.inner.id, "cx cancelled");
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_cx_is_not_cancelled() {
        let (cx, _ctrl) = Cx::background(&Clock::Real);
        assert!(!cx.is_cancelled());
        assert!(!cx.is_expired());
        assert!(cx.remaining().is_none());
        assert!(cx.deadline_at().is_none());
    }

    #[test]
    fn cancel_propagates_to_clones() {
        let (cx, ctrl) = Cx::background(&Clock::Real);
        let cx2 = cx.clone();
        ctrl.cancel();
        assert!(cx.is_cancelled());
        assert!(cx2.is_cancelled());
    }

    #[test]
    fn dropping_controller_does_not_cancel() {
        let (cx, ctrl) = Cx::background(&Clock::Real);
        drop(ctrl);
        assert!(!cx.is_cancelled());
    }

    #[test]
    fn lab_clock_deterministic() {
        let lab = LabClock::new();
        let clock = Clock::Lab(lab.clone());
        let (cx, _ctrl) = Cx::with_deadline(&clock, Duration::from_millis(100));

        assert_eq!(cx.remaining(), Some(Duration::from_millis(100)));

        lab.advance(Duration::from_millis(80));
        assert_eq!(cx.remaining(), Some(Duration::from_millis(20)));
        assert!(!cx.is_expired());

        lab.advance(Duration::from_millis(30));
        assert!(cx.is_expired());
        assert_eq!(cx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn deadline_at_matches_creation_plus_deadline() {
        let lab = LabClock::new();
        let clock = Clock::Lab(lab.clone());
        let start = clock.now();
        let (cx, _ctrl) = Cx::with_deadline(&clock, Duration::from_millis(250));
        assert_eq!(cx.deadline_at(), Some(start + Duration::from_millis(250)));
    }

    #[test]
    fn ids_are_unique() {
        let (a, _) = Cx::background(&Clock::Real);
        let (b, _) = Cx::background(&Clock::Real);
        assert_ne!(a.id(), b.id());
    }
}
