//! Quiescence tracking for test harnesses.
//!
//! Every scheduled chain step holds a [`StepToken`] from issuance until it
//! settles. The tracker's count is therefore zero exactly when no step is
//! outstanding, which is what an external test waiter polls.
//!
//! `reset` starts a new epoch. Tokens issued before the reset settle as
//! no-ops, so steps from abandoned chains can never drive the count below
//! zero or erase steps issued after the reset.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Label under which the scheduler registers its waiter.
pub const WAITER_LABEL: &str = "afterpaint";

#[derive(Debug)]
pub struct QuiescenceTracker {
    enabled: bool,
    active: AtomicUsize,
    epoch: AtomicU64,
}

impl QuiescenceTracker {
    pub fn new(enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled,
            active: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Record a newly issued step.
    pub fn issue(self: &Arc<Self>) -> StepToken {
        if !self.enabled {
            return StepToken { slot: None };
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        StepToken {
            slot: Some((Arc::clone(self), epoch)),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Always true when tracking is disabled.
    pub fn is_quiescent(&self) -> bool {
        self.active() == 0
    }

    pub fn reset(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.active.store(0, Ordering::SeqCst);
    }

    fn release(&self, epoch: u64) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Proof that a step was issued. Settling consumes it.
#[derive(Debug)]
#[must_use = "an unsettled token keeps the tracker non-quiescent"]
pub struct StepToken {
    slot: Option<(Arc<QuiescenceTracker>, u64)>,
}

impl StepToken {
    pub fn settle(self) {
        if let Some((tracker, epoch)) = self.slot {
            tracker.release(epoch);
        }
    }
}

pub type WaiterPredicate = Box<dyn Fn() -> bool + Send + Sync>;

/// Registry an external test-completion detector polls.
pub trait WaiterRegistry: Send + Sync {
    fn register_waiter(&self, label: &'static str, predicate: WaiterPredicate);
}

/// In-process waiter registry.
#[derive(Default)]
pub struct Waiters {
    entries: Mutex<Vec<(&'static str, WaiterPredicate)>>,
}

impl std::fmt::Debug for Waiters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<&'static str> = self.entries.lock().iter().map(|(l, _)| *l).collect();
        f.debug_struct("Waiters").field("labels", &labels).finish()
    }
}

impl Waiters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all_settled(&self) -> bool {
        self.entries.lock().iter().all(|(_, predicate)| predicate())
    }

    pub fn pending_labels(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, predicate)| !predicate())
            .map(|(label, _)| *label)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl WaiterRegistry for Waiters {
    fn register_waiter(&self, label: &'static str, predicate: WaiterPredicate) {
        self.entries.lock().push((label, predicate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tracker_is_quiescent() {
        let tracker = QuiescenceTracker::new(true);
        assert!(tracker.is_quiescent());
        assert_eq!(tracker.active(), 0);
    }

    #[test]
    fn issue_and_settle_balance() {
        let tracker = QuiescenceTracker::new(true);
        let a = tracker.issue();
        let b = tracker.issue();
        assert_eq!(tracker.active(), 2);
        a.settle();
        assert!(!tracker.is_quiescent());
        b.settle();
        assert!(tracker.is_quiescent());
    }

    #[test]
    fn disabled_tracker_never_counts() {
        let tracker = QuiescenceTracker::new(false);
        let token = tracker.issue();
        assert!(!tracker.enabled());
        assert!(tracker.is_quiescent());
        token.settle();
        assert_eq!(tracker.active(), 0);
    }

    #[test]
    fn tokens_from_before_reset_are_ignored() {
        let tracker = QuiescenceTracker::new(true);
        let stale = tracker.issue();
        tracker.reset();
        let fresh = tracker.issue();
        stale.settle();
        assert_eq!(tracker.active(), 1);
        fresh.settle();
        assert!(tracker.is_quiescent());
    }

    #[test]
    fn waiters_report_pending_labels() {
        let tracker = QuiescenceTracker::new(true);
        let waiters = Waiters::new();
        assert!(waiters.is_empty());
        assert!(waiters.all_settled());

        let watched = Arc::clone(&tracker);
        waiters.register_waiter(WAITER_LABEL, Box::new(move || watched.is_quiescent()));
        waiters.register_waiter("always", Box::new(|| true));
        assert_eq!(waiters.len(), 2);

        let token = tracker.issue();
        assert!(!waiters.all_settled());
        assert_eq!(waiters.pending_labels(), vec![WAITER_LABEL]);
        token.settle();
        assert!(waiters.all_settled());
        assert!(format!("{waiters:?}").contains("always"));
    }
}
