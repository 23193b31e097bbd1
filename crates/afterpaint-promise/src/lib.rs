use anyhow::Error;
use parking_lot::Mutex;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use thiserror::Error;

pub mod spawn;

/// Reason attached to a rejected [`Deferred`].
///
/// Cloneable so that every future observing the same handle can be handed
/// its own copy of the outcome.
#[derive(Debug, Clone, Error)]
#[error("{label} rejected: {reason}")]
pub struct Rejection {
    label: &'static str,
    reason: Arc<Error>,
}

impl Rejection {
    pub fn new(label: &'static str, reason: impl Into<Error>) -> Self {
        Self {
            label,
            reason: Arc::new(reason.into()),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn reason(&self) -> &Error {
        &self.reason
    }
}

pub type Outcome<T> = Result<T, Rejection>;

type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

struct Core<T> {
    outcome: Option<Outcome<T>>,
    resolved: bool,
    wakers: Vec<Waker>,
    continuations: Vec<Continuation<T>>,
}

impl<T> Core<T> {
    fn pending() -> Self {
        Self {
            outcome: None,
            resolved: false,
            wakers: Vec::new(),
            continuations: Vec::new(),
        }
    }
}

/// The settling side of a one-shot promise.
///
/// Clones share the same core. The first `resolve`/`reject` wins; every
/// later call is a no-op that returns `false`.
pub struct Deferred<T> {
    label: &'static str,
    core: Arc<Mutex<Core<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("Deferred")
            .field("label", &self.label)
            .field("settled", &core.outcome.is_some())
            .field("resolved", &core.resolved)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Deferred<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            core: Arc::new(Mutex::new(Core::pending())),
        }
    }

    /// Create a handle that is already resolved with `value`.
    pub fn resolved(label: &'static str, value: T) -> Self {
        let deferred = Self::new(label);
        deferred.resolve(value);
        deferred
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, reason: impl Into<Error>) -> bool {
        self.settle(Err(Rejection::new(self.label, reason)))
    }

    /// Settle with an arbitrary outcome. Used to forward a predecessor's
    /// rejection unchanged.
    ///
    /// Wakers are woken and continuations run after the internal lock is
    /// released, so a continuation may freely touch this handle again.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        let (wakers, continuations) = {
            let mut core = self.core.lock();
            if core.outcome.is_some() {
                return false;
            }
            core.resolved = outcome.is_ok();
            core.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut core.wakers),
                std::mem::take(&mut core.continuations),
            )
        };
        for waker in wakers {
            waker.wake();
        }
        for continuation in continuations {
            continuation(&outcome);
        }
        true
    }

    /// True only once `resolve` succeeded. A rejected handle is settled
    /// but not resolved.
    pub fn is_resolved(&self) -> bool {
        self.core.lock().resolved
    }

    pub fn is_settled(&self) -> bool {
        self.core.lock().outcome.is_some()
    }

    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.core.lock().outcome.clone()
    }

    pub fn future(&self) -> Settled<T> {
        Settled {
            label: self.label,
            core: Arc::clone(&self.core),
        }
    }

    /// Register a continuation that runs exactly once with the outcome.
    /// Runs immediately if the handle has already settled.
    pub fn on_settle<F>(&self, continuation: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let settled = {
            let mut core = self.core.lock();
            match &core.outcome {
                Some(outcome) => Some(outcome.clone()),
                None => {
                    core.continuations.push(Box::new(continuation));
                    return;
                }
            }
        };
        if let Some(outcome) = settled {
            continuation(&outcome);
        }
    }

    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

/// The observing side of a [`Deferred`].
///
/// Any number of these may exist for one handle; each one yields the same
/// outcome and can be polled again after completion.
pub struct Settled<T> {
    label: &'static str,
    core: Arc<Mutex<Core<T>>>,
}

impl<T> Clone for Settled<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Settled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled")
            .field("label", &self.label)
            .field("ready", &self.core.lock().outcome.is_some())
            .finish()
    }
}

impl<T: Clone> Settled<T> {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_ready(&self) -> bool {
        self.core.lock().outcome.is_some()
    }

    pub fn peek(&self) -> Option<Outcome<T>> {
        self.core.lock().outcome.clone()
    }

    /// Whether both futures observe the same underlying handle.
    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<T: Clone> std::future::Future for Settled<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context) -> Poll<Self::Output> {
        let mut core = self.core.lock();
        if let Some(outcome) = &core.outcome {
            return Poll::Ready(outcome.clone());
        }
        let waker = ctx.waker();
        if !core.wakers.iter().any(|w| w.will_wake(waker)) {
            core.wakers.push(waker.clone());
        }
        Poll::Pending
    }
}
