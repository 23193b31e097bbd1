//! The checkpoint chain: navigation-complete → painted → idle.
//!
//! # State machine
//!
//! ```text
//! Pending ──(navigation resolved)──► Settling(Painting)
//!         ──(painted resolved)─────► Settling(Idling)
//!         ──(idle settled)─────────► Settled
//! ```
//!
//! Each transition is driven by the predecessor checkpoint settling, never
//! by a caller, so `painted` cannot resolve before `navigation_complete`
//! and `idle` cannot resolve before `painted`. A chain never moves
//! backward. An abandoned chain keeps running; it is simply no longer
//! reachable through the scheduler's accessors.
//!
//! Each step is two ticks: the selected scheduling primitive fires, then
//! the run loop's zero-delay tick runs, and only then does the checkpoint
//! resolve. The second tick absorbs jitter between the primitive firing
//! and the view actually being stable.
//!
//! A step reads its scheduling function from the shared selection when its
//! predecessor settles, not when the chain is built. A capability change
//! made mid-navigation therefore applies to every step not yet scheduled.

use std::fmt;
use std::sync::Arc;

use afterpaint_promise::{Deferred, Outcome, Settled};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::host::RunLoop;
use crate::quiescence::QuiescenceTracker;
use crate::schedule::ScheduleFns;

/// Label carried by every deferred handle the chain creates.
pub const SCHEDULER_LABEL: &str = "afterpaint";

/// The three checkpoints a chain exposes, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    NavigationComplete,
    Painted,
    Idle,
}

impl Checkpoint {
    pub const ALL: [Self; 3] = [Self::NavigationComplete, Self::Painted, Self::Idle];
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NavigationComplete => f.write_str("navigation-complete"),
            Self::Painted => f.write_str("painted"),
            Self::Idle => f.write_str("idle"),
        }
    }
}

/// Which derived step is in flight while a chain is settling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Painting,
    Idling,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Painting => f.write_str("painting"),
            Self::Idling => f.write_str("idling"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum ChainState {
    /// Navigation in flight; `navigation_complete` unresolved.
    Pending,
    /// `navigation_complete` resolved; the given step is scheduled.
    Settling(Stage),
    /// `idle` settled. Terminal.
    Settled,
}

impl ChainState {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Settling(Stage::Painting) => 1,
            Self::Settling(Stage::Idling) => 2,
            Self::Settled => 3,
        }
    }

    /// Move to `next` if it is further along; otherwise stay put.
    #[must_use]
    pub fn advance(self, next: Self) -> Self {
        if next.rank() > self.rank() { next } else { self }
    }

    #[must_use]
    pub fn on_navigation_complete(self) -> Self {
        self.advance(Self::Settling(Stage::Painting))
    }

    #[must_use]
    pub fn on_painted(self) -> Self {
        self.advance(Self::Settling(Stage::Idling))
    }

    #[must_use]
    pub fn on_idle(self) -> Self {
        self.advance(Self::Settled)
    }

    pub fn is_settled(self) -> bool {
        self == Self::Settled
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Settling(stage) => write!(f, "settling ({stage})"),
            Self::Settled => f.write_str("settled"),
        }
    }
}

/// One generation of checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointChain {
    generation: u64,
    state: Arc<Mutex<ChainState>>,
    navigation: Deferred<()>,
    painted: Deferred<()>,
    idle: Deferred<()>,
}

impl CheckpointChain {
    /// A chain whose three checkpoints are already resolved.
    pub fn settled(generation: u64) -> Self {
        Self {
            generation,
            state: Arc::new(Mutex::new(ChainState::Settled)),
            navigation: Deferred::resolved(SCHEDULER_LABEL, ()),
            painted: Deferred::resolved(SCHEDULER_LABEL, ()),
            idle: Deferred::resolved(SCHEDULER_LABEL, ()),
        }
    }

    /// A pending chain. `painted` and `idle` are wired to follow
    /// `navigation_complete` through whatever `fns` holds when each step
    /// starts.
    pub fn pending(
        generation: u64,
        fns: &Arc<Mutex<ScheduleFns>>,
        run_loop: &Arc<dyn RunLoop>,
        tracker: &Arc<QuiescenceTracker>,
    ) -> Self {
        let chain = Self {
            generation,
            state: Arc::new(Mutex::new(ChainState::Pending)),
            navigation: Deferred::new(SCHEDULER_LABEL),
            painted: Deferred::new(SCHEDULER_LABEL),
            idle: Deferred::new(SCHEDULER_LABEL),
        };

        let paint_step = Step {
            generation,
            stage: Stage::Painting,
            fns: Arc::clone(fns),
            run_loop: Arc::clone(run_loop),
            tracker: Arc::clone(tracker),
            state: Arc::clone(&chain.state),
            target: chain.painted.clone(),
        };
        chain
            .navigation
            .on_settle(move |outcome| paint_step.advance(outcome));

        let idle_step = Step {
            generation,
            stage: Stage::Idling,
            fns: Arc::clone(fns),
            run_loop: Arc::clone(run_loop),
            tracker: Arc::clone(tracker),
            state: Arc::clone(&chain.state),
            target: chain.idle.clone(),
        };
        chain
            .painted
            .on_settle(move |outcome| idle_step.advance(outcome));

        // Registered before any consumer can subscribe, so observers of
        // `idle` always see the chain as settled.
        let state = Arc::clone(&chain.state);
        chain.idle.on_settle(move |_| {
            let mut state = state.lock();
            *state = state.on_idle();
            debug!(generation, "checkpoint chain settled");
        });

        chain
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ChainState {
        *self.state.lock()
    }

    /// Whether the first checkpoint has resolved, i.e. the chain may be
    /// replaced by a new navigation.
    pub fn navigation_resolved(&self) -> bool {
        self.navigation.is_resolved()
    }

    /// Resolve `navigation_complete`. Returns false if it had already
    /// settled.
    pub fn complete_navigation(&self) -> bool {
        self.navigation.resolve(())
    }

    /// Reject `navigation_complete`; the rejection propagates to `painted`
    /// and `idle` without scheduling anything.
    pub fn fail_navigation(&self, reason: impl Into<anyhow::Error>) -> bool {
        self.navigation.reject(reason)
    }

    pub fn handle(&self, checkpoint: Checkpoint) -> &Deferred<()> {
        match checkpoint {
            Checkpoint::NavigationComplete => &self.navigation,
            Checkpoint::Painted => &self.painted,
            Checkpoint::Idle => &self.idle,
        }
    }

    pub fn future(&self, checkpoint: Checkpoint) -> Settled<()> {
        self.handle(checkpoint).future()
    }
}

/// One derived step: waits on its predecessor, then schedules.
struct Step {
    generation: u64,
    stage: Stage,
    fns: Arc<Mutex<ScheduleFns>>,
    run_loop: Arc<dyn RunLoop>,
    tracker: Arc<QuiescenceTracker>,
    state: Arc<Mutex<ChainState>>,
    target: Deferred<()>,
}

impl Step {
    fn advance(self, predecessor: &Outcome<()>) {
        if let Err(rejection) = predecessor {
            debug!(
                generation = self.generation,
                stage = %self.stage,
                error = %rejection,
                "predecessor rejected; forwarding"
            );
            self.target.settle(Err(rejection.clone()));
            return;
        }

        {
            let mut state = self.state.lock();
            *state = match self.stage {
                Stage::Painting => state.on_navigation_complete(),
                Stage::Idling => state.on_painted(),
            };
        }

        let schedule = {
            let fns = self.fns.lock();
            match self.stage {
                Stage::Painting => fns.painted.clone(),
                Stage::Idling => fns.idle.clone(),
            }
        };

        let token = self.tracker.issue();
        debug!(
            generation = self.generation,
            stage = %self.stage,
            primitive = %schedule.primitive(),
            active_steps = self.tracker.active(),
            "scheduling step"
        );

        let run_loop = self.run_loop;
        let target = self.target;
        schedule.call(Box::new(move || {
            run_loop.later(Box::new(move || {
                // Settle the token first so anything observing the resolved
                // checkpoint sees the step as finished.
                token.settle();
                target.resolve(());
            }));
        }));
    }
}
