//! The application scheduler: one context object owning the current
//! checkpoint chain.
//!
//! `AppScheduler` is cheap to clone; every clone shares the same chain,
//! capability override and quiescence tracker. Independent instances do not
//! share anything, so tests can run several side by side.
//!
//! Navigation events drive it:
//! - [`AppScheduler::begin_transition`] rebuilds the chain, but only when
//!   the previous navigation already completed. Overlapping begins are
//!   no-ops, so a redirect mid-navigation keeps the chain callers are
//!   already waiting on.
//! - [`AppScheduler::end_transition`] resolves `navigation_complete`; the
//!   painted and idle checkpoints follow through the host.
//!
//! Accessors read the current chain on every call. A future taken before a
//! rebuild keeps observing the chain it came from.
//!
//! The scheduling functions live in one shared slot that every chain reads
//! from when a step starts. Reselecting (on each `begin_transition` and on
//! `set_capabilities`) therefore also reaches steps of the chain in flight
//! that have not been scheduled yet.

use std::sync::Arc;

use afterpaint_promise::Settled;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::capabilities::{Capabilities, CapabilityProvider};
use crate::chain::{ChainState, Checkpoint, CheckpointChain};
use crate::config::SchedulerConfig;
use crate::host::Host;
use crate::lifecycle::{self, EventHandler, Router, RouterEvents};
use crate::quiescence::{QuiescenceTracker, WAITER_LABEL, WaiterRegistry};
use crate::schedule::{SchedulePrimitive, ScheduleFns};

/// Point-in-time view of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Chain generation; 0 after construction or reset.
    pub generation: u64,
    pub state: ChainState,
    /// Effective capabilities (override or host defaults).
    pub capabilities: Capabilities,
    /// Primitive bound to the painted step.
    pub painted: SchedulePrimitive,
    /// Primitive bound to the idle step.
    pub idle: SchedulePrimitive,
    pub active_steps: usize,
    pub quiescent: bool,
}

struct State {
    capabilities: CapabilityProvider,
    chain: CheckpointChain,
}

struct Inner {
    host: Host,
    tracker: Arc<QuiescenceTracker>,
    router_events: RouterEvents,
    /// Lock order: `state`, then `fns`. Steps take `fns` alone.
    state: Mutex<State>,
    fns: Arc<Mutex<ScheduleFns>>,
}

impl Inner {
    fn refresh_fns(&self, state: &State) -> ScheduleFns {
        let fns = ScheduleFns::select(&self.host, state.capabilities.get(&self.host));
        *self.fns.lock() = fns.clone();
        fns
    }
}

#[derive(Clone)]
pub struct AppScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AppScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppScheduler")
            .field("host", &self.inner.host)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl AppScheduler {
    pub fn builder(host: Host) -> SchedulerBuilder {
        SchedulerBuilder {
            host,
            config: SchedulerConfig::default(),
            waiters: None,
        }
    }

    /// A scheduler with default configuration.
    pub fn new(host: Host) -> Self {
        Self::builder(host).build()
    }

    /// A new navigation started.
    ///
    /// Returns true if a fresh chain was built, false if the previous
    /// navigation is still in flight and the current chain was kept.
    pub fn begin_transition(&self) -> bool {
        let inner = &*self.inner;
        let mut state = inner.state.lock();
        let fns = inner.refresh_fns(&state);

        if !state.chain.navigation_resolved() {
            trace!(
                generation = state.chain.generation(),
                "navigation already in flight; keeping current chain"
            );
            return false;
        }

        let generation = state.chain.generation() + 1;
        state.chain = CheckpointChain::pending(
            generation,
            &inner.fns,
            inner.host.run_loop(),
            &inner.tracker,
        );
        debug!(
            generation,
            painted = %fns.painted.primitive(),
            idle = %fns.idle.primitive(),
            "navigation began; chain rebuilt"
        );
        true
    }

    /// The current navigation finished. Returns false if
    /// `navigation_complete` had already settled.
    pub fn end_transition(&self) -> bool {
        // Resolution runs continuations, which may call back into the
        // scheduler; the lock must not be held.
        let chain = self.inner.state.lock().chain.clone();
        let resolved = chain.complete_navigation();
        if resolved {
            debug!(generation = chain.generation(), "navigation complete");
        } else {
            trace!(generation = chain.generation(), "navigation already complete");
        }
        resolved
    }

    /// Replace the chain with a settled one and zero the quiescence count.
    pub fn reset(&self) {
        self.inner.state.lock().chain = CheckpointChain::settled(0);
        self.inner.tracker.reset();
        debug!("scheduler reset");
    }

    pub fn did_transition(&self) -> Settled<()> {
        self.checkpoint(Checkpoint::NavigationComplete)
    }

    pub fn when_route_painted(&self) -> Settled<()> {
        self.checkpoint(Checkpoint::Painted)
    }

    pub fn when_route_idle(&self) -> Settled<()> {
        self.checkpoint(Checkpoint::Idle)
    }

    /// Alias of [`when_route_idle`](Self::when_route_idle) for test code.
    pub fn route_settled(&self) -> Settled<()> {
        self.when_route_idle()
    }

    pub fn checkpoint(&self, checkpoint: Checkpoint) -> Settled<()> {
        self.inner.state.lock().chain.future(checkpoint)
    }

    /// The current chain. Holding it does not keep it current.
    pub fn chain(&self) -> CheckpointChain {
        self.inner.state.lock().chain.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        let state = self.inner.state.lock();
        state.capabilities.get(&self.inner.host)
    }

    /// Override the host capabilities and reselect the scheduling
    /// functions immediately. `None` restores host detection.
    ///
    /// Steps of the current chain that have not started yet use the new
    /// selection.
    #[cfg(any(debug_assertions, feature = "test-hooks"))]
    pub fn set_capabilities(&self, overrides: Option<Capabilities>) {
        let inner = &*self.inner;
        let mut state = inner.state.lock();
        state.capabilities.set(overrides, &inner.host);
        inner.refresh_fns(&state);
    }

    pub fn schedule_fns(&self) -> ScheduleFns {
        self.inner.fns.lock().clone()
    }

    pub fn chain_state(&self) -> ChainState {
        self.inner.state.lock().chain.state()
    }

    pub fn generation(&self) -> u64 {
        self.inner.state.lock().chain.generation()
    }

    pub fn is_quiescent(&self) -> bool {
        self.inner.tracker.is_quiescent()
    }

    pub fn active_steps(&self) -> usize {
        self.inner.tracker.active()
    }

    pub fn tracker(&self) -> &Arc<QuiescenceTracker> {
        &self.inner.tracker
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    pub fn router_events(&self) -> RouterEvents {
        self.inner.router_events
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let (generation, state, capabilities) = {
            let state = self.inner.state.lock();
            (
                state.chain.generation(),
                state.chain.state(),
                state.capabilities.get(&self.inner.host),
            )
        };
        let (painted, idle) = {
            let fns = self.inner.fns.lock();
            (fns.painted.primitive(), fns.idle.primitive())
        };
        SchedulerSnapshot {
            generation,
            state,
            capabilities,
            painted,
            idle,
            active_steps: self.active_steps(),
            quiescent: self.is_quiescent(),
        }
    }

    /// Subscribe to `router`'s navigation events. Idempotent per router.
    pub fn setup_router(&self, router: &dyn Router) -> bool {
        let begin = self.clone();
        let end = self.clone();
        let will_change: EventHandler = Arc::new(move || {
            begin.begin_transition();
        });
        let did_change: EventHandler = Arc::new(move || {
            end.end_transition();
        });
        lifecycle::attach(router, self.inner.router_events, will_change, did_change)
    }

    /// Register the quiescence predicate with `registry`. Does nothing and
    /// returns false when tracking is disabled.
    pub fn register_waiter(&self, registry: &dyn WaiterRegistry) -> bool {
        if !self.inner.tracker.enabled() {
            return false;
        }
        let tracker = Arc::clone(&self.inner.tracker);
        registry.register_waiter(WAITER_LABEL, Box::new(move || tracker.is_quiescent()));
        true
    }
}

#[must_use]
pub struct SchedulerBuilder {
    host: Host,
    config: SchedulerConfig,
    waiters: Option<Arc<dyn WaiterRegistry>>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capabilities(mut self, overrides: Option<Capabilities>) -> Self {
        self.config.capabilities = overrides;
        self
    }

    pub fn quiescence_tracking(mut self, enabled: bool) -> Self {
        self.config.quiescence_tracking = Some(enabled);
        self
    }

    pub fn waiter_registry(mut self, registry: Arc<dyn WaiterRegistry>) -> Self {
        self.waiters = Some(registry);
        self
    }

    pub fn build(self) -> AppScheduler {
        let Self {
            host,
            config,
            waiters,
        } = self;
        let host = if config.testing {
            host.with_testing(true)
        } else {
            host
        };

        let capabilities = CapabilityProvider::new(config.capabilities, &host);
        let fns = ScheduleFns::select(&host, capabilities.get(&host));
        let router_events = config.router_api.events(config.framework_version);
        debug!(
            ?host,
            painted = %fns.painted.primitive(),
            idle = %fns.idle.primitive(),
            will_change = router_events.will_change,
            did_change = router_events.did_change,
            "scheduler constructed"
        );

        let scheduler = AppScheduler {
            inner: Arc::new(Inner {
                host,
                tracker: QuiescenceTracker::new(config.tracking_enabled()),
                router_events,
                state: Mutex::new(State {
                    capabilities,
                    chain: CheckpointChain::settled(0),
                }),
                fns: Arc::new(Mutex::new(fns)),
            }),
        };
        if let Some(registry) = waiters {
            scheduler.register_waiter(registry.as_ref());
        }
        scheduler
    }
}
