//! Deterministic host simulator.
//!
//! [`VirtualHost`] queues frame, idle and run-loop callbacks on separate
//! FIFO lanes and only runs them when told to, so tests and the CLI can
//! step a checkpoint chain one host tick at a time. Consumer futures
//! spawned with [`VirtualHost::spawn`] run as microtasks after every flush.
//!
//! The [`Host`] returned by [`VirtualHost::host`] refers to the simulator
//! weakly. Queued callbacks usually capture that host, and the simulator
//! owns its queues, so a strong reference would form a cycle. Once the last
//! `Arc<VirtualHost>` is dropped, queued work is freed and later requests
//! through the host are discarded.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use afterpaint_promise::spawn::{Task, TaskQueue};
use flume::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{HostError, Result};
use crate::host::{Callback, FrameScheduler, Host, IdleScheduler, RunLoop};

/// Which lane a simulated callback ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Frame,
    Idle,
    RunLoop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame => f.write_str("frame"),
            Self::Idle => f.write_str("idle"),
            Self::RunLoop => f.write_str("run-loop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub tick: u64,
    pub phase: Phase,
}

/// Queue depths at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCallbacks {
    pub frames: usize,
    pub idle: usize,
    pub run_loop: usize,
    pub microtasks: usize,
}

impl PendingCallbacks {
    pub fn total(&self) -> usize {
        self.frames + self.idle + self.run_loop + self.microtasks
    }
}

struct Lane {
    tx: Sender<Callback>,
    rx: Receiver<Callback>,
}

impl Lane {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    fn push(&self, callback: Callback) {
        // Both ends live in the lane, so the channel cannot be disconnected.
        self.tx.send(callback).ok();
    }
}

pub struct VirtualHost {
    frames: Lane,
    idle: Lane,
    run_loop: Lane,
    microtasks: TaskQueue,
    tick: AtomicU64,
    timeline: Mutex<Vec<TimelineEntry>>,
}

impl fmt::Debug for VirtualHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualHost")
            .field("tick", &self.tick())
            .field("pending", &self.pending_callbacks())
            .finish_non_exhaustive()
    }
}

impl VirtualHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Lane::new(),
            idle: Lane::new(),
            run_loop: Lane::new(),
            microtasks: TaskQueue::new(),
            tick: AtomicU64::new(0),
            timeline: Mutex::new(Vec::new()),
        })
    }

    /// A [`Host`] exposing every primitive of this simulator.
    pub fn host(self: &Arc<Self>) -> Host {
        self.host_with(true, true, false)
    }

    /// A [`Host`] exposing only the selected primitives. The run loop is
    /// always present.
    pub fn host_with(self: &Arc<Self>, frame: bool, idle: bool, testing: bool) -> Host {
        let handle = Arc::new(SimHandle(Arc::downgrade(self)));
        let mut builder = Host::builder(Arc::clone(&handle) as Arc<dyn RunLoop>).testing(testing);
        if frame {
            builder = builder.frame(Arc::clone(&handle) as Arc<dyn FrameScheduler>);
        }
        if idle {
            builder = builder.idle(handle as Arc<dyn IdleScheduler>);
        }
        builder.build()
    }

    pub fn flush_frames(&self) -> usize {
        self.flush(&self.frames, Phase::Frame)
    }

    pub fn flush_idle(&self) -> usize {
        self.flush(&self.idle, Phase::Idle)
    }

    pub fn flush_run_loop(&self) -> usize {
        self.flush(&self.run_loop, Phase::RunLoop)
    }

    /// One host turn in browser order: run-loop, frames, idle. Returns
    /// how many callbacks ran.
    pub fn turn(&self) -> usize {
        self.flush_run_loop() + self.flush_frames() + self.flush_idle()
    }

    /// Turn until `done` holds. Returns the number of turns taken, zero if
    /// it already held.
    pub fn run_until(
        &self,
        mut done: impl FnMut() -> bool,
        max_turns: usize,
    ) -> Result<usize> {
        if done() {
            return Ok(0);
        }
        for turns in 1..=max_turns {
            self.turn();
            if done() {
                return Ok(turns);
            }
        }
        Err(HostError::Stalled { turns: max_turns }.into())
    }

    /// Spawn a consumer future onto the microtask queue. Dropping the
    /// returned task cancels it; call `detach` to let it run unobserved.
    pub fn spawn<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.microtasks.spawn_local(future)
    }

    pub fn run_microtasks(&self) -> usize {
        self.microtasks.run_pending()
    }

    /// Number of flushes performed so far.
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    pub fn pending_callbacks(&self) -> PendingCallbacks {
        PendingCallbacks {
            frames: self.frames.rx.len(),
            idle: self.idle.rx.len(),
            run_loop: self.run_loop.rx.len(),
            microtasks: self.microtasks.len(),
        }
    }

    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.timeline.lock().clone()
    }

    fn flush(&self, lane: &Lane, phase: Phase) -> usize {
        let tick = self.tick.fetch_add(1, Ordering::SeqCst) + 1;
        // Only what was queued before this flush; anything scheduled by
        // these callbacks waits for the next one.
        let queued = lane.rx.len();
        let mut ran = 0;
        for _ in 0..queued {
            let Ok(callback) = lane.rx.try_recv() else {
                break;
            };
            callback();
            self.timeline.lock().push(TimelineEntry { tick, phase });
            ran += 1;
        }
        let polled = self.microtasks.run_pending();
        if ran > 0 || polled > 0 {
            trace!(tick, %phase, ran, polled, "flushed");
        }
        ran
    }
}

impl FrameScheduler for VirtualHost {
    fn request_animation_frame(&self, callback: Callback) {
        self.frames.push(callback);
    }
}

impl IdleScheduler for VirtualHost {
    fn request_idle_callback(&self, callback: Callback) {
        self.idle.push(callback);
    }
}

impl RunLoop for VirtualHost {
    fn later(&self, callback: Callback) {
        self.run_loop.push(callback);
    }
}

/// Weak view of a simulator, installed into the hosts it hands out.
struct SimHandle(Weak<VirtualHost>);

impl SimHandle {
    fn dispatch(&self, callback: Callback, push: impl FnOnce(&VirtualHost, Callback)) {
        match self.0.upgrade() {
            Some(sim) => push(&sim, callback),
            None => trace!("virtual host dropped; discarding callback"),
        }
    }
}

impl FrameScheduler for SimHandle {
    fn request_animation_frame(&self, callback: Callback) {
        self.dispatch(callback, |sim, cb| sim.request_animation_frame(cb));
    }
}

impl IdleScheduler for SimHandle {
    fn request_idle_callback(&self, callback: Callback) {
        self.dispatch(callback, |sim, cb| sim.request_idle_callback(cb));
    }
}

impl RunLoop for SimHandle {
    fn later(&self, callback: Callback) {
        self.dispatch(callback, |sim, cb| sim.later(cb));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afterpaint_promise::Deferred;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Callback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        let make = move || -> Callback {
            let sink = Arc::clone(&sink);
            Box::new(move || {
                sink.fetch_add(1, Ordering::SeqCst);
            })
        };
        (hits, make)
    }

    #[test]
    fn lanes_run_only_when_flushed() {
        let sim = VirtualHost::new();
        let (hits, make) = counter();
        sim.request_animation_frame(make());
        sim.request_idle_callback(make());
        sim.later(make());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(sim.pending_callbacks().total(), 3);

        assert_eq!(sim.flush_frames(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sim.flush_idle(), 1);
        assert_eq!(sim.flush_run_loop(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(sim.tick(), 3);
    }

    #[test]
    fn callbacks_queued_during_flush_wait() {
        let sim = VirtualHost::new();
        let inner = Arc::clone(&sim);
        let (hits, make) = counter();
        let nested = make();
        sim.request_animation_frame(Box::new(move || inner.request_animation_frame(nested)));

        assert_eq!(sim.flush_frames(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(sim.pending_callbacks().frames, 1);
        assert_eq!(sim.flush_frames(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn turn_runs_run_loop_then_frames_then_idle() {
        let sim = VirtualHost::new();
        sim.request_idle_callback(Box::new(|| {}));
        sim.request_animation_frame(Box::new(|| {}));
        sim.later(Box::new(|| {}));
        assert_eq!(sim.turn(), 3);
        let phases: Vec<Phase> = sim.timeline().iter().map(|e| e.phase).collect();
        assert_eq!(phases, vec![Phase::RunLoop, Phase::Frame, Phase::Idle]);
        let ticks: Vec<u64> = sim.timeline().iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![1, 2, 3]);
    }

    #[test]
    fn run_until_counts_turns() {
        let sim = VirtualHost::new();
        let done = Deferred::<()>::new("test");
        let target = done.clone();
        let inner = Arc::clone(&sim);
        sim.request_animation_frame(Box::new(move || {
            inner.later(Box::new(move || {
                target.resolve(());
            }));
        }));
        assert_eq!(sim.run_until(|| done.is_resolved(), 10).unwrap(), 2);
        assert_eq!(sim.run_until(|| done.is_resolved(), 10).unwrap(), 0);
    }

    #[test]
    fn run_until_reports_stall() {
        let sim = VirtualHost::new();
        let err = sim.run_until(|| false, 4).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Host(HostError::Stalled { turns: 4 })
        ));
    }

    #[test]
    fn spawned_consumers_run_after_flush() {
        let sim = VirtualHost::new();
        let gate = Deferred::<u32>::new("test");
        let seen = Rc::new(Cell::new(None));
        let sink = Rc::clone(&seen);
        let future = gate.future();
        sim.spawn(async move {
            sink.set(future.await.ok());
        })
        .detach();

        assert_eq!(sim.run_microtasks(), 1);
        assert_eq!(seen.get(), None);

        let resolver = gate.clone();
        sim.later(Box::new(move || {
            resolver.resolve(7);
        }));
        sim.flush_run_loop();
        assert_eq!(seen.get(), Some(7));
        assert_eq!(sim.pending_callbacks(), PendingCallbacks::default());
    }

    #[test]
    fn dropping_the_simulator_frees_queued_work() {
        let sim = VirtualHost::new();
        let host = sim.host();
        let done = Deferred::<()>::new("test");
        let target = done.clone();
        let run_loop = Arc::clone(host.run_loop());
        host.frame().unwrap().request_animation_frame(Box::new(move || {
            run_loop.later(Box::new(move || {
                target.resolve(());
            }));
        }));
        assert_eq!(sim.pending_callbacks().frames, 1);

        let weak = Arc::downgrade(&sim);
        drop(sim);
        assert!(weak.upgrade().is_none());

        host.run_loop().later(Box::new(|| {}));
        assert!(!done.is_settled());
    }

    #[test]
    fn host_with_exposes_selected_primitives() {
        let sim = VirtualHost::new();
        let host = sim.host_with(true, false, true);
        assert!(host.frame().is_some());
        assert!(host.idle().is_none());
        assert!(host.is_testing());
        let full = sim.host();
        assert!(full.idle().is_some());
        assert!(!full.is_testing());
    }
}
