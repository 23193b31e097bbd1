//! Host collaborators the scheduler is handed instead of probing globals.
//!
//! A [`Host`] bundles the optional next-frame and idle-period primitives,
//! the mandatory zero-delay run loop, and whether the process is running
//! under a test harness. Everything the checkpoint chain schedules goes
//! through these traits.

use std::fmt;
use std::sync::Arc;

use crate::capabilities::Capabilities;

/// A one-shot callback handed to a host primitive.
pub type Callback = Box<dyn FnOnce() + Send>;

/// Runs a callback before the next frame is painted.
pub trait FrameScheduler: Send + Sync {
    fn request_animation_frame(&self, callback: Callback);
}

/// Runs a callback during the next idle period.
pub trait IdleScheduler: Send + Sync {
    fn request_idle_callback(&self, callback: Callback);
}

/// Runs a callback after a zero-delay tick of the host run loop.
pub trait RunLoop: Send + Sync {
    fn later(&self, callback: Callback);
}

/// A run loop with no queue: callbacks run inline.
///
/// Suitable for headless embedding where there is no event loop to defer
/// to. Chains built on it settle synchronously inside `end_transition`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateRunLoop;

impl RunLoop for ImmediateRunLoop {
    fn later(&self, callback: Callback) {
        callback();
    }
}

#[derive(Clone)]
pub struct Host {
    frame: Option<Arc<dyn FrameScheduler>>,
    idle: Option<Arc<dyn IdleScheduler>>,
    run_loop: Arc<dyn RunLoop>,
    testing: bool,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("frame", &self.frame.is_some())
            .field("idle", &self.idle.is_some())
            .field("testing", &self.testing)
            .finish_non_exhaustive()
    }
}

impl Host {
    pub fn builder(run_loop: Arc<dyn RunLoop>) -> HostBuilder {
        HostBuilder {
            host: Self {
                frame: None,
                idle: None,
                run_loop,
                testing: false,
            },
        }
    }

    /// A host with no scheduling primitives and an inline run loop.
    pub fn headless() -> Self {
        Self::builder(Arc::new(ImmediateRunLoop)).build()
    }

    pub fn frame(&self) -> Option<&Arc<dyn FrameScheduler>> {
        self.frame.as_ref()
    }

    pub fn idle(&self) -> Option<&Arc<dyn IdleScheduler>> {
        self.idle.as_ref()
    }

    pub fn run_loop(&self) -> &Arc<dyn RunLoop> {
        &self.run_loop
    }

    pub fn is_testing(&self) -> bool {
        self.testing
    }

    /// Capabilities derived from the primitives this host exposes.
    pub fn default_capabilities(&self) -> Capabilities {
        Capabilities::detect(self)
    }

    #[must_use]
    pub fn with_testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }
}

#[must_use]
pub struct HostBuilder {
    host: Host,
}

impl HostBuilder {
    pub fn frame(mut self, frame: Arc<dyn FrameScheduler>) -> Self {
        self.host.frame = Some(frame);
        self
    }

    pub fn idle(mut self, idle: Arc<dyn IdleScheduler>) -> Self {
        self.host.idle = Some(idle);
        self
    }

    pub fn testing(mut self, testing: bool) -> Self {
        self.host.testing = testing;
        self
    }

    pub fn build(self) -> Host {
        self.host
    }
}
