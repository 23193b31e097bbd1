//! afterpaint-core: Core library for afterpaint
//!
//! Approximates three progressively later moments of a page navigation from
//! application code: the navigation finished, the resulting view was
//! painted, and the host went idle after painting. Deferred work hangs off
//! these checkpoints so it runs only after higher-priority paint work.
//!
//! # Architecture
//!
//! ```text
//! Router events → lifecycle adapter → AppScheduler.begin/end
//!                                          ↓
//!                 CheckpointChain: navigation_complete → painted → idle
//!                                          ↓
//!            ScheduleFns (capabilities) → Host: frame / idle / run loop
//!                                          ↓
//!                               QuiescenceTracker → test waiters
//! ```
//!
//! # Modules
//!
//! - `scheduler`: the `AppScheduler` context object
//! - `chain`: checkpoint chain and its state machine
//! - `capabilities`: which scheduling primitives the host offers
//! - `schedule`: three-tier scheduling function selection
//! - `host`: injected host primitives
//! - `lifecycle`: router event adapter and framework versions
//! - `quiescence`: in-flight step counting and waiter registration
//! - `sim`: deterministic virtual host
//! - `config`: TOML configuration
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod capabilities;
pub mod chain;
pub mod config;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod logging;
pub mod quiescence;
pub mod schedule;
pub mod scheduler;
pub mod sim;

pub use afterpaint_promise::{Deferred, Outcome, Rejection, Settled};
pub use capabilities::{Capabilities, CapabilityProvider};
pub use chain::{ChainState, Checkpoint, CheckpointChain, Stage};
pub use config::SchedulerConfig;
pub use error::{ConfigError, Error, HostError, Result};
pub use host::{Callback, FrameScheduler, Host, IdleScheduler, ImmediateRunLoop, RunLoop};
pub use lifecycle::{EventRouter, FrameworkVersion, Router, RouterApi, RouterEvents};
pub use quiescence::{QuiescenceTracker, WaiterRegistry, Waiters};
pub use schedule::{SchedulePrimitive, ScheduleFn, ScheduleFns};
pub use scheduler::{AppScheduler, SchedulerBuilder, SchedulerSnapshot};
pub use sim::VirtualHost;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
