//! Scheduling function selection.
//!
//! Three tiers, in order: idle callback (only when the caller prefers idle
//! and idle scheduling is available), animation frame, then immediate
//! invocation. The last tier keeps the pipeline moving on hosts with no
//! rendering primitives at all.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;
use crate::host::{Callback, Host};

/// Which primitive a scheduling step is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePrimitive {
    Idle,
    Frame,
    Immediate,
}

impl fmt::Display for SchedulePrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle-callback"),
            Self::Frame => f.write_str("animation-frame"),
            Self::Immediate => f.write_str("immediate"),
        }
    }
}

/// Pure selection policy.
pub fn select_primitive(capabilities: Capabilities, prefer_idle: bool) -> SchedulePrimitive {
    if prefer_idle && capabilities.idle_scheduling {
        SchedulePrimitive::Idle
    } else if capabilities.frame_scheduling {
        SchedulePrimitive::Frame
    } else {
        SchedulePrimitive::Immediate
    }
}

/// A scheduling primitive bound to a concrete host function.
#[derive(Clone)]
pub struct ScheduleFn {
    primitive: SchedulePrimitive,
    invoke: Arc<dyn Fn(Callback) + Send + Sync>,
}

impl fmt::Debug for ScheduleFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScheduleFn").field(&self.primitive).finish()
    }
}

impl ScheduleFn {
    pub fn immediate() -> Self {
        Self {
            primitive: SchedulePrimitive::Immediate,
            invoke: Arc::new(|callback: Callback| callback()),
        }
    }

    pub fn primitive(&self) -> SchedulePrimitive {
        self.primitive
    }

    pub fn call(&self, callback: Callback) {
        (self.invoke)(callback);
    }

    /// A scheduling function backed by an arbitrary callable.
    pub fn from_fn(
        primitive: SchedulePrimitive,
        invoke: impl Fn(Callback) + Send + Sync + 'static,
    ) -> Self {
        Self {
            primitive,
            invoke: Arc::new(invoke),
        }
    }

    fn bind(primitive: SchedulePrimitive, host: &Host) -> Self {
        match primitive {
            SchedulePrimitive::Idle => {
                if let Some(idle) = host.idle() {
                    let idle = Arc::clone(idle);
                    return Self::from_fn(primitive, move |callback| {
                        idle.request_idle_callback(callback);
                    });
                }
            }
            SchedulePrimitive::Frame => {
                if let Some(frame) = host.frame() {
                    let frame = Arc::clone(frame);
                    return Self::from_fn(primitive, move |callback| {
                        frame.request_animation_frame(callback);
                    });
                }
            }
            SchedulePrimitive::Immediate => {}
        }
        Self::immediate()
    }
}

/// Pick and bind a scheduling function for `host` under `capabilities`.
///
/// Capabilities the host cannot back are treated as unavailable, so an
/// override claiming idle support on a host without an idle primitive
/// falls through to the next tier.
pub fn select_schedule_fn(host: &Host, capabilities: Capabilities, prefer_idle: bool) -> ScheduleFn {
    let primitive = select_primitive(capabilities.backed_by(host), prefer_idle);
    ScheduleFn::bind(primitive, host)
}

/// The two cached selections used by every chain: the painted step never
/// prefers idle, the idle step always does.
#[derive(Debug, Clone)]
pub struct ScheduleFns {
    pub painted: ScheduleFn,
    pub idle: ScheduleFn,
}

impl ScheduleFns {
    pub fn select(host: &Host, capabilities: Capabilities) -> Self {
        Self {
            painted: select_schedule_fn(host, capabilities, false),
            idle: select_schedule_fn(host, capabilities, true),
        }
    }
}
