//! Which scheduling primitives the host offers.
//!
//! Defaults are derived from the [`Host`]: frame scheduling is available
//! when the host exposes a frame primitive, idle scheduling when it exposes
//! an idle primitive and is not running under a test harness. An explicit
//! override replaces the defaults wholesale.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::host::Host;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, alias = "frame")]
    pub frame_scheduling: bool,
    #[serde(default, alias = "idle")]
    pub idle_scheduling: bool,
}

impl Capabilities {
    pub const NONE: Self = Self::new(false, false);
    pub const FRAME_ONLY: Self = Self::new(true, false);
    pub const IDLE_ONLY: Self = Self::new(false, true);
    pub const ALL: Self = Self::new(true, true);

    pub const fn new(frame_scheduling: bool, idle_scheduling: bool) -> Self {
        Self {
            frame_scheduling,
            idle_scheduling,
        }
    }

    /// Defaults computed from what the host exposes.
    pub fn detect(host: &Host) -> Self {
        Self {
            frame_scheduling: host.frame().is_some(),
            idle_scheduling: host.idle().is_some() && !host.is_testing(),
        }
    }

    /// Only the capabilities the host can actually back with a primitive.
    pub fn backed_by(self, host: &Host) -> Self {
        Self {
            frame_scheduling: self.frame_scheduling && host.frame().is_some(),
            idle_scheduling: self.idle_scheduling && host.idle().is_some(),
        }
    }
}

/// Holds the active capability override, if any.
#[derive(Debug, Clone, Default)]
pub struct CapabilityProvider {
    overrides: Option<Capabilities>,
}

impl CapabilityProvider {
    /// Install `overrides` for `host`, warning if the host cannot back them.
    pub fn new(overrides: Option<Capabilities>, host: &Host) -> Self {
        warn_if_unbacked(overrides, host);
        Self { overrides }
    }

    /// The override if one is set, otherwise the host-derived defaults.
    pub fn get(&self, host: &Host) -> Capabilities {
        self.overrides.unwrap_or_else(|| Capabilities::detect(host))
    }

    /// Replace the override; `None` restores host detection.
    pub fn set(&mut self, overrides: Option<Capabilities>, host: &Host) {
        info!(overrides = ?overrides, "capabilities overridden");
        warn_if_unbacked(overrides, host);
        self.overrides = overrides;
    }

    pub fn overrides(&self) -> Option<Capabilities> {
        self.overrides
    }
}

// Called on install only, never per selection.
fn warn_if_unbacked(overrides: Option<Capabilities>, host: &Host) {
    let Some(requested) = overrides else {
        return;
    };
    let available = requested.backed_by(host);
    if available != requested {
        warn!(
            ?requested,
            ?available,
            "capability override names primitives the host lacks"
        );
    }
}
