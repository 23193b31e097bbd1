//! Navigation lifecycle adapter.
//!
//! Maps a host router's "navigation will start" / "navigation did finish"
//! events onto `begin_transition` / `end_transition`. Which event names the
//! router emits depends on the host framework version: 3.6 and later emit
//! `routeWillChange`/`routeDidChange`, older versions emit
//! `willTransition`/`didTransition`. The choice is made once from config,
//! never by probing the router.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// The router collaborator.
pub trait Router {
    /// Whether a scheduler has already subscribed to this router.
    fn scheduler_attached(&self) -> bool;

    /// Record that a scheduler subscribed. Called once per router.
    fn mark_scheduler_attached(&self);

    fn on(&self, event: &str, handler: EventHandler);
}

/// A pre/post navigation event name pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouterEvents {
    pub will_change: &'static str,
    pub did_change: &'static str,
}

impl RouterEvents {
    pub const MODERN: Self = Self {
        will_change: "routeWillChange",
        did_change: "routeDidChange",
    };

    pub const LEGACY: Self = Self {
        will_change: "willTransition",
        did_change: "didTransition",
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterApi {
    /// Decide from the framework version.
    #[default]
    Auto,
    Modern,
    Legacy,
}

impl RouterApi {
    pub fn events(self, version: FrameworkVersion) -> RouterEvents {
        match self {
            Self::Modern => RouterEvents::MODERN,
            Self::Legacy => RouterEvents::LEGACY,
            Self::Auto if version.has_route_change_events() => RouterEvents::MODERN,
            Self::Auto => RouterEvents::LEGACY,
        }
    }
}

impl FromStr for RouterApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "modern" => Ok(Self::Modern),
            "legacy" => Ok(Self::Legacy),
            _ => Err(format!(
                "unknown router api: {s}. Expected one of: auto, modern, legacy"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameworkVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FrameworkVersion {
    /// First version whose router emits `routeWillChange`/`routeDidChange`.
    pub const ROUTE_CHANGE_EVENTS: Self = Self::new(3, 6, 0);
    pub const CURRENT: Self = Self::new(3, 28, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn has_route_change_events(self) -> bool {
        self >= Self::ROUTE_CHANGE_EVENTS
    }
}

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FrameworkVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |name: &str| -> Result<u32, String> {
            match parts.next() {
                Some(raw) => raw
                    .parse::<u32>()
                    .map_err(|_| format!("invalid {name} component in version {s:?}")),
                None => Ok(0),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(format!("version {s:?} has more than three components"));
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl TryFrom<String> for FrameworkVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FrameworkVersion> for String {
    fn from(value: FrameworkVersion) -> Self {
        value.to_string()
    }
}

/// Subscribe `will_change`/`did_change` handlers to `router` once.
///
/// Returns false without subscribing if the router already carries the
/// attachment marker.
pub fn attach(
    router: &dyn Router,
    events: RouterEvents,
    will_change: EventHandler,
    did_change: EventHandler,
) -> bool {
    if router.scheduler_attached() {
        trace!("router already attached; skipping");
        return false;
    }
    router.mark_scheduler_attached();
    router.on(events.will_change, will_change);
    router.on(events.did_change, did_change);
    debug!(
        will_change = events.will_change,
        did_change = events.did_change,
        "attached to router"
    );
    true
}

/// A minimal event-emitting router.
#[derive(Default)]
pub struct EventRouter {
    attached: AtomicBool,
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock();
        let mut events: Vec<(&str, usize)> =
            handlers.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        events.sort_unstable();
        f.debug_struct("EventRouter")
            .field("attached", &self.attached.load(Ordering::SeqCst))
            .field("events", &events)
            .finish()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every handler registered for `event`; returns how many ran.
    /// Handlers run outside the registry lock.
    pub fn emit(&self, event: &str) -> usize {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .get(event)
            .map(|list| list.to_vec())
            .unwrap_or_default();
        for handler in &handlers {
            handler();
        }
        handlers.len()
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.lock().get(event).map_or(0, Vec::len)
    }
}

impl Router for EventRouter {
    fn scheduler_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn mark_scheduler_attached(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, EventHandler) {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        let handler: EventHandler = Arc::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        (hits, handler)
    }

    #[test]
    fn version_parsing() {
        assert_eq!(
            "3.6.0".parse::<FrameworkVersion>().unwrap(),
            FrameworkVersion::new(3, 6, 0)
        );
        assert_eq!(
            "2.18".parse::<FrameworkVersion>().unwrap(),
            FrameworkVersion::new(2, 18, 0)
        );
        assert!("3.x.0".parse::<FrameworkVersion>().is_err());
        assert!("1.2.3.4".parse::<FrameworkVersion>().is_err());
        assert_eq!(FrameworkVersion::new(3, 12, 1).to_string(), "3.12.1");
    }

    #[test]
    fn route_change_events_start_at_3_6() {
        assert!(!FrameworkVersion::new(3, 5, 9).has_route_change_events());
        assert!(FrameworkVersion::new(3, 6, 0).has_route_change_events());
        assert!(FrameworkVersion::new(4, 0, 0).has_route_change_events());
    }

    #[test]
    fn auto_api_follows_version() {
        assert_eq!(
            RouterApi::Auto.events(FrameworkVersion::new(3, 4, 0)),
            RouterEvents::LEGACY
        );
        assert_eq!(
            RouterApi::Auto.events(FrameworkVersion::CURRENT),
            RouterEvents::MODERN
        );
        assert_eq!(
            RouterApi::Legacy.events(FrameworkVersion::CURRENT),
            RouterEvents::LEGACY
        );
        assert_eq!(
            RouterApi::Modern.events(FrameworkVersion::new(2, 0, 0)),
            RouterEvents::MODERN
        );
    }

    #[test]
    fn router_api_from_str() {
        assert_eq!("Legacy".parse::<RouterApi>().unwrap(), RouterApi::Legacy);
        assert!("newest".parse::<RouterApi>().is_err());
    }

    #[test]
    fn attach_subscribes_once() {
        let router = EventRouter::new();
        let (begins, will) = counter();
        let (ends, did) = counter();

        assert!(attach(&router, RouterEvents::MODERN, will.clone(), did.clone()));
        assert!(!attach(&router, RouterEvents::MODERN, will, did));
        assert_eq!(router.handler_count("routeWillChange"), 1);

        assert_eq!(router.emit("routeWillChange"), 1);
        assert_eq!(router.emit("routeDidChange"), 1);
        assert_eq!(router.emit("willTransition"), 0);
        assert_eq!(begins.load(Ordering::SeqCst), 1);
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn legacy_names_are_used_when_selected() {
        let router = EventRouter::new();
        let (begins, will) = counter();
        let (_, did) = counter();
        attach(&router, RouterEvents::LEGACY, will, did);
        router.emit("willTransition");
        assert_eq!(begins.load(Ordering::SeqCst), 1);
        assert_eq!(router.handler_count("routeWillChange"), 0);
        assert!(format!("{router:?}").contains("didTransition"));
    }

    #[test]
    fn version_serde_is_a_string() {
        let json = serde_json::to_string(&FrameworkVersion::new(3, 6, 0)).unwrap();
        assert_eq!(json, "\"3.6.0\"");
        let back: FrameworkVersion = serde_json::from_str("\"2.9.1\"").unwrap();
        assert_eq!(back, FrameworkVersion::new(2, 9, 1));
    }
}
