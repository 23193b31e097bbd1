//! Configuration for the checkpoint scheduler.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! testing = false
//! quiescence_tracking = true
//! router_api = "auto"
//! framework_version = "3.28.0"
//!
//! [capabilities]
//! frame_scheduling = true
//! idle_scheduling = false
//!
//! [log]
//! level = "info"
//! format = "pretty"
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::capabilities::Capabilities;
use crate::error::{ConfigError, Result as CrateResult};
use crate::lifecycle::{FrameworkVersion, RouterApi};
use crate::logging::LogConfig;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Behave as if running under a test harness (forces idle scheduling off
    /// in the detected capabilities).
    pub testing: bool,

    /// Force quiescence tracking on or off. Unset means "on in debug builds".
    pub quiescence_tracking: Option<bool>,

    /// Which router event names to subscribe to.
    pub router_api: RouterApi,

    /// Host framework version, consulted when `router_api` is `auto`.
    pub framework_version: FrameworkVersion,

    /// Capability override applied at construction.
    pub capabilities: Option<Capabilities>,

    pub log: LogConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            testing: false,
            quiescence_tracking: None,
            router_api: RouterApi::Auto,
            framework_version: FrameworkVersion::CURRENT,
            capabilities: None,
            log: LogConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> CrateResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_toml_str(&raw)?)
    }

    /// Install the global subscriber described by `[log]`.
    pub fn install_logging(&self) -> CrateResult<()> {
        crate::logging::init_logging(&self.log)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log
            .level
            .parse::<crate::logging::LogLevel>()
            .map_err(ConfigError::Invalid)?;
        if self.framework_version.major == 0 {
            return Err(ConfigError::Invalid(format!(
                "framework_version {} predates any supported router",
                self.framework_version
            )));
        }
        Ok(())
    }

    /// Whether quiescence bookkeeping is active for this configuration.
    pub fn tracking_enabled(&self) -> bool {
        self.quiescence_tracking.unwrap_or(cfg!(debug_assertions))
    }
}
