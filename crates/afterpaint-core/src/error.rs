//! Error types for afterpaint-core
//!
//! The checkpoint pipeline itself has no failure paths: a scheduling
//! primitive that never fires leaves its checkpoint pending. Errors here
//! come from the edges: [`SchedulerConfig::load`], logging setup through
//! [`SchedulerConfig::install_logging`], and [`VirtualHost::run_until`].
//!
//! [`SchedulerConfig::load`]: crate::config::SchedulerConfig::load
//! [`SchedulerConfig::install_logging`]: crate::config::SchedulerConfig::install_logging
//! [`VirtualHost::run_until`]: crate::sim::VirtualHost::run_until

use std::path::PathBuf;
use thiserror::Error;

pub use crate::logging::LogError;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for afterpaint-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Simulated host errors
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Logging initialization errors
    #[error("Logging error: {0}")]
    Log(#[from] LogError),
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised by the virtual host while driving callbacks
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The predicate never held within the allotted turns.
    #[error("host stalled after {turns} turns with work still pending")]
    Stalled { turns: usize },
}
