//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. `config/phyphox_sync.toml` (base configuration)
//! 2. Environment variables prefixed with `PHYPHOX_SYNC_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use phyphox_sync::config::SyncConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::load()?;
//! config.validate()?;
//! println!("Device: {}", config.connection.base_url());
//! # Ok(())
//! # }
//! ```

use crate::connection::ConnectionSettings;
use crate::error::{SyncError, SyncResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/phyphox_sync.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "PHYPHOX_SYNC_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Device address
    pub connection: ConnectionSettings,
    /// Buffers to mirror
    pub experiment: ExperimentSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Buffer layout and polling rate of the mirrored experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    /// Remote buffer names, in request order
    pub buffers: Vec<String>,
    /// Monotonic reference buffer enabling incremental polls
    #[serde(default)]
    pub continuous_buffer: Option<String>,
    /// Delay between polls in milliseconds
    #[serde(default = "default_update_rate")]
    pub update_rate_ms: u64,
}

impl ExperimentSettings {
    /// Delay between polls.
    pub fn update_rate(&self) -> Duration {
        Duration::from_millis(self.update_rate_ms)
    }

    /// Position of the continuous buffer in `buffers`, if it is configured and present.
    pub fn continuous_index(&self) -> Option<usize> {
        let name = self.continuous_buffer.as_ref()?;
        self.buffers.iter().position(|buffer| buffer == name)
    }
}

fn default_name() -> String {
    "phyphox-sync".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_update_rate() -> u64 {
    200
}

impl SyncConfig {
    /// Load configuration from `config/phyphox_sync.toml` and environment variables
    ///
    /// Example override: `PHYPHOX_SYNC_CONNECTION__HOST=10.0.0.5`
    pub fn load() -> SyncResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> SyncResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(SyncError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.connection.host.trim().is_empty() {
            return Err(SyncError::Configuration("connection.host is empty".to_string()));
        }
        if self.connection.port == 0 {
            return Err(SyncError::Configuration("connection.port must not be 0".to_string()));
        }

        let experiment = &self.experiment;
        if experiment.buffers.is_empty() {
            return Err(SyncError::Configuration(
                "experiment.buffers must name at least one buffer".to_string(),
            ));
        }
        if experiment.update_rate_ms == 0 {
            return Err(SyncError::Configuration(
                "experiment.update_rate_ms must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for name in &experiment.buffers {
            if name.is_empty() {
                return Err(SyncError::Configuration(
                    "experiment.buffers contains an empty name".to_string(),
                ));
            }
            if !names.insert(name) {
                return Err(SyncError::Configuration(format!("Duplicate buffer name: {name}")));
            }
        }

        if let Some(continuous) = &experiment.continuous_buffer {
            if !names.contains(continuous) {
                return Err(SyncError::Configuration(format!(
                    "Continuous buffer '{continuous}' is not listed in experiment.buffers"
                )));
            }
        }

        Ok(())
    }
}
