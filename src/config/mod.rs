//! Configuration management for Switchboard
//!
//! Engine timing, catalog location, logging and named device profiles.
//! Every section has defaults, so an empty file (or no file at all) is a
//! valid configuration.
//!
//! ```toml
//! [engine]
//! default_delay_ms = 500
//! auto_advance = true
//!
//! [logging]
//! level = "debug"
//! transcript = "switchboard.jsonl"
//!
//! [[devices]]
//! id = "core-1"
//! name = "Core Switch"
//! transport = { kind = "serial", port = "/dev/ttyUSB0", baud = 9600 }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::models::Device;
use crate::recorder::TranscriptFormat;
use crate::session::{ExecutionMode, SessionSettings};

pub use loader::ConfigLoader;

/// Main configuration structure for Switchboard
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session timing and default policy
    pub engine: EngineConfig,

    /// Template catalog source
    pub catalog: CatalogConfig,

    /// Log level and transcript file
    pub logging: LoggingConfig,

    /// Named device profiles
    pub devices: Vec<Device>,
}

impl Config {
    /// Check values serde cannot reject on its own
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.logging.validate()?;

        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                return Err(Error::ConfigValidationFailed {
                    field: "devices.id".to_string(),
                    reason: "Device id cannot be empty".to_string(),
                });
            }
            if !seen.insert(device.id.as_str()) {
                return Err(Error::ConfigValidationFailed {
                    field: "devices.id".to_string(),
                    reason: format!("Device id '{}' is defined more than once", device.id),
                });
            }
        }
        Ok(())
    }

    /// Look up a device profile by id
    pub fn device(&self, id: &str) -> Result<&Device> {
        self.devices
            .iter()
            .find(|device| device.id == id)
            .ok_or_else(|| Error::DeviceNotFound {
                device: id.to_string(),
            })
    }

    /// Load the configured catalog, or the built-in one
    pub fn load_catalog(&self) -> Result<Catalog> {
        match &self.catalog.path {
            Some(path) => Catalog::load(path),
            None => Catalog::builtin(),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::from(&self.engine)
    }
}

/// Session timing and default execution policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause between auto-advanced commands
    pub default_delay_ms: u64,

    /// Upper bound on each transport read
    pub poll_interval_ms: u64,

    /// How long disconnect waits for the reader task
    pub close_timeout_ms: u64,

    /// How long a connection test waits for output
    pub probe_wait_ms: u64,

    pub default_mode: ExecutionMode,

    pub auto_advance: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 500,
            poll_interval_ms: 150,
            close_timeout_ms: 2000,
            probe_wait_ms: 500,
            default_mode: ExecutionMode::Queued,
            auto_advance: false,
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::ConfigValidationFailed {
                field: "engine.poll_interval_ms".to_string(),
                reason: "Poll interval must be greater than 0".to_string(),
            });
        }
        if self.close_timeout_ms == 0 {
            return Err(Error::ConfigValidationFailed {
                field: "engine.close_timeout_ms".to_string(),
                reason: "Close timeout must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

impl From<&EngineConfig> for SessionSettings {
    fn from(engine: &EngineConfig) -> Self {
        SessionSettings {
            poll_interval: Duration::from_millis(engine.poll_interval_ms),
            close_timeout: Duration::from_millis(engine.close_timeout_ms),
            default_delay: Duration::from_millis(engine.default_delay_ms),
            probe_wait: Duration::from_millis(engine.probe_wait_ms),
            default_mode: engine.default_mode,
            auto_advance: engine.auto_advance,
        }
    }
}

/// Where the template catalog comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Catalog JSON document; the built-in catalog when absent
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    pub level: String,

    /// Append every event to this file
    pub transcript: Option<PathBuf>,

    pub transcript_format: TranscriptFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            transcript: None,
            transcript_format: TranscriptFormat::JsonLines,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        self.level
            .parse::<LevelFilter>()
            .map(|_| ())
            .map_err(|_| Error::ConfigValidationFailed {
                field: "logging.level".to_string(),
                reason: format!(
                    "'{}' is not one of off, error, warn, info, debug, trace",
                    self.level
                ),
            })
    }
}
