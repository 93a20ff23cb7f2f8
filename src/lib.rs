//! Switchboard - command dispatch for network device consoles
//!
//! This library drives interactive command-line sessions on several network
//! devices at once, over serial console cables or SSH, and feeds them
//! batches of commands resolved from a template catalog.
//!
//! ## Features
//!
//! - **Multi-device:** One independent session per connected device
//! - **Template Catalog:** Parameterized commands grouped by category
//! - **Sequencing:** Paced automatic delivery or operator-confirmed stepping
//! - **Events:** Ordered stream of output, progress and errors for any observer
//! - **Transcripts:** Optional JSON-lines or text log of every event
//!
//! ## Module Organization
//!
//! ### Core Functionality
//!
//! - [`orchestrator`] - Device table, routing and connect/disconnect
//! - [`session`] - Per-device lifecycle, reader task and command sequencer
//! - [`transport`] - Serial, SSH and in-memory byte streams
//! - [`catalog`] - Template catalog loading and placeholder resolution
//! - [`events`] - Event types and the subscriber bus
//!
//! ### Support
//!
//! - [`config`] - Configuration loading and validation
//! - [`models`] - Devices, batches and command sets
//! - [`recorder`] - Transcript files
//! - [`mod@error`] - Error types and Result aliases
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchboard::{build_orchestrator, init, SystemConnector, TemplatePick};
//!
//! # async fn run() -> switchboard::Result<()> {
//! let config = init(None)?;
//! let orchestrator = build_orchestrator(&config, Arc::new(SystemConnector::new()))?;
//!
//! orchestrator.connect(config.device("core-1")?.clone()).await?;
//! let picks = [TemplatePick::new("system-settings/configure-hostname")
//!     .with_param("hostname", "CORE1")];
//! orchestrator.dispatch("core-1", &picks).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Every session runs one reader task on the tokio runtime. Serial ports and
//! the SSH client's PTY are blocking handles, so each gets a reader thread
//! and a writer thread bridged to the session through channels.
//!
//! Writes to one device are serialized, and each write is a whole command
//! followed by the transport's line terminator.

#![allow(unexpected_cfgs)]

#[macro_use]
extern crate tracing;

pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod orchestrator;
pub mod recorder;
pub mod session;
pub mod transport;

use std::path::Path;
use std::sync::Arc;

// Re-exports for core functionality
pub use catalog::{Catalog, TemplateId};
pub use config::{Config, ConfigLoader};
pub use error::{Error, ErrorKind, Result};
pub use events::{EngineEvent, EventBus, EventEnvelope, EventSubscription};
pub use orchestrator::Orchestrator;
pub use session::{ExecutionMode, ProbeOutcome, Session, SessionSettings, SessionState};

// Convenience re-exports for common types
pub use models::{
    BatchToken, BaudRate, CommandBatch, CommandSet, Credential, Device, TemplatePick,
    TransportConfig,
};
pub use recorder::{TranscriptFormat, TranscriptRecorder};
pub use transport::{MemoryConnector, SystemConnector, Transport, TransportConnector};

// Version information
/// The current version of Switchboard from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The application name from Cargo.toml
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// The application description from Cargo.toml
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Load and validate the configuration
///
/// With `config_path` the file must exist and parse. Without it the
/// `SWITCHBOARD_CONFIG` variable and the default locations are searched,
/// and built-in defaults are used when no file is found.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if a value
/// fails validation.
pub fn init(config_path: Option<&Path>) -> Result<Config> {
    info!("Initializing {} v{}", NAME, VERSION);

    let mut loader = ConfigLoader::new();
    let config = loader.load(config_path)?;
    match loader.current_path() {
        Some(path) => info!("Configuration loaded from {}", path.display()),
        None => info!("Using default configuration"),
    }

    debug!(
        "{} device profiles, delay {}ms, mode {}",
        config.devices.len(),
        config.engine.default_delay_ms,
        config.engine.default_mode
    );
    Ok(config)
}

/// Build an orchestrator from configuration
///
/// Loads the configured catalog (or the built-in one) and applies the
/// engine timing to every session the orchestrator opens.
pub fn build_orchestrator(
    config: &Config,
    connector: Arc<dyn TransportConnector>,
) -> Result<Orchestrator> {
    let catalog = config.load_catalog().map_err(|e| {
        error!("Failed to load catalog: {}", e);
        e
    })?;
    info!(
        "Catalog ready: {} templates in {} categories",
        catalog.len(),
        catalog.categories().len()
    );

    Ok(Orchestrator::new(connector, Arc::new(catalog)).with_settings(config.session_settings()))
}

/// Error report with recovery hints for startup failures
pub fn handle_startup_error(error: &Error) -> String {
    match error {
        Error::ConfigLoadFailed { path, reason } => {
            format!(
                "Configuration Error: Failed to load config from '{}': {}\n\nTry:\n• Check the path passed with --config or SWITCHBOARD_CONFIG\n• Ensure file permissions are correct",
                path.display(),
                reason
            )
        }
        Error::ConfigParseFailed { format, reason } => {
            format!(
                "Configuration Error: Failed to parse {} config: {}\n\nTry:\n• Check configuration file syntax\n• Ensure file is valid {}",
                format,
                reason,
                format
            )
        }
        Error::ConfigValidationFailed { field, reason } => {
            format!(
                "Configuration Error: Validation failed for '{}': {}\n\nTry:\n• Check configuration value\n• Remove the key to use the default",
                field,
                reason
            )
        }
        Error::CatalogLoadFailed { path, reason } => {
            format!(
                "Catalog Error: Failed to load catalog from '{}': {}\n\nTry:\n• Check catalog.path in the configuration\n• Remove catalog.path to use the built-in catalog",
                path.display(),
                reason
            )
        }
        Error::CatalogSchema { .. } => {
            format!(
                "Catalog Error: {}\n\nTry:\n• Compare the document with catalog/cisco_ios.json",
                error
            )
        }
        Error::DeviceNotFound { device } => {
            format!(
                "Device Error: No device profile named '{}'\n\nTry:\n• Run `switchboard devices` to list profiles\n• Add a [[devices]] entry to the configuration",
                device
            )
        }
        Error::Io(err) => {
            format!(
                "I/O Error: {}\n\nTry:\n• Check file permissions\n• Ensure required directories exist",
                err
            )
        }
        _ => {
            format!(
                "Unexpected Error: {}\n\nPlease report this issue with debug logs enabled",
                error
            )
        }
    }
}
