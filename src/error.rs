//! Error types and Result aliases for Switchboard

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error as ThisError;

/// Result type alias for Switchboard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Switchboard
#[derive(Debug, ThisError)]
pub enum Error {
    // === Transport errors ===
    /// Transport could not be opened
    #[error("Failed to open {transport}: {reason}")]
    Connection { transport: String, reason: String },

    /// Read or write failure on an open transport
    #[error("Transport {operation} failed: {source}")]
    TransportIo {
        operation: IoOperation,
        #[source]
        source: std::io::Error,
    },

    /// The underlying channel reached end of stream
    #[error("Transport channel closed by peer")]
    TransportClosed,

    /// Transport kind cannot be used on this platform
    #[error("{kind} transport is not supported on {platform}")]
    UnsupportedTransport { kind: String, platform: String },

    // === Session errors ===
    /// Operation attempted on a closing, closed or failed session
    #[error("Session for '{device}' is closed")]
    SessionClosed { device: String },

    // === Catalog errors ===
    /// A declared template parameter was not supplied or was empty
    #[error("Missing value for parameter '{name}'")]
    MissingParameter { name: String },

    /// A typed parameter could not be converted
    #[error("Invalid value '{value}' for parameter '{name}': expected {expected}")]
    InvalidParameterType {
        name: String,
        value: String,
        expected: String,
    },

    /// A pattern references a placeholder with no bound value
    #[error("Placeholder '{{{name}}}' has no value")]
    UnresolvedPlaceholder { name: String },

    /// A pattern has unbalanced or empty braces
    #[error("Malformed command pattern '{pattern}': {reason}")]
    MalformedPattern { pattern: String, reason: String },

    /// Template id not present in the catalog
    #[error("Template '{id}' not found in catalog")]
    TemplateNotFound { id: String },

    /// Catalog document violates the expected schema
    #[error("Invalid catalog entry '{item}' in category '{category}': {reason}")]
    CatalogSchema {
        category: String,
        item: String,
        reason: String,
    },

    /// Catalog document could not be read
    #[error("Failed to load catalog from '{}': {reason}", path.display())]
    CatalogLoadFailed { path: PathBuf, reason: String },

    // === Orchestrator errors ===
    /// No open session for the device
    #[error("Device '{device}' is not connected")]
    NotConnected { device: String },

    /// A session for the device already exists
    #[error("Device '{device}' is already connected")]
    AlreadyConnected { device: String },

    /// Device profile not present in the configuration
    #[error("Device profile '{device}' not found")]
    DeviceNotFound { device: String },

    // === Configuration errors ===
    /// Failed to load configuration file
    #[error("Failed to load config from '{}': {reason}", path.display())]
    ConfigLoadFailed { path: PathBuf, reason: String },

    /// Configuration file not found
    #[error("Configuration file not found")]
    ConfigNotFound,

    /// Configuration validation failed
    #[error("Configuration validation failed for '{field}': {reason}")]
    ConfigValidationFailed { field: String, reason: String },

    /// Failed to parse a configuration or command-set document
    #[error("Failed to parse {format} document: {reason}")]
    ConfigParseFailed { format: String, reason: String },

    /// Failed to serialize a configuration or command-set document
    #[error("Failed to serialize {format} document: {reason}")]
    ConfigSerializationFailed { format: String, reason: String },

    // === Transcript errors ===
    /// Transcript file could not be opened
    #[error("Failed to open transcript '{}': {reason}", path.display())]
    TranscriptOpenFailed { path: PathBuf, reason: String },

    // === I/O and serialization errors ===
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    // === Generic fallback (use sparingly) ===
    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Direction of a failed transport operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoOperation {
    Read,
    Write,
    Close,
}

impl std::fmt::Display for IoOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IoOperation::Read => "read",
            IoOperation::Write => "write",
            IoOperation::Close => "close",
        };
        f.write_str(name)
    }
}

/// Coarse error classification carried by `Error` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Io,
    SessionClosed,
    SessionClosedMidBatch,
    MissingParameter,
    InvalidParameterType,
    UnresolvedPlaceholder,
    NotConnected,
    AlreadyConnected,
    Catalog,
    Config,
    Other,
}

impl Error {
    /// Build a transport I/O error
    pub fn io(operation: IoOperation, source: std::io::Error) -> Self {
        Error::TransportIo { operation, source }
    }

    /// Classify this error for event reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection { .. } | Error::UnsupportedTransport { .. } => ErrorKind::Connection,
            Error::TransportIo { .. } | Error::TransportClosed | Error::Io(_) => ErrorKind::Io,
            Error::SessionClosed { .. } => ErrorKind::SessionClosed,
            Error::MissingParameter { .. } => ErrorKind::MissingParameter,
            Error::InvalidParameterType { .. } => ErrorKind::InvalidParameterType,
            Error::UnresolvedPlaceholder { .. } => ErrorKind::UnresolvedPlaceholder,
            Error::MalformedPattern { .. }
            | Error::TemplateNotFound { .. }
            | Error::CatalogSchema { .. }
            | Error::CatalogLoadFailed { .. } => ErrorKind::Catalog,
            Error::NotConnected { .. } | Error::DeviceNotFound { .. } => ErrorKind::NotConnected,
            Error::AlreadyConnected { .. } => ErrorKind::AlreadyConnected,
            Error::ConfigLoadFailed { .. }
            | Error::ConfigNotFound
            | Error::ConfigValidationFailed { .. }
            | Error::ConfigParseFailed { .. }
            | Error::ConfigSerializationFailed { .. }
            | Error::Toml(_) => ErrorKind::Config,
            Error::TranscriptOpenFailed { .. } | Error::Json(_) | Error::Other(_) => {
                ErrorKind::Other
            }
        }
    }

    /// Whether the error means the channel to the device is gone
    pub fn is_terminal_for_session(&self) -> bool {
        matches!(
            self,
            Error::TransportClosed
                | Error::TransportIo {
                    operation: IoOperation::Read,
                    ..
                }
        )
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}
