//! Device Transports
//!
//! A transport is a duplex byte stream to one device. The engine only
//! relies on the [`Transport`] contract:
//!
//! - `write` returns once the bytes are handed to the underlying channel
//! - `read_available` waits at most `timeout` and may return no bytes
//! - `close` is idempotent and may be called while another task is
//!   blocked in `read_available`
//!
//! Transports never retry; they surface raw failures and leave recovery
//! to the caller.
//!
//! Concrete transports:
//!
//! - [`serial`] - console cable on a local serial port (Unix)
//! - [`ssh`] - interactive shell through the system `ssh` client in a PTY
//! - [`memory`] - in-process loopback for dry runs and tests

mod bridge;
pub mod memory;
pub mod serial;
pub mod ssh;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::models::{TransportConfig, TransportKind};

pub use memory::{MemoryConnector, MemoryDevice, MemoryTransport};

/// Duplex byte stream to one device
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write bytes to the device
    async fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for device output; an empty result is not an error
    async fn read_available(&self, timeout: Duration) -> Result<Vec<u8>>;

    /// Release the channel; safe to call more than once
    async fn close(&self) -> Result<()>;

    /// Transport family, which decides the line terminator
    fn kind(&self) -> TransportKind;

    /// Endpoint description for logs and events
    fn describe(&self) -> String;

    /// Line terminator appended to commands
    fn line_ending(&self) -> &'static str {
        self.kind().line_ending()
    }
}

/// Opens transports from configuration
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(&self, config: &TransportConfig) -> Result<Box<dyn Transport>>;
}

/// Connector for real devices: serial ports and SSH shells
#[derive(Debug, Clone, Default)]
pub struct SystemConnector {
    ssh: ssh::SshOptions,
}

impl SystemConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override how the `ssh` client is launched
    pub fn with_ssh_options(mut self, options: ssh::SshOptions) -> Self {
        self.ssh = options;
        self
    }
}

#[async_trait]
impl TransportConnector for SystemConnector {
    async fn open(&self, config: &TransportConfig) -> Result<Box<dyn Transport>> {
        match config {
            TransportConfig::Serial(params) => {
                let transport = serial::SerialTransport::open(params.clone()).await?;
                Ok(Box::new(transport))
            }
            TransportConfig::Ssh(params) => {
                let transport = ssh::SshTransport::open(params.clone(), &self.ssh).await?;
                Ok(Box::new(transport))
            }
        }
    }
}
