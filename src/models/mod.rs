//! Core data models for Switchboard
//!
//! Devices and their transport parameters, template picks, resolved
//! command batches and saved command sets.

pub mod batch;
pub mod command_set;
pub mod device;

// Re-exports for convenience
pub use batch::{BatchToken, CommandBatch, TemplatePick};
pub use command_set::CommandSet;
pub use device::{
    BaudRate, Credential, Device, SerialParams, SshParams, TransportConfig, TransportKind,
};
