//! Device Model
//!
//! A device is a switch the operator wants to reach, together with the
//! transport parameters needed to open a console to it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

/// A switch reachable over one transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique identifier used for routing
    pub id: String,

    /// Human readable name
    #[serde(default)]
    pub name: String,

    /// How to reach the device
    pub transport: TransportConfig,
}

impl Device {
    /// Create a device; the display name defaults to the id
    pub fn new(id: impl Into<String>, transport: TransportConfig) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            transport,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Name to show operators
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Transport kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Serial,
    Ssh,
}

impl TransportKind {
    /// Line terminator appended to every command
    pub fn line_ending(self) -> &'static str {
        match self {
            TransportKind::Serial => "\r\n",
            TransportKind::Ssh => "\n",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Serial => f.write_str("serial"),
            TransportKind::Ssh => f.write_str("ssh"),
        }
    }
}

/// Transport-specific connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Console cable on a local serial port
    Serial(SerialParams),
    /// Interactive shell over SSH
    Ssh(SshParams),
}

impl TransportConfig {
    /// Serial transport shorthand
    pub fn serial(port: impl Into<String>, baud: BaudRate) -> Self {
        TransportConfig::Serial(SerialParams {
            port: port.into(),
            baud,
        })
    }

    /// SSH transport shorthand (port 22, no stored credential)
    pub fn ssh(host: impl Into<String>, username: impl Into<String>) -> Self {
        TransportConfig::Ssh(SshParams {
            host: host.into(),
            port: default_ssh_port(),
            username: username.into(),
            credential: None,
        })
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Serial(_) => TransportKind::Serial,
            TransportConfig::Ssh(_) => TransportKind::Ssh,
        }
    }

    /// Short endpoint description, safe to log
    pub fn endpoint(&self) -> String {
        match self {
            TransportConfig::Serial(params) => {
                format!("{} @ {} baud", params.port, params.baud.as_u32())
            }
            TransportConfig::Ssh(params) => {
                format!("{}@{}:{}", params.username, params.host, params.port)
            }
        }
    }
}

/// Serial console parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParams {
    /// Port identifier, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Line speed
    #[serde(default)]
    pub baud: BaudRate,
}

/// SSH shell parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshParams {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    /// Password answered at the first prompt
    #[serde(default, skip_serializing)]
    pub credential: Option<Credential>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Baud rates accepted for console cables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaudRate {
    #[default]
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl BaudRate {
    /// Every accepted rate, slowest first
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    pub fn as_u32(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = crate::Error;

    fn try_from(value: u32) -> crate::Result<Self> {
        BaudRate::ALL
            .into_iter()
            .find(|rate| rate.as_u32() == value)
            .ok_or_else(|| crate::Error::ConfigValidationFailed {
                field: "baud".to_string(),
                reason: format!(
                    "{} is not one of 9600, 19200, 38400, 57600, 115200",
                    value
                ),
            })
    }
}

impl Serialize for BaudRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.as_u32())
    }
}

impl<'de> Deserialize<'de> for BaudRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u32::deserialize(deserializer)?;
        BaudRate::try_from(value).map_err(serde::de::Error::custom)
    }
}

/// A secret sent to the device (SSH password, enable password)
///
/// The value is wiped from memory on drop and never shown by `Debug`.
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    /// Access the secret for writing to a transport
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Credential::new)
    }
}
