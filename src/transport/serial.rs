//! Serial console transport
//!
//! Opens a local serial port in raw 8N1 mode at the configured baud rate.
//! Reads use a short `VTIME` so the reader thread wakes up regularly and
//! notices `close` without needing the peer to send anything.
//!
//! The port is opened non-blocking so a line without carrier detect cannot
//! hang the open, then switched back to blocking I/O once `CLOCAL` is set.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use super::bridge::{BridgeOptions, ChannelStreams};
use super::Transport;
use crate::error::{Error, Result};
use crate::models::{SerialParams, TransportKind};

/// Device names of USB adapters, CDC modems and on-board UARTs
const PORT_PREFIXES: &[&str] = &["ttyUSB", "ttyACM", "ttyS", "cu.usbserial", "cu.usbmodem"];

/// Serial port opened in raw mode
pub struct SerialTransport {
    params: SerialParams,
    streams: ChannelStreams,
}

impl SerialTransport {
    /// Open and configure the port
    pub async fn open(params: SerialParams) -> Result<Self> {
        let port = params.port.clone();
        tokio::task::spawn_blocking(move || open_blocking(params))
            .await
            .map_err(|e| Error::Connection {
                transport: format!("serial port {}", port),
                reason: e.to_string(),
            })?
    }

    pub fn params(&self) -> &SerialParams {
        &self.params
    }

    /// Serial ports present on this machine, in natural order
    #[cfg(unix)]
    pub fn available_ports() -> Result<Vec<String>> {
        ports_in(Path::new("/dev"))
    }

    #[cfg(not(unix))]
    pub fn available_ports() -> Result<Vec<String>> {
        Err(Error::UnsupportedTransport {
            kind: TransportKind::Serial.to_string(),
            platform: std::env::consts::OS.to_string(),
        })
    }
}

/// Serial device nodes directly under `dir`
#[cfg_attr(not(unix), allow(dead_code))]
fn ports_in(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if PORT_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            names.push(name);
        }
    }
    names.sort_by(|a, b| port_order(a).cmp(&port_order(b)));
    Ok(names
        .into_iter()
        .map(|name| dir.join(name).display().to_string())
        .collect())
}

/// `ttyS10` sorts after `ttyS2`
fn port_order(name: &str) -> (&str, u64, &str) {
    let stem = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let number = name[stem.len()..].parse().unwrap_or(0);
    (stem, number, name)
}

#[cfg(unix)]
fn open_blocking(params: SerialParams) -> Result<SerialTransport> {
    use nix::fcntl::OFlag;
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    let connection_error = |reason: String| Error::Connection {
        transport: format!("serial port {}", params.port),
        reason,
    };

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags((OFlag::O_NOCTTY | OFlag::O_NONBLOCK).bits())
        .open(&params.port)
        .map_err(|e| connection_error(e.to_string()))?;

    unix::configure(&file, params.baud).map_err(|e| connection_error(e.to_string()))?;
    unix::set_blocking(&file).map_err(|e| connection_error(e.to_string()))?;

    let reader = file
        .try_clone()
        .map_err(|e| connection_error(e.to_string()))?;
    let streams = ChannelStreams::spawn(
        BridgeOptions {
            label: "serial".to_string(),
            zero_read_is_eof: false,
        },
        reader,
        file,
    )?;

    info!(
        "Opened serial port {} at {} baud",
        params.port,
        params.baud.as_u32()
    );
    Ok(SerialTransport { params, streams })
}

#[cfg(not(unix))]
fn open_blocking(_params: SerialParams) -> Result<SerialTransport> {
    Err(Error::UnsupportedTransport {
        kind: TransportKind::Serial.to_string(),
        platform: std::env::consts::OS.to_string(),
    })
}

#[cfg(unix)]
mod unix {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    use nix::sys::termios::{
        self, BaudRate as TermiosBaud, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices,
    };
    use std::fs::File;

    use crate::models::BaudRate;

    /// Tenths of a second a read may wait for the first byte
    const READ_TIMEOUT_DECISECONDS: u8 = 2;

    fn termios_baud(baud: BaudRate) -> TermiosBaud {
        match baud {
            BaudRate::B9600 => TermiosBaud::B9600,
            BaudRate::B19200 => TermiosBaud::B19200,
            BaudRate::B38400 => TermiosBaud::B38400,
            BaudRate::B57600 => TermiosBaud::B57600,
            BaudRate::B115200 => TermiosBaud::B115200,
        }
    }

    /// Raw 8N1, no flow control, polling reads
    pub(super) fn configure(file: &File, baud: BaudRate) -> nix::Result<()> {
        let mut tio = termios::tcgetattr(file)?;
        termios::cfmakeraw(&mut tio);
        termios::cfsetspeed(&mut tio, termios_baud(baud))?;

        tio.control_flags &= !(ControlFlags::CSIZE | ControlFlags::CSTOPB | ControlFlags::PARENB);
        tio.control_flags |= ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD;

        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = READ_TIMEOUT_DECISECONDS;

        termios::tcsetattr(file, SetArg::TCSANOW, &tio)?;
        termios::tcflush(file, FlushArg::TCIOFLUSH)
    }

    /// Clear `O_NONBLOCK` so reads honour `VTIME` again
    pub(super) fn set_blocking(file: &File) -> nix::Result<()> {
        let flags = OFlag::from_bits_truncate(fcntl(file, FcntlArg::F_GETFL)?);
        fcntl(file, FcntlArg::F_SETFL(flags & !OFlag::O_NONBLOCK))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write(&self, bytes: &[u8]) -> Result<()> {
        self.streams.write(bytes).await
    }

    async fn read_available(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.streams.read(timeout).await
    }

    async fn close(&self) -> Result<()> {
        if !self.streams.is_closed() {
            debug!("Closing serial port {}", self.params.port);
        }
        self.streams.close();
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.params.port, self.params.baud.as_u32())
    }
}
