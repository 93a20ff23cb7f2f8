//! Device Sessions
//!
//! A [`Session`] owns one open transport. It serializes every write to the
//! transport, runs a reader task that turns device output into events, and
//! carries the per-device execution state used by the [`Sequencer`].
//!
//! ## Lifecycle
//!
//! `Connecting -> Open -> Closing -> Closed`, or `Open -> Failed` when a
//! read fails. A failed session rejects all further sends exactly like a
//! closed one; reconnecting means opening a new session.
//!
//! ## Locking
//!
//! - `state`: lifecycle, held only for short checks
//! - `write_lock`: one in-flight write at a time; the lifecycle is checked
//!   again after it is acquired so `close` fences new writes
//! - `execution`: queue and policy, always taken before the event bus lock

mod decoder;
pub mod sequencer;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus};
use crate::models::{Credential, Device, TransportKind};
use crate::transport::{Transport, TransportConnector};
use decoder::Utf8Decoder;
use sequencer::ExecutionState;

pub use sequencer::{DrainPolicy, ExecutionMode, Sequencer};

/// Command sent when a probe gets no answer to a bare line ending
pub const PROBE_FALLBACK_COMMAND: &str = "show version";

/// Timing and default policy for new sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Upper bound on each transport read
    pub poll_interval: Duration,
    /// How long `close` waits for the reader task
    pub close_timeout: Duration,
    /// Pause between auto-advanced commands
    pub default_delay: Duration,
    /// How long a probe waits for any output
    pub probe_wait: Duration,
    pub default_mode: ExecutionMode,
    pub auto_advance: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(150),
            close_timeout: Duration::from_millis(2000),
            default_delay: Duration::from_millis(500),
            probe_wait: Duration::from_millis(500),
            default_mode: ExecutionMode::Queued,
            auto_advance: false,
        }
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a connection test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Output arrived after the bare line ending
    Responsive,
    /// Nothing arrived; the fallback command was sent
    NoResponse,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub device: String,
    pub name: String,
    pub endpoint: String,
    pub state: SessionState,
    pub mode: ExecutionMode,
    pub auto_advance: bool,
    pub pending: usize,
}

/// What a write announces on the event bus
enum Announce<'a> {
    Command(&'a str),
    Credentials,
    Nothing,
}

/// Live binding between the engine and one device
pub struct Session {
    device: Device,
    transport: Box<dyn Transport>,
    endpoint: String,
    bus: EventBus,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    write_lock: tokio::sync::Mutex<()>,
    execution: Mutex<ExecutionState>,
    shutdown: watch::Sender<bool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    bytes_received: AtomicU64,
}

impl Session {
    /// Open the device's transport and start reading from it
    pub async fn open(
        device: Device,
        connector: &dyn TransportConnector,
        bus: EventBus,
        settings: SessionSettings,
    ) -> Result<Arc<Self>> {
        debug!("Opening {} for {}", device.transport.endpoint(), device.id);
        let transport = connector.open(&device.transport).await?;
        Ok(Self::start(device, transport, bus, settings))
    }

    /// Wrap an already-open transport and start reading from it
    pub fn start(
        device: Device,
        transport: Box<dyn Transport>,
        bus: EventBus,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let session = Arc::new(Self {
            endpoint: transport.describe(),
            execution: Mutex::new(ExecutionState::new(&settings)),
            device,
            transport,
            bus,
            settings,
            state: Mutex::new(SessionState::Connecting),
            write_lock: tokio::sync::Mutex::new(()),
            shutdown,
            reader: Mutex::new(None),
            bytes_received: AtomicU64::new(0),
        });

        session.set_state(SessionState::Open);
        info!("Session open: {} ({})", session.device.id, session.endpoint);
        session.bus.publish(EngineEvent::Connected {
            device: session.device.id.clone(),
            endpoint: session.endpoint.clone(),
        });

        let handle = tokio::spawn(Arc::clone(&session).read_loop(shutdown_rx));
        *lock(&session.reader) = Some(handle);
        session
    }

    pub fn id(&self) -> &str {
        &self.device.id
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Transport description captured at open
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Queue and pacing operations for this session
    pub fn sequencer(self: &Arc<Self>) -> Sequencer<'_> {
        Sequencer::new(self)
    }

    pub fn info(&self) -> SessionInfo {
        let (mode, auto_advance, pending) = {
            let exec = self.lock_execution();
            (exec.mode, exec.auto_advance, exec.queue.len())
        };
        SessionInfo {
            device: self.device.id.clone(),
            name: self.device.display_name().to_string(),
            endpoint: self.endpoint.clone(),
            state: self.state(),
            mode,
            auto_advance,
            pending,
        }
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    pub(crate) fn lock_execution(&self) -> MutexGuard<'_, ExecutionState> {
        lock(&self.execution)
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::SessionClosed {
                device: self.device.id.clone(),
            })
        }
    }

    fn notice(&self, message: impl Into<String>) {
        self.bus.publish(EngineEvent::Notice {
            device: self.device.id.clone(),
            message: message.into(),
        });
    }

    // === Write path ===

    /// Send one command followed by the transport's line terminator
    pub async fn send(&self, command: &str) -> Result<()> {
        self.write_line(command, Announce::Command(command)).await
    }

    /// Send a login secret; announced as a notice, never echoed
    pub async fn send_secret(&self, credential: &Credential) -> Result<()> {
        self.write_line(credential.expose(), Announce::Credentials)
            .await
    }

    async fn write_line(&self, payload: &str, announce: Announce<'_>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_open()?;

        let line_ending = self.transport.line_ending();
        let mut line = Zeroizing::new(String::with_capacity(payload.len() + line_ending.len()));
        line.push_str(payload);
        line.push_str(line_ending);

        if let Announce::Credentials = announce {
            self.notice("[Sending login credentials...]");
        }

        if let Err(e) = self.transport.write(line.as_bytes()).await {
            warn!("Write to {} failed: {}", self.device.id, e);
            return Err(e);
        }

        if let Announce::Command(command) = announce {
            debug!("{} <- {}", self.device.id, command);
            self.bus.publish(EngineEvent::CommandSent {
                device: self.device.id.clone(),
                command: command.to_string(),
            });
        }
        Ok(())
    }

    /// Test the connection with a bare line ending
    pub async fn probe(&self) -> Result<ProbeOutcome> {
        self.ensure_open()?;
        self.notice("--- Testing connection ---");

        let before = self.bytes_received.load(Ordering::Acquire);
        self.write_line("", Announce::Nothing).await?;
        tokio::time::sleep(self.settings.probe_wait).await;

        if self.bytes_received.load(Ordering::Acquire) > before {
            self.notice("--- Connection test successful! ---");
            Ok(ProbeOutcome::Responsive)
        } else {
            self.notice("--- No response from device. Trying more explicit command... ---");
            self.send(PROBE_FALLBACK_COMMAND).await?;
            Ok(ProbeOutcome::NoResponse)
        }
    }

    // === Read path ===

    async fn read_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut decoder = Utf8Decoder::default();
        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.transport.read_available(self.settings.poll_interval) => result,
            };

            match result {
                Ok(data) if data.is_empty() => continue,
                Ok(data) => {
                    self.bytes_received
                        .fetch_add(data.len() as u64, Ordering::AcqRel);
                    let text = decoder.decode(&data);
                    self.emit_output(text);
                }
                Err(e) => {
                    self.emit_output(decoder.finish());
                    self.fail(e).await;
                    return;
                }
            }
        }

        self.emit_output(decoder.finish());
        debug!("Reader for {} stopped", self.device.id);
    }

    fn emit_output(&self, text: String) {
        if text.is_empty() {
            return;
        }
        debug!("{} -> {} bytes", self.device.id, text.len());
        self.bus.publish(EngineEvent::DeviceOutput {
            device: self.device.id.clone(),
            text,
        });
    }

    /// Open -> Failed after a read error
    async fn fail(&self, error: Error) {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Open {
                debug!(
                    "Ignoring read error on {} while {}: {}",
                    self.device.id, *state, error
                );
                return;
            }
            *state = SessionState::Failed;
        }

        error!("Session {} failed: {}", self.device.id, error);
        self.bus
            .publish(EngineEvent::from_error(Some(&self.device.id), &error));
        sequencer::abandon(self);

        self.close_transport().await;
        self.bus.publish(EngineEvent::Disconnected {
            device: self.device.id.clone(),
            reason: error.to_string(),
        });
    }

    // === Shutdown ===

    /// Close the transport, giving up after `close_timeout`
    async fn close_transport(&self) {
        match tokio::time::timeout(self.settings.close_timeout, self.transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to close transport for {}: {}", self.device.id, e),
            Err(_) => warn!(
                "Transport for {} did not close within {:?}; abandoning it",
                self.device.id, self.settings.close_timeout
            ),
        }
    }

    /// Fence writes, close the transport and stop the reader
    ///
    /// Transport close errors are logged, never returned. Calling this on a
    /// session that is already closed does nothing.
    pub async fn close(&self) {
        let previous = {
            let mut state = lock(&self.state);
            let previous = *state;
            match previous {
                SessionState::Closing | SessionState::Closed => return,
                SessionState::Failed => {}
                SessionState::Connecting | SessionState::Open => *state = SessionState::Closing,
            }
            previous
        };

        sequencer::abandon(self);
        let _ = self.shutdown.send(true);

        if previous != SessionState::Failed {
            self.close_transport().await;
        }

        let reader = lock(&self.reader).take();
        if let Some(mut handle) = reader {
            if tokio::time::timeout(self.settings.close_timeout, &mut handle)
                .await
                .is_err()
            {
                warn!(
                    "Reader for {} did not stop within {:?}; abandoning it",
                    self.device.id, self.settings.close_timeout
                );
                handle.abort();
            }
        }

        if previous == SessionState::Failed {
            debug!("Released failed session {}", self.device.id);
            return;
        }

        self.set_state(SessionState::Closed);
        info!("Session closed: {}", self.device.id);
        self.bus.publish(EngineEvent::Disconnected {
            device: self.device.id.clone(),
            reason: "disconnected".to_string(),
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
