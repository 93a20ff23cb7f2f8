//! In-memory transport
//!
//! A loopback device for dry runs and tests. The [`MemoryDevice`] handle
//! plays the switch: it records every write, pushes output, and can inject
//! failures. [`MemoryConnector`] hands out transports bound to devices keyed
//! by serial port or SSH host.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

use super::{Transport, TransportConnector};
use crate::error::{Error, IoOperation, Result};
use crate::models::{TransportConfig, TransportKind};

/// Produces device output for a received line (without terminator)
pub type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

enum Chunk {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
    Hangup,
}

struct DeviceState {
    kind: TransportKind,
    written: Vec<String>,
    backlog: Vec<Chunk>,
    output: Option<UnboundedSender<Chunk>>,
    failing_writes: usize,
    responder: Option<Responder>,
    open: bool,
    close_calls: usize,
    close_hangs: bool,
}

impl DeviceState {
    fn deliver(&mut self, chunk: Chunk) {
        let chunk = match &self.output {
            Some(output) => match output.send(chunk) {
                Ok(()) => return,
                Err(returned) => returned.0,
            },
            None => chunk,
        };
        self.backlog.push(chunk);
    }
}

/// The far end of a memory transport
#[derive(Clone)]
pub struct MemoryDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MemoryDevice {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                kind,
                written: Vec::new(),
                backlog: Vec::new(),
                output: None,
                failing_writes: 0,
                responder: None,
                open: false,
                close_calls: 0,
                close_hangs: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a fresh transport to this device
    pub fn connect(&self, label: impl Into<String>) -> MemoryTransport {
        let (sender, receiver) = unbounded_channel();
        let mut state = self.lock();
        for chunk in state.backlog.drain(..) {
            let _ = sender.send(chunk);
        }
        state.output = Some(sender);
        state.open = true;
        let kind = state.kind;
        drop(state);

        MemoryTransport {
            device: self.clone(),
            label: label.into(),
            kind,
            output: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Queue text for the transport to read
    pub fn push_output(&self, text: impl Into<String>) {
        self.lock().deliver(Chunk::Data(text.into().into_bytes()));
    }

    /// Make the next read fail with an I/O error
    pub fn fail_reads(&self, kind: io::ErrorKind) {
        self.lock().deliver(Chunk::Fail(kind));
    }

    /// Simulate the peer dropping the line
    pub fn hang_up(&self) {
        self.lock().deliver(Chunk::Hangup);
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Make every close hang forever after releasing the line
    pub fn hang_on_close(&self) {
        self.lock().close_hangs = true;
    }

    /// Answer each received line with the responder's output
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.lock().responder = Some(Arc::new(responder));
    }

    fn set_responder(&self, responder: Responder) {
        self.lock().responder = Some(responder);
    }

    /// Every write exactly as received, line terminators included
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Received writes with the line terminator stripped
    pub fn lines(&self) -> Vec<String> {
        self.lock()
            .written
            .iter()
            .map(|w| w.trim_end_matches(['\r', '\n']).to_string())
            .collect()
    }

    /// Number of times a transport attached to this device was closed
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }
}

/// Transport half of a memory device
pub struct MemoryTransport {
    device: MemoryDevice,
    label: String,
    kind: TransportKind,
    output: tokio::sync::Mutex<UnboundedReceiver<Chunk>>,
}

impl MemoryTransport {
    /// A connected transport and the device handle driving it
    pub fn pair(kind: TransportKind, label: impl Into<String>) -> (Self, MemoryDevice) {
        let device = MemoryDevice::new(kind);
        (device.connect(label), device)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.device.lock();
        if !state.open {
            return Err(Error::io(
                IoOperation::Write,
                io::Error::new(io::ErrorKind::BrokenPipe, "transport is closed"),
            ));
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(Error::io(
                IoOperation::Write,
                io::Error::new(io::ErrorKind::TimedOut, "injected write failure"),
            ));
        }

        let text = String::from_utf8_lossy(bytes).into_owned();
        state.written.push(text.clone());

        if let Some(responder) = state.responder.clone() {
            let line = text.trim_end_matches(['\r', '\n']);
            if let Some(reply) = responder(line) {
                state.deliver(Chunk::Data(reply.into_bytes()));
            }
        }
        Ok(())
    }

    async fn read_available(&self, timeout: Duration) -> Result<Vec<u8>> {
        let mut output = self.output.lock().await;
        match tokio::time::timeout(timeout, output.recv()).await {
            Err(_) => Ok(Vec::new()),
            Ok(None) | Ok(Some(Chunk::Hangup)) => Err(Error::TransportClosed),
            Ok(Some(Chunk::Data(data))) => Ok(data),
            Ok(Some(Chunk::Fail(kind))) => Err(Error::io(
                IoOperation::Read,
                io::Error::new(kind, "injected read failure"),
            )),
        }
    }

    async fn close(&self) -> Result<()> {
        let hangs = {
            let mut state = self.device.lock();
            state.close_calls += 1;
            state.open = false;
            state.output = None;
            state.close_hangs
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.label)
    }
}

#[derive(Default)]
struct ConnectorState {
    devices: HashMap<String, MemoryDevice>,
    refused: HashSet<String>,
    stalled: HashSet<String>,
    opened: usize,
}

/// Connector that opens memory transports
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
    resumed: Arc<Notify>,
    responder: Option<Responder>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every device created by this connector answers with `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            state: Arc::default(),
            resumed: Arc::default(),
            responder: Some(Arc::new(responder)),
        }
    }

    /// Connector whose devices echo each line followed by a prompt
    pub fn echo(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self::with_responder(move |line| Some(format!("{}\r\n{}", line, prompt)))
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn device_for(&self, key: &str, kind: TransportKind) -> MemoryDevice {
        let mut state = self.lock();
        state
            .devices
            .entry(key.to_string())
            .or_insert_with(|| {
                let device = MemoryDevice::new(kind);
                if let Some(responder) = &self.responder {
                    device.set_responder(Arc::clone(responder));
                }
                device
            })
            .clone()
    }

    /// Device handle for an endpoint key (serial port or SSH host)
    ///
    /// Serial is assumed when the device has not been created yet.
    pub fn device(&self, key: &str) -> MemoryDevice {
        self.device_for(key, TransportKind::Serial)
    }

    /// Reject every future open for the endpoint key
    pub fn refuse(&self, key: &str) {
        self.lock().refused.insert(key.to_string());
    }

    /// Hold every open for the endpoint key until [`MemoryConnector::resume`]
    pub fn stall(&self, key: &str) {
        self.lock().stalled.insert(key.to_string());
    }

    /// Let stalled and future opens for the endpoint key proceed
    pub fn resume(&self, key: &str) {
        self.lock().stalled.remove(key);
        self.resumed.notify_waiters();
    }

    /// Number of transports opened so far
    pub fn opened(&self) -> usize {
        self.lock().opened
    }
}

/// Key that identifies a transport endpoint
pub fn endpoint_key(config: &TransportConfig) -> &str {
    match config {
        TransportConfig::Serial(params) => &params.port,
        TransportConfig::Ssh(params) => &params.host,
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn open(&self, config: &TransportConfig) -> Result<Box<dyn Transport>> {
        let key = endpoint_key(config);
        loop {
            let resumed = self.resumed.notified();
            let stalled = self.lock().stalled.contains(key);
            if !stalled {
                break;
            }
            debug!("Open of {} stalled", key);
            resumed.await;
        }

        if self.lock().refused.contains(key) {
            return Err(Error::Connection {
                transport: config.endpoint(),
                reason: "connection refused".to_string(),
            });
        }

        let device = self.device_for(key, config.kind());
        device.lock().kind = config.kind();
        self.lock().opened += 1;
        Ok(Box::new(device.connect(config.endpoint())))
    }
}
