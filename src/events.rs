//! Engine Event System
//!
//! Sessions and the sequencer publish [`EngineEvent`]s to an [`EventBus`];
//! any number of observers (console, transcript file, tests) subscribe.
//!
//! ## Delivery guarantees
//!
//! Each subscriber owns an unbounded channel, so a slow observer never
//! causes an event to be dropped; it only grows its own backlog. Every
//! event is stamped with a bus-wide sequence number under the same lock
//! that fans it out, so all subscribers observe one total order. Events
//! for a single device therefore arrive in the order they were produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::error::{Error, ErrorKind};
use crate::models::BatchToken;

/// Events emitted by sessions and the sequencer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A session opened
    Connected { device: String, endpoint: String },
    /// A session closed or failed
    Disconnected { device: String, reason: String },
    /// Text received from the device
    DeviceOutput { device: String, text: String },
    /// A command was written to the device
    CommandSent { device: String, command: String },
    /// The step policy is waiting for this command
    NextCommand { device: String, command: String },
    /// Every command of the batch was sent
    BatchCompleted { device: String, token: BatchToken },
    /// Operator-facing status line
    Notice { device: String, message: String },
    /// Something went wrong; `device` is absent for engine-wide errors
    Error {
        device: Option<String>,
        kind: ErrorKind,
        detail: String,
    },
}

impl EngineEvent {
    /// Device this event belongs to, if any
    pub fn device(&self) -> Option<&str> {
        match self {
            EngineEvent::Connected { device, .. }
            | EngineEvent::Disconnected { device, .. }
            | EngineEvent::DeviceOutput { device, .. }
            | EngineEvent::CommandSent { device, .. }
            | EngineEvent::NextCommand { device, .. }
            | EngineEvent::BatchCompleted { device, .. }
            | EngineEvent::Notice { device, .. } => Some(device),
            EngineEvent::Error { device, .. } => device.as_deref(),
        }
    }

    /// Build an error event from an engine error
    pub fn from_error(device: Option<&str>, error: &Error) -> Self {
        EngineEvent::Error {
            device: device.map(str::to_string),
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

/// An event with its bus sequence number and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

impl EventEnvelope {
    /// Encode as one JSON line (no trailing newline)
    pub fn to_json_line(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Subscription handle for receiving engine events
pub struct EventSubscription {
    receiver: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl EventSubscription {
    /// Receive the next event, waiting if necessary
    ///
    /// Returns `None` once every bus handle has been dropped and the
    /// backlog is drained.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.recv().await
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.receiver.try_recv().ok()
    }
}

struct BusState {
    next_sequence: u64,
    subscribers: Vec<mpsc::UnboundedSender<EventEnvelope>>,
}

/// Fan-out event bus
#[derive(Clone)]
pub struct EventBus {
    state: Arc<Mutex<BusState>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                next_sequence: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // Publishing never leaves the subscriber list half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to every event published from now on
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().subscribers.push(sender);
        EventSubscription { receiver }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: EngineEvent) {
        let mut state = self.lock();
        let envelope = EventEnvelope {
            sequence: state.next_sequence,
            timestamp: Utc::now(),
            event,
        };
        state.next_sequence += 1;

        trace!("event #{}: {:?}", envelope.sequence, envelope.event);
        // Dropped subscriptions are pruned on the next publish
        state
            .subscribers
            .retain(|subscriber| subscriber.send(envelope.clone()).is_ok());
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|subscriber| !subscriber.is_closed());
        state.subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
