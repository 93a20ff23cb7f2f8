//! Orchestrator
//!
//! Owns the device table: one [`Session`] per connected device id. Routes
//! dispatch, manual sends and policy changes to the right session and
//! shares a single [`EventBus`] with all of them.
//!
//! Errors are always scoped to one device; a failure on one session never
//! touches the others.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus, EventSubscription};
use crate::models::{BatchToken, CommandBatch, CommandSet, Credential, Device, TemplatePick};
use crate::session::{
    ExecutionMode, ProbeOutcome, Session, SessionInfo, SessionSettings, SessionState,
};
use crate::transport::TransportConnector;

type DeviceTable = RwLock<HashMap<String, Slot>>;

/// Device table entry
enum Slot {
    /// Transport is being opened; the id is reserved by one connect call
    Connecting { device: Device, reservation: u64 },
    Open(Arc<Session>),
}

impl Slot {
    fn is_reserved_by(&self, id: u64) -> bool {
        matches!(self, Slot::Connecting { reservation, .. } if *reservation == id)
    }
}

/// Holds a `Connecting` slot for the duration of one connect call
///
/// Dropping it without [`Reservation::fulfil`] frees the id, so a
/// cancelled connect never leaves the device stuck in `Connecting`.
struct Reservation<'a> {
    table: &'a DeviceTable,
    device: String,
    id: u64,
    armed: bool,
}

impl Reservation<'_> {
    /// Swap the reserved slot for the open session
    ///
    /// Hands the session back when the reservation was taken away in the
    /// meantime (the table was shut down).
    fn fulfil(mut self, session: Arc<Session>) -> std::result::Result<(), Arc<Session>> {
        self.armed = false;
        let mut table = write_table(self.table);
        match table.get(&self.device) {
            Some(slot) if slot.is_reserved_by(self.id) => {
                table.insert(self.device.clone(), Slot::Open(session));
                Ok(())
            }
            _ => Err(session),
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut table = write_table(self.table);
        if table
            .get(&self.device)
            .is_some_and(|slot| slot.is_reserved_by(self.id))
        {
            table.remove(&self.device);
            debug!("Released connect reservation for {}", self.device);
        }
    }
}

// Guards on the table are never held across an await.
fn read_table(table: &DeviceTable) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
    table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_table(table: &DeviceTable) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
    table.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Multi-device session registry and router
pub struct Orchestrator {
    connector: Arc<dyn TransportConnector>,
    catalog: Arc<Catalog>,
    bus: EventBus,
    settings: SessionSettings,
    sessions: DeviceTable,
    next_reservation: AtomicU64,
}

impl Orchestrator {
    pub fn new(connector: Arc<dyn TransportConnector>, catalog: Arc<Catalog>) -> Self {
        Self {
            connector,
            catalog,
            bus: EventBus::new(),
            settings: SessionSettings::default(),
            sessions: RwLock::new(HashMap::new()),
            next_reservation: AtomicU64::new(0),
        }
    }

    /// Settings applied to sessions opened from now on
    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Publish on an existing bus instead of a private one
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Receive every event from every session
    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    // === Device table ===

    fn reserve(&self, device: &Device) -> Result<Reservation<'_>> {
        let mut table = write_table(&self.sessions);
        if table.contains_key(&device.id) {
            return Err(Error::AlreadyConnected {
                device: device.id.clone(),
            });
        }
        let id = self.next_reservation.fetch_add(1, Ordering::Relaxed);
        table.insert(
            device.id.clone(),
            Slot::Connecting {
                device: device.clone(),
                reservation: id,
            },
        );
        Ok(Reservation {
            table: &self.sessions,
            device: device.id.clone(),
            id,
            armed: true,
        })
    }

    /// Open a session for the device
    ///
    /// The id stays reserved while the transport opens. Cancelling the
    /// returned future releases it again.
    pub async fn connect(&self, device: Device) -> Result<()> {
        let id = device.id.clone();
        let reservation = self.reserve(&device)?;

        let opened = Session::open(
            device,
            self.connector.as_ref(),
            self.bus.clone(),
            self.settings.clone(),
        )
        .await;

        let session = match opened {
            Ok(session) => session,
            Err(e) => {
                drop(reservation);
                error!("Failed to connect {}: {}", id, e);
                self.bus.publish(EngineEvent::from_error(Some(&id), &e));
                return Err(e);
            }
        };

        match reservation.fulfil(session) {
            Ok(()) => Ok(()),
            Err(orphan) => {
                warn!("Device table was shut down while {} was connecting", id);
                orphan.close().await;
                Err(Error::Connection {
                    transport: orphan.endpoint().to_string(),
                    reason: "device table was shut down while connecting".to_string(),
                })
            }
        }
    }

    /// Close the device's session and forget it
    ///
    /// Resources are always released; transport close errors are only
    /// logged.
    pub async fn disconnect(&self, device: &str) -> Result<()> {
        let session = {
            let mut sessions = write_table(&self.sessions);
            match sessions.remove(device) {
                Some(Slot::Open(session)) => session,
                Some(connecting) => {
                    sessions.insert(device.to_string(), connecting);
                    return Err(not_connected(device));
                }
                None => return Err(not_connected(device)),
            }
        };

        session.close().await;
        info!("Disconnected {}", device);
        Ok(())
    }

    /// Disconnect every device concurrently
    ///
    /// Connects still in flight lose their reservation and close their
    /// session as soon as it opens.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = write_table(&self.sessions)
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Open(session) => Some(session),
                Slot::Connecting { .. } => None,
            })
            .collect();

        if sessions.is_empty() {
            return;
        }
        info!("Shutting down {} sessions", sessions.len());
        join_all(sessions.iter().map(|session| session.close())).await;
    }

    /// Session handle for a connected device
    pub async fn session(&self, device: &str) -> Result<Arc<Session>> {
        match read_table(&self.sessions).get(device) {
            Some(Slot::Open(session)) => Ok(Arc::clone(session)),
            _ => Err(not_connected(device)),
        }
    }

    pub async fn is_connected(&self, device: &str) -> bool {
        matches!(
            read_table(&self.sessions).get(device),
            Some(Slot::Open(session)) if session.is_open()
        )
    }

    /// Snapshot of the device table, sorted by id
    pub async fn devices(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> = read_table(&self.sessions)
            .values()
            .map(|slot| match slot {
                Slot::Open(session) => session.info(),
                Slot::Connecting { device, .. } => SessionInfo {
                    device: device.id.clone(),
                    name: device.display_name().to_string(),
                    endpoint: device.transport.endpoint(),
                    state: SessionState::Connecting,
                    mode: self.settings.default_mode,
                    auto_advance: self.settings.auto_advance,
                    pending: 0,
                },
            })
            .collect();
        infos.sort_by(|a, b| a.device.cmp(&b.device));
        infos
    }

    // === Dispatch ===

    /// Resolve picks against the catalog and queue the commands
    pub async fn dispatch(&self, device: &str, picks: &[TemplatePick]) -> Result<BatchToken> {
        let session = self.session(device).await?;
        let batch = self.catalog.resolve_picks(picks)?;
        debug!(
            "Dispatching {} picks ({} commands) to {}",
            picks.len(),
            batch.len(),
            device
        );
        session.sequencer().enqueue(batch)
    }

    /// Dispatch a saved command set
    pub async fn dispatch_set(&self, device: &str, set: &CommandSet) -> Result<BatchToken> {
        self.dispatch(device, &set.picks).await
    }

    /// Queue already-literal commands
    pub async fn enqueue(&self, device: &str, batch: CommandBatch) -> Result<BatchToken> {
        self.session(device).await?.sequencer().enqueue(batch)
    }

    /// Send a typed command, then offer it as confirmation of the queue head
    ///
    /// Returns whether the queue advanced.
    pub async fn send_manual(&self, device: &str, command: &str) -> Result<bool> {
        let session = self.session(device).await?;
        session.send(command).await?;
        Ok(session.sequencer().advance(command))
    }

    /// Send login credentials without echoing them
    pub async fn send_login(&self, device: &str, credential: &Credential) -> Result<()> {
        self.session(device).await?.send_secret(credential).await
    }

    /// Test whether the device answers
    pub async fn probe(&self, device: &str) -> Result<ProbeOutcome> {
        self.session(device).await?.probe().await
    }

    // === Sequencer routing ===

    pub async fn advance(&self, device: &str, matched: &str) -> Result<bool> {
        Ok(self.session(device).await?.sequencer().advance(matched))
    }

    pub async fn cancel(&self, device: &str) -> Result<usize> {
        Ok(self.session(device).await?.sequencer().cancel())
    }

    pub async fn peek_next(&self, device: &str) -> Result<Option<String>> {
        Ok(self.session(device).await?.sequencer().peek_next())
    }

    pub async fn pending(&self, device: &str) -> Result<Vec<String>> {
        Ok(self.session(device).await?.sequencer().pending())
    }

    pub async fn set_mode(&self, device: &str, mode: ExecutionMode) -> Result<()> {
        self.session(device).await?.sequencer().set_mode(mode);
        Ok(())
    }

    pub async fn set_auto_advance(&self, device: &str, enabled: bool) -> Result<()> {
        self.session(device)
            .await?
            .sequencer()
            .set_auto_advance(enabled);
        Ok(())
    }

    pub async fn set_delay(&self, device: &str, delay: Duration) -> Result<()> {
        self.session(device).await?.sequencer().set_delay(delay);
        Ok(())
    }
}

fn not_connected(device: &str) -> Error {
    Error::NotConnected {
        device: device.to_string(),
    }
}
