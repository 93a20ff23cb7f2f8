//! Test Utilities
//!
//! Shared helpers for the integration tests: an orchestrator wired to
//! in-memory devices, fast session timing, and event waiting.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use switchboard::{
    Catalog, EngineEvent, EventSubscription, MemoryConnector, Orchestrator, SessionSettings,
};

pub use fixtures::{serial_device, ssh_device, test_catalog};

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Session timing short enough to keep tests quick
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        poll_interval: Duration::from_millis(10),
        close_timeout: Duration::from_millis(500),
        default_delay: Duration::ZERO,
        probe_wait: Duration::from_millis(100),
        ..SessionSettings::default()
    }
}

/// Orchestrator over the built-in catalog and the given connector
pub fn orchestrator(connector: &MemoryConnector) -> Orchestrator {
    orchestrator_with(connector, fast_settings())
}

pub fn orchestrator_with(connector: &MemoryConnector, settings: SessionSettings) -> Orchestrator {
    let catalog = Arc::new(Catalog::builtin().expect("built-in catalog loads"));
    Orchestrator::new(Arc::new(connector.clone()), catalog).with_settings(settings)
}

/// Receive events until one satisfies `predicate`; returns everything seen
pub async fn collect_until<F>(events: &mut EventSubscription, mut predicate: F) -> Vec<EngineEvent>
where
    F: FnMut(&EngineEvent) -> bool,
{
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let envelope = tokio::time::timeout_at(deadline, events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for event; saw {:#?}", seen))
            .expect("event bus closed");
        let done = predicate(&envelope.event);
        seen.push(envelope.event);
        if done {
            return seen;
        }
    }
}

/// Wait for the next event matching `predicate`
pub async fn wait_for<F>(events: &mut EventSubscription, predicate: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    collect_until(events, predicate)
        .await
        .pop()
        .expect("collect_until returns the matching event")
}

/// Everything already published, without waiting
pub fn drain(events: &mut EventSubscription) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    while let Some(envelope) = events.try_recv() {
        seen.push(envelope.event);
    }
    seen
}

/// Commands from `CommandSent` events for one device, in order
pub fn sent_commands(events: &[EngineEvent], device: &str) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::CommandSent {
                device: from,
                command,
            } if from == device => Some(command.clone()),
            _ => None,
        })
        .collect()
}
