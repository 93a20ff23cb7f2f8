//! Contract Tests: Session Lifecycle
//!
//! Connect, fail and disconnect must follow
//! `Connecting -> Open -> Closing -> Closed | Failed` and always release
//! the transport exactly once.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::io;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use switchboard::{
    CommandBatch, EngineEvent, Error, ErrorKind, MemoryConnector, ProbeOutcome, SessionState,
};
use test_utils::{
    collect_until, drain, fast_settings, orchestrator, orchestrator_with, sent_commands,
    serial_device, ssh_device, wait_for,
};

#[tokio::test]
async fn test_connect_publishes_connected() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();

    assert_ok!(orch.connect(serial_device("sw1", "COM3")).await);
    let event = wait_for(&mut events, |e| matches!(e, EngineEvent::Connected { .. })).await;
    assert_eq!(
        event,
        EngineEvent::Connected {
            device: "sw1".to_string(),
            endpoint: "memory:COM3 @ 9600 baud".to_string(),
        }
    );

    let session = orch.session("sw1").await.unwrap();
    assert_eq!(session.state(), SessionState::Open);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_refused_connection_is_reported() {
    let connector = MemoryConnector::new();
    connector.refuse("10.0.0.9");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();

    let err = assert_err!(orch.connect(ssh_device("core", "10.0.0.9", "pw")).await);
    assert_eq!(err.kind(), ErrorKind::Connection);
    let event = wait_for(&mut events, |e| matches!(e, EngineEvent::Error { .. })).await;
    assert!(matches!(
        event,
        EngineEvent::Error { device: Some(ref d), kind: ErrorKind::Connection, .. } if d == "core"
    ));
    assert!(!orch.is_connected("core").await);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();

    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    let session = orch.session("sw1").await.unwrap();

    assert_ok!(orch.disconnect("sw1").await);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!port.is_open());

    let err = assert_err!(orch.disconnect("sw1").await);
    assert!(matches!(err, Error::NotConnected { .. }));
    session.close().await;

    assert_eq!(port.close_calls(), 1);
    let disconnects = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::Disconnected { .. }))
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_closed_session_rejects_sends() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    let session = orch.session("sw1").await.unwrap();
    orch.disconnect("sw1").await.unwrap();

    let err = assert_err!(session.send("show clock").await);
    assert!(matches!(err, Error::SessionClosed { .. }));
    assert!(matches!(
        session.sequencer().enqueue(CommandBatch::from_iter(["show clock"])),
        Err(Error::SessionClosed { .. })
    ));
    assert!(matches!(
        orch.send_manual("sw1", "show clock").await,
        Err(Error::NotConnected { .. })
    ));
    assert!(port.lines().is_empty());
}

#[tokio::test]
async fn test_close_mid_drain_stops_delivery() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let mut settings = fast_settings();
    settings.default_delay = Duration::from_millis(200);
    settings.auto_advance = true;
    let orch = orchestrator_with(&connector, settings);
    let mut events = orch.subscribe();

    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    orch.enqueue("sw1", CommandBatch::from_iter(["one", "two", "three"]))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::CommandSent { .. })).await;

    orch.disconnect("sw1").await.unwrap();
    let seen = collect_until(&mut events, |e| {
        matches!(e, EngineEvent::Disconnected { .. })
    })
    .await;
    assert!(seen.iter().any(|e| matches!(
        e,
        EngineEvent::Error {
            kind: ErrorKind::SessionClosedMidBatch,
            ..
        }
    )));

    // Nothing else goes out once the drain would have woken up
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = drain(&mut events);
    assert!(sent_commands(&after, "sw1").is_empty());
    assert!(!after
        .iter()
        .any(|e| matches!(e, EngineEvent::BatchCompleted { .. })));
    assert_eq!(port.lines(), vec!["one"]);
}

#[tokio::test]
async fn test_read_failure_is_terminal() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    orch.enqueue("sw1", CommandBatch::from_iter(["enable"]))
        .await
        .unwrap();

    port.push_output("partial output");
    port.fail_reads(io::ErrorKind::BrokenPipe);
    let seen = collect_until(&mut events, |e| {
        matches!(e, EngineEvent::Disconnected { .. })
    })
    .await;

    let kinds: Vec<ErrorKind> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Error { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![ErrorKind::Io, ErrorKind::SessionClosedMidBatch]);
    assert!(seen.iter().any(
        |e| matches!(e, EngineEvent::DeviceOutput { text, .. } if text == "partial output")
    ));

    let session = orch.session("sw1").await.unwrap();
    assert_eq!(session.state(), SessionState::Failed);
    assert!(matches!(
        orch.send_manual("sw1", "show clock").await,
        Err(Error::SessionClosed { .. })
    ));

    // Releasing a failed session does not close the transport again
    orch.disconnect("sw1").await.unwrap();
    assert_eq!(port.close_calls(), 1);
}

#[tokio::test]
async fn test_write_failure_keeps_session_open() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    port.fail_next_writes(1);
    let err = assert_err!(orch.send_manual("sw1", "show clock").await);
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(orch.is_connected("sw1").await);

    assert_ok!(orch.send_manual("sw1", "show clock").await);
    assert_eq!(port.lines(), vec!["show clock"]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_peer_hangup_fails_session() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    port.hang_up();
    let event = wait_for(&mut events, |e| matches!(e, EngineEvent::Disconnected { .. })).await;
    assert!(matches!(event, EngineEvent::Disconnected { reason, .. } if reason.contains("closed")));
    assert!(!orch.is_connected("sw1").await);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_probe_outcomes() {
    let connector = MemoryConnector::echo("SW1#");
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    assert_eq!(orch.probe("sw1").await.unwrap(), ProbeOutcome::Responsive);
    orch.shutdown().await;

    let silent = MemoryConnector::new();
    let port = silent.device("COM3");
    let orch = orchestrator(&silent);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    assert_eq!(orch.probe("sw1").await.unwrap(), ProbeOutcome::NoResponse);
    assert_eq!(port.written(), vec!["\r\n", "show version\r\n"]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_ssh_sessions_use_bare_newline() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    orch.connect(ssh_device("core", "10.0.0.2", "pw")).await.unwrap();
    orch.send_manual("core", "show clock").await.unwrap();

    let host = connector.device("10.0.0.2");
    assert_eq!(host.written(), vec!["show clock\n"]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_devices_snapshot_tracks_state() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw2", "COM4")).await.unwrap();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    orch.enqueue("sw2", CommandBatch::from_iter(["a", "b"]))
        .await
        .unwrap();

    let devices = orch.devices().await;
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].device, "sw1");
    assert_eq!(devices[1].pending, 2);
    assert!(devices.iter().all(|d| d.state == SessionState::Open));

    orch.shutdown().await;
    assert!(orch.devices().await.is_empty());
}

#[tokio::test]
async fn test_abandoned_connect_can_be_retried() {
    let connector = MemoryConnector::new();
    connector.stall("COM3");
    let orch = orchestrator(&connector);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        orch.connect(serial_device("sw1", "COM3")),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(orch.devices().await.is_empty());

    connector.resume("COM3");
    assert_ok!(orch.connect(serial_device("sw1", "COM3")).await);
    assert!(orch.is_connected("sw1").await);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_survives_hanging_transport_close() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    port.hang_on_close();
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();

    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    let session = orch.session("sw1").await.unwrap();

    let disconnected =
        tokio::time::timeout(test_utils::WAIT, orch.disconnect("sw1")).await;
    assert_ok!(assert_ok!(disconnected));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(port.close_calls(), 1);
    wait_for(&mut events, |e| matches!(e, EngineEvent::Disconnected { .. })).await;
}
