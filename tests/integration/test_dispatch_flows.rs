//! Integration Tests for Dispatch Flows
//!
//! These tests drive the orchestrator end to end against in-memory devices:
//! catalog picks are resolved, queued and delivered under both policies.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::io;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use switchboard::{
    CommandBatch, EngineEvent, Error, ErrorKind, ExecutionMode, MemoryConnector, TemplatePick,
};
use test_utils::{collect_until, drain, orchestrator, sent_commands, serial_device, wait_for};

fn management_ip() -> TemplatePick {
    TemplatePick::new("management-ip-configuration/configure-vlan-interface-ip")
        .with_param("vlan_id", 100)
        .with_param("ip_address", "10.0.100.2")
        .with_param("subnet_mask", "255.255.255.0")
        .with_param("gateway_ip", "10.0.100.1")
}

fn hostname(name: &str) -> TemplatePick {
    TemplatePick::new("system-settings/configure-hostname").with_param("hostname", name)
}

#[tokio::test]
async fn test_auto_dispatch_delivers_in_order() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();

    assert_ok!(orch.connect(serial_device("sw1", "COM3")).await);
    assert_ok!(orch.set_auto_advance("sw1", true).await);
    let token = assert_ok!(orch.dispatch("sw1", &[management_ip(), hostname("CORE1")]).await);

    let seen = collect_until(&mut events, |event| {
        matches!(event, EngineEvent::BatchCompleted { token: done, .. } if *done == token)
    })
    .await;

    let expected = vec![
        "Interface vlan 100",
        "Ip address 10.0.100.2 255.255.255.0",
        "No shutdown",
        "exit",
        "Ip default-gateway 10.0.100.1",
        "Hostname CORE1",
    ];
    assert_eq!(sent_commands(&seen, "sw1"), expected);
    assert_eq!(port.lines(), expected);
    assert!(port.written().iter().all(|w| w.ends_with("\r\n")));
    assert!(!seen
        .iter()
        .any(|event| matches!(event, EngineEvent::NextCommand { .. })));
    assert!(assert_ok!(orch.pending("sw1").await).is_empty());

    orch.shutdown().await;
}

#[tokio::test]
async fn test_step_dispatch_waits_for_echo_confirmation() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();

    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    let picks = [
        hostname("EDGE1"),
        TemplatePick::new("troubleshooting-commands/show-version"),
    ];
    let token = orch.dispatch("sw1", &picks).await.unwrap();

    let next = wait_for(&mut events, |e| matches!(e, EngineEvent::NextCommand { .. })).await;
    assert_eq!(
        next,
        EngineEvent::NextCommand {
            device: "sw1".to_string(),
            command: "Hostname EDGE1".to_string(),
        }
    );
    assert!(port.lines().is_empty(), "step policy never sends on its own");

    // A different command goes out but does not move the queue
    assert!(!orch.send_manual("sw1", "show clock").await.unwrap());
    assert_eq!(
        orch.peek_next("sw1").await.unwrap().as_deref(),
        Some("Hostname EDGE1")
    );

    assert!(orch.send_manual("sw1", "Hostname EDGE1").await.unwrap());
    let next = wait_for(&mut events, |e| matches!(e, EngineEvent::NextCommand { .. })).await;
    assert!(matches!(next, EngineEvent::NextCommand { command, .. } if command == "show version"));

    assert!(orch.send_manual("sw1", "  show version  ").await.unwrap());
    let done = wait_for(&mut events, |e| matches!(e, EngineEvent::BatchCompleted { .. })).await;
    assert_eq!(
        done,
        EngineEvent::BatchCompleted {
            device: "sw1".to_string(),
            token,
        }
    );
    assert_eq!(
        port.lines(),
        vec!["show clock", "Hostname EDGE1", "  show version  "]
    );

    orch.shutdown().await;
}

#[tokio::test]
async fn test_new_batch_replaces_pending_queue() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.enqueue("sw1", CommandBatch::from_iter(["a1", "a2", "a3"]))
        .await
        .unwrap();
    orch.enqueue("sw1", CommandBatch::from_iter(["b1", "b2"]))
        .await
        .unwrap();

    assert_eq!(orch.pending("sw1").await.unwrap(), vec!["b1", "b2"]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_resolution_failure_queues_nothing() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    orch.enqueue("sw1", CommandBatch::from_iter(["show clock"]))
        .await
        .unwrap();

    let missing = TemplatePick::new("vlan-configuration/create-vlan").with_param("vlan_id", 20);
    let err = assert_err!(orch.dispatch("sw1", &[hostname("SW1"), missing]).await);
    assert!(matches!(err, Error::MissingParameter { ref name } if name == "vlan_name"));
    assert_eq!(err.kind(), ErrorKind::MissingParameter);

    let bad_int = TemplatePick::new("vlan-configuration/create-vlan")
        .with_param("vlan_id", "twenty")
        .with_param("vlan_name", "users");
    let err = assert_err!(orch.dispatch("sw1", &[bad_int]).await);
    assert!(matches!(err, Error::InvalidParameterType { .. }));

    let unknown = TemplatePick::new("system-settings/reticulate-splines");
    assert!(matches!(
        orch.dispatch("sw1", &[unknown]).await,
        Err(Error::TemplateNotFound { .. })
    ));

    // The earlier queue survives failed dispatches untouched
    assert_eq!(orch.pending("sw1").await.unwrap(), vec!["show clock"]);
    assert!(port.lines().is_empty());
    orch.shutdown().await;
}

#[tokio::test]
async fn test_manual_mode_discards_and_stays_empty() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.enqueue("sw1", CommandBatch::from_iter(["enable", "conf t"]))
        .await
        .unwrap();
    orch.set_mode("sw1", ExecutionMode::Manual).await.unwrap();
    assert!(orch.pending("sw1").await.unwrap().is_empty());
    assert!(orch.peek_next("sw1").await.unwrap().is_none());

    // Typed commands still go out in manual mode
    assert!(!orch.send_manual("sw1", "show ip int brief").await.unwrap());
    orch.shutdown().await;
}

#[tokio::test]
async fn test_enabling_auto_advance_drains_pending_steps() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.enqueue("sw1", CommandBatch::from_iter(["enable", "conf t", "end"]))
        .await
        .unwrap();
    assert!(orch.send_manual("sw1", "enable").await.unwrap());

    orch.set_auto_advance("sw1", true).await.unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::BatchCompleted { .. })).await;
    assert_eq!(port.lines(), vec!["enable", "conf t", "end"]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_device_output_reaches_subscribers() {
    let connector = MemoryConnector::echo("SW1#");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.send_manual("sw1", "show clock").await.unwrap();
    let mut text = String::new();
    collect_until(&mut events, |event| {
        if let EngineEvent::DeviceOutput { text: chunk, .. } = event {
            text.push_str(chunk);
        }
        text.ends_with("SW1#")
    })
    .await;
    assert_eq!(text, "show clock\r\nSW1#");
    orch.shutdown().await;
}

#[tokio::test]
async fn test_failure_on_one_device_leaves_others_running() {
    let connector = MemoryConnector::new();
    let broken = connector.device("COM3");
    let healthy = connector.device("COM4");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();

    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    orch.connect(serial_device("sw2", "COM4")).await.unwrap();
    orch.set_auto_advance("sw2", true).await.unwrap();

    broken.fail_reads(io::ErrorKind::ConnectionReset);
    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::Disconnected { device, .. } if device == "sw1")
    })
    .await;
    assert!(!orch.is_connected("sw1").await);

    orch.enqueue("sw2", CommandBatch::from_iter(["show clock", "show version"]))
        .await
        .unwrap();
    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::BatchCompleted { device, .. } if device == "sw2")
    })
    .await;
    assert_eq!(healthy.lines(), vec!["show clock", "show version"]);
    assert!(orch.is_connected("sw2").await);

    orch.shutdown().await;
    assert!(drain(&mut events)
        .iter()
        .all(|e| !matches!(e, EngineEvent::Error { device: Some(d), .. } if d == "sw2")));
}

#[tokio::test]
async fn test_delay_setting_paces_auto_drain() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    orch.set_delay("sw1", Duration::from_millis(40)).await.unwrap();
    orch.set_auto_advance("sw1", true).await.unwrap();

    let started = tokio::time::Instant::now();
    orch.enqueue("sw1", CommandBatch::from_iter(["one", "two", "three"]))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::BatchCompleted { .. })).await;

    // Two pauses separate three commands; no pause after the last one
    assert!(started.elapsed() >= Duration::from_millis(80));
    orch.shutdown().await;
}
