//! Contract Tests: Sequencer Policies
//!
//! Step delivery waits for confirmation, auto delivery paces itself, and
//! switching between them never loses or duplicates a command.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::time::Duration;

use switchboard::session::DrainPolicy;
use switchboard::{CommandBatch, EngineEvent, ExecutionMode, MemoryConnector};
use test_utils::{
    collect_until, drain, fast_settings, orchestrator, orchestrator_with, sent_commands,
    serial_device, wait_for,
};

#[tokio::test]
async fn test_policy_follows_mode_and_auto_advance() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    let session = orch.session("sw1").await.unwrap();

    assert_eq!(session.sequencer().mode(), ExecutionMode::Queued);
    assert_eq!(session.sequencer().policy(), DrainPolicy::Step);

    orch.set_auto_advance("sw1", true).await.unwrap();
    assert_eq!(session.sequencer().policy(), DrainPolicy::Auto);

    // Manual mode always steps, whatever the auto-advance flag says
    orch.set_mode("sw1", ExecutionMode::Manual).await.unwrap();
    assert!(session.sequencer().auto_advance());
    assert_eq!(session.sequencer().policy(), DrainPolicy::Step);

    orch.shutdown().await;
}

#[tokio::test]
async fn test_step_offers_each_head_once() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.enqueue("sw1", CommandBatch::from_iter(["enable", "conf t"]))
        .await
        .unwrap();
    assert!(!orch.advance("sw1", "conf t").await.unwrap());
    assert!(orch.advance("sw1", "enable").await.unwrap());
    assert!(orch.advance("sw1", "conf t").await.unwrap());
    assert!(!orch.advance("sw1", "conf t").await.unwrap());

    wait_for(&mut events, |e| matches!(e, EngineEvent::BatchCompleted { .. })).await;
    let offered: Vec<_> = drain(&mut events);
    assert!(offered.is_empty(), "nothing follows completion: {offered:?}");
    orch.shutdown().await;
}

#[tokio::test]
async fn test_step_suggestions_in_order() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.enqueue("sw1", CommandBatch::from_iter(["enable", "conf t", "end"]))
        .await
        .unwrap();
    for command in ["enable", "conf t", "end"] {
        assert!(orch.advance("sw1", command).await.unwrap());
    }

    let seen = collect_until(&mut events, |e| {
        matches!(e, EngineEvent::BatchCompleted { .. })
    })
    .await;
    let suggested: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::NextCommand { command, .. } => Some(command.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(suggested, vec!["enable", "conf t", "end"]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_empty_batch_changes_nothing() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    orch.enqueue("sw1", CommandBatch::from_iter(["show clock"]))
        .await
        .unwrap();
    drain(&mut events);

    orch.enqueue("sw1", CommandBatch::new(Vec::new()))
        .await
        .unwrap();
    assert_eq!(orch.pending("sw1").await.unwrap(), vec!["show clock"]);
    assert!(drain(&mut events).is_empty());
    orch.shutdown().await;
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();
    orch.enqueue("sw1", CommandBatch::from_iter(["a", "b", "c"]))
        .await
        .unwrap();

    assert_eq!(orch.cancel("sw1").await.unwrap(), 3);
    assert_eq!(orch.cancel("sw1").await.unwrap(), 0);
    assert!(orch.peek_next("sw1").await.unwrap().is_none());
    orch.shutdown().await;
}

#[tokio::test]
async fn test_cancel_stops_auto_drain() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let mut settings = fast_settings();
    settings.default_delay = Duration::from_millis(100);
    settings.auto_advance = true;
    let orch = orchestrator_with(&connector, settings);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.enqueue("sw1", CommandBatch::from_iter(["one", "two", "three"]))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::CommandSent { .. })).await;
    // "one" may or may not have been popped yet
    assert!(orch.cancel("sw1").await.unwrap() >= 2);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let after = drain(&mut events);
    assert!(sent_commands(&after, "sw1").is_empty());
    assert!(!after
        .iter()
        .any(|e| matches!(e, EngineEvent::BatchCompleted { .. })));
    assert_eq!(port.lines(), vec!["one"]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_auto_advance_off_hands_over_to_stepping() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let mut settings = fast_settings();
    settings.default_delay = Duration::from_millis(150);
    settings.auto_advance = true;
    let orch = orchestrator_with(&connector, settings);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.enqueue("sw1", CommandBatch::from_iter(["one", "two", "three"]))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::CommandSent { .. })).await;
    orch.set_auto_advance("sw1", false).await.unwrap();

    let next = wait_for(&mut events, |e| matches!(e, EngineEvent::NextCommand { .. })).await;
    assert!(matches!(next, EngineEvent::NextCommand { command, .. } if command == "two"));
    assert_eq!(orch.pending("sw1").await.unwrap(), vec!["two", "three"]);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(port.lines(), vec!["one"], "the timer no longer sends");

    assert!(orch.send_manual("sw1", "two").await.unwrap());
    assert!(orch.send_manual("sw1", "three").await.unwrap());
    wait_for(&mut events, |e| matches!(e, EngineEvent::BatchCompleted { .. })).await;
    assert_eq!(port.lines(), vec!["one", "two", "three"]);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_confirmations_are_ignored_while_auto() {
    let connector = MemoryConnector::new();
    let mut settings = fast_settings();
    settings.default_delay = Duration::from_millis(200);
    settings.auto_advance = true;
    let orch = orchestrator_with(&connector, settings);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.enqueue("sw1", CommandBatch::from_iter(["one", "two"]))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::CommandSent { .. })).await;
    assert!(!orch.advance("sw1", "two").await.unwrap());
    orch.shutdown().await;
}

#[tokio::test]
async fn test_replacing_batch_mid_drain_discards_old_commands() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let mut settings = fast_settings();
    settings.default_delay = Duration::from_millis(100);
    settings.auto_advance = true;
    let orch = orchestrator_with(&connector, settings);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.enqueue("sw1", CommandBatch::from_iter(["a1", "a2", "a3"]))
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, EngineEvent::CommandSent { .. })).await;
    let token = orch
        .enqueue("sw1", CommandBatch::from_iter(["b1", "b2"]))
        .await
        .unwrap();

    let done = wait_for(&mut events, |e| matches!(e, EngineEvent::BatchCompleted { .. })).await;
    assert!(matches!(done, EngineEvent::BatchCompleted { token: t, .. } if t == token));
    assert_eq!(port.lines(), vec!["a1", "b1", "b2"]);
    orch.shutdown().await;
}
