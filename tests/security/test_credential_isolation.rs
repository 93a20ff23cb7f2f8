//! Security Tests: Credential Isolation
//!
//! Login secrets reach the device and nothing else: no event, transcript
//! line, debug string or saved configuration may contain them.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use tempfile::TempDir;

use switchboard::config::ConfigLoader;
use switchboard::{
    Config, Credential, EngineEvent, MemoryConnector, TranscriptFormat, TranscriptRecorder,
};
use test_utils::{drain, orchestrator, serial_device, ssh_device, wait_for};

const SECRET: &str = "Cisco123!-do-not-leak";

fn assert_no_secret(events: &[EngineEvent]) {
    for event in events {
        let json = serde_json::to_string(event).unwrap();
        assert!(!json.contains(SECRET), "secret leaked in {json}");
        assert!(!format!("{event:?}").contains(SECRET));
    }
}

#[tokio::test]
async fn test_login_reaches_device_but_not_events() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    orch.send_login("sw1", &Credential::new(SECRET))
        .await
        .unwrap();
    assert_eq!(port.lines(), vec![SECRET]);

    let notice = wait_for(&mut events, |e| matches!(e, EngineEvent::Notice { .. })).await;
    assert_eq!(
        notice,
        EngineEvent::Notice {
            device: "sw1".to_string(),
            message: "[Sending login credentials...]".to_string(),
        }
    );

    orch.shutdown().await;
    let rest = drain(&mut events);
    assert!(!rest
        .iter()
        .any(|e| matches!(e, EngineEvent::CommandSent { .. })));
    assert_no_secret(&rest);
}

#[tokio::test]
async fn test_ssh_profile_secret_stays_out_of_debug_and_events() {
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(ssh_device("core", "10.0.0.2", SECRET))
        .await
        .unwrap();

    let session = orch.session("core").await.unwrap();
    assert!(!format!("{session:?}").contains(SECRET));
    assert!(!format!("{:?}", session.device()).contains(SECRET));
    assert!(!serde_json::to_string(&session.info()).unwrap().contains(SECRET));

    orch.send_login("core", &Credential::new(SECRET)).await.unwrap();
    orch.shutdown().await;
    assert_no_secret(&drain(&mut events));
}

#[tokio::test]
async fn test_transcript_never_contains_secret() {
    let temp_dir = TempDir::new().unwrap();
    let connector = MemoryConnector::new();
    let orch = orchestrator(&connector);

    for (name, format) in [
        ("events.jsonl", TranscriptFormat::JsonLines),
        ("session.log", TranscriptFormat::Text),
    ] {
        let path = temp_dir.path().join(name);
        let recorder = TranscriptRecorder::start(&path, format, orch.subscribe())
            .await
            .unwrap();

        orch.connect(serial_device("sw1", "COM3")).await.unwrap();
        orch.send_manual("sw1", "enable").await.unwrap();
        orch.send_login("sw1", &Credential::new(SECRET)).await.unwrap();
        orch.disconnect("sw1").await.unwrap();

        assert!(recorder.finish().await.unwrap() > 0);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("enable"));
        assert!(!content.contains(SECRET), "secret leaked into {name}");
    }
}

#[test]
fn test_saved_config_omits_credentials() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.devices.push(ssh_device("core", "10.0.0.2", SECRET));

    assert!(!format!("{config:?}").contains(SECRET));

    for name in ["config.toml", "config.json"] {
        let path = temp_dir.path().join(name);
        ConfigLoader::save_to_path(&config, &path).unwrap();
        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("10.0.0.2"));
        assert!(!saved.contains(SECRET), "secret written to {name}");
    }
}

#[test]
fn test_credential_debug_is_redacted() {
    let credential = Credential::new(SECRET);
    assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
    assert_eq!(credential.expose(), SECRET);
}
