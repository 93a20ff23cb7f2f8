//! Integration Tests for Saved Command Sets
//!
//! Command sets store unresolved picks; these tests save them in both
//! formats, load them back and replay them against a device.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use std::fs;
use tempfile::TempDir;
use tokio_test::assert_ok;

use switchboard::{CommandSet, EngineEvent, Error, MemoryConnector, TemplatePick};
use test_utils::{orchestrator, serial_device, wait_for};

fn baseline() -> CommandSet {
    let mut set = CommandSet::new("Access baseline");
    set.description = "Hostname, users VLAN and one access port".to_string();
    set.push(
        TemplatePick::new("system-settings/configure-hostname").with_param("hostname", "ACC-01"),
    );
    set.push(
        TemplatePick::new("vlan-configuration/create-vlan")
            .with_param("vlan_id", 20)
            .with_param("vlan_name", "users"),
    );
    set.push(TemplatePick::new("security-configuration/enable-password-encryption"));
    set
}

#[test]
fn test_save_and_load_both_formats() {
    let temp_dir = TempDir::new().unwrap();

    for name in ["sets/baseline.toml", "baseline.json"] {
        let path = temp_dir.path().join(name);
        assert_ok!(baseline().save_to_path(&path));
        let loaded = assert_ok!(CommandSet::load_from_path(&path));
        assert_eq!(loaded, baseline(), "round trip through {}", name);
    }
}

#[test]
fn test_hand_written_set_accepts_integer_params() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stack.toml");
    fs::write(
        &path,
        r#"
name = "Stack priority"

[[picks]]
template = "stacking-configuration/set-switch-priority"
params = { switch_number = 1, priority = 15 }
"#,
    )
    .unwrap();

    let set = CommandSet::load_from_path(&path).unwrap();
    assert_eq!(set.description, "");
    assert_eq!(set.picks[0].params["switch_number"], "1");
    assert_eq!(set.picks[0].params["priority"], "15");
}

#[test]
fn test_unreadable_and_malformed_sets() {
    let temp_dir = TempDir::new().unwrap();

    let missing = CommandSet::load_from_path(&temp_dir.path().join("absent.toml"));
    assert!(matches!(missing, Err(Error::ConfigLoadFailed { .. })));

    let path = temp_dir.path().join("broken.json");
    fs::write(&path, "[1, 2, 3]").unwrap();
    match CommandSet::load_from_path(&path) {
        Err(Error::ConfigParseFailed { format, .. }) => assert_eq!(format, "JSON"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_loaded_set_dispatches_to_device() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("baseline.toml");
    baseline().save_to_path(&path).unwrap();
    let set = CommandSet::load_from_path(&path).unwrap();

    let connector = MemoryConnector::new();
    let port = connector.device("/dev/ttyUSB0");
    let orch = orchestrator(&connector);
    let mut events = orch.subscribe();
    orch.connect(serial_device("acc-01", "/dev/ttyUSB0"))
        .await
        .unwrap();
    orch.set_auto_advance("acc-01", true).await.unwrap();

    let token = orch.dispatch_set("acc-01", &set).await.unwrap();
    wait_for(&mut events, |e| {
        matches!(e, EngineEvent::BatchCompleted { token: done, .. } if *done == token)
    })
    .await;

    assert_eq!(
        port.lines(),
        vec![
            "Hostname ACC-01",
            "Vlan 20",
            "Name users",
            "Service password-encryption",
        ]
    );
    orch.shutdown().await;
}

#[tokio::test]
async fn test_set_with_stale_template_is_rejected_whole() {
    let connector = MemoryConnector::new();
    let port = connector.device("COM3");
    let orch = orchestrator(&connector);
    orch.connect(serial_device("sw1", "COM3")).await.unwrap();

    let mut set = baseline();
    set.push(TemplatePick::new("legacy/removed-template"));

    let result = orch.dispatch_set("sw1", &set).await;
    assert!(matches!(result, Err(Error::TemplateNotFound { .. })));
    assert!(orch.pending("sw1").await.unwrap().is_empty());
    assert!(port.lines().is_empty());
    orch.shutdown().await;
}
