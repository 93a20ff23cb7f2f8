//! Test Fixtures
//!
//! Common devices and catalogs for tests

use switchboard::{BaudRate, Catalog, Credential, Device, TransportConfig};

/// Serial device on `port` at 9600 baud
pub fn serial_device(id: &str, port: &str) -> Device {
    Device::new(id, TransportConfig::serial(port, BaudRate::B9600))
}

/// SSH device with a stored password
pub fn ssh_device(id: &str, host: &str, password: &str) -> Device {
    let mut transport = TransportConfig::ssh(host, "admin");
    if let TransportConfig::Ssh(params) = &mut transport {
        params.credential = Some(Credential::new(password));
    }
    Device::new(id, transport)
}

/// Small catalog with one template per parameter shape
pub fn test_catalog() -> Catalog {
    Catalog::from_json_str(
        r#"{
            "Basics": [
                { "name": "Show Clock", "command": "show clock", "inputs": [] },
                {
                    "name": "Create VLAN",
                    "command": ["vlan {vlan_id}", "name {vlan_name}"],
                    "inputs": [
                        { "name": "vlan_id", "type": "int", "description": "VLAN number" },
                        { "name": "vlan_name", "type": "string" }
                    ]
                }
            ]
        }"#,
    )
    .expect("test catalog is valid")
}
