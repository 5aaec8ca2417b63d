//! Scenario 4: a device record with unattended access enabled is
//! pre-seeded in the relay's registry; connecting with the wrong
//! password hash is rejected and never starts a session.

use serde_json::{json, Value};

use crate::support::{self, ADMIN_TOKEN};

#[tokio::test]
async fn wrong_unattended_password_is_rejected() {
    let seeded_hash = "a".repeat(64);
    let wrong_hash = "b".repeat(64);

    let relay = support::spawn_relay("unattended-failure", |config| {
        support::seed_device(
            &config.data_dir,
            json!({
                "agent_id": "a1",
                "hostname": "h1",
                "os": "linux",
                "version": "1.0",
                "customer_name": null,
                "first_seen_ms": 1,
                "last_seen_ms": 1,
                "unattended_enabled": true,
                "unattended_password_hash": seeded_hash,
                "hardware_summary": null,
            }),
        );
    })
    .await;

    let mut admin_ws = support::connect(&relay.ws_url()).await;
    support::send_json(
        &mut admin_ws,
        &json!({
            "type": "admin_auth",
            "payload": { "admin_token": ADMIN_TOKEN, "admin_name": "A" },
        }),
    )
    .await;
    let _auth_result: Value = support::recv_as(&mut admin_ws).await;

    support::send_json(
        &mut admin_ws,
        &json!({
            "type": "connect_unattended",
            "payload": {
                "agent_id": "a1",
                "password": wrong_hash,
                "admin_token": ADMIN_TOKEN,
            },
        }),
    )
    .await;

    let reply: Value = support::recv_as(&mut admin_ws).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["code"], "INVALID_PASSWORD");

    support::send_json(
        &mut admin_ws,
        &json!({ "type": "get_device_list", "payload": {} }),
    )
    .await;
    let device_list: Value = support::recv_as(&mut admin_ws).await;
    assert_eq!(device_list["type"], "device_list");
    let devices = device_list["payload"]["devices"].as_array().expect("devices array");
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0]["is_online"], false);
}
