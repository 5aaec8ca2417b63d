//! Scenario 3: an agent registers and then disappears before anyone
//! accepts its request; the already-connected admin sees exactly one
//! `device_status_changed { is_online: false }` broadcast.

use std::time::Duration;

use servidesk_protocol::{
    AdminAuthPayload, AdminToRelay, AgentId, AgentRegisterPayload, AgentToRelay, RelayToAdmin,
    RelayToAgent,
};

use crate::support::{self, ADMIN_TOKEN};

#[tokio::test]
async fn agent_drop_broadcasts_offline_exactly_once() {
    let relay = support::spawn_relay("agent-flap", |_| {}).await;

    let mut admin_ws = support::connect(&relay.ws_url()).await;
    support::send_json(
        &mut admin_ws,
        &AdminToRelay::AdminAuth(AdminAuthPayload {
            admin_token: ADMIN_TOKEN.to_string(),
            admin_name: "A".to_string(),
        }),
    )
    .await;
    let _auth_result: RelayToAdmin = support::recv_as(&mut admin_ws).await;

    let mut agent_ws = support::connect(&relay.ws_url()).await;
    support::send_json(
        &mut agent_ws,
        &AgentToRelay::AgentRegister(AgentRegisterPayload {
            agent_id: "a1".to_string(),
            hostname: "h1".to_string(),
            os: None,
            version: None,
            hardware_summary: None,
            agent_token: None,
        }),
    )
    .await;
    let _registered: RelayToAgent = support::recv_as(&mut agent_ws).await;

    let online: RelayToAdmin = support::recv_as(&mut admin_ws).await;
    let RelayToAdmin::DeviceStatusChanged(online) = online else {
        panic!("expected device_status_changed, got {online:?}");
    };
    assert!(online.is_online);

    drop(agent_ws);

    let offline: RelayToAdmin = support::recv_as(&mut admin_ws).await;
    let RelayToAdmin::DeviceStatusChanged(offline) = offline else {
        panic!("expected device_status_changed, got {offline:?}");
    };
    assert_eq!(offline.agent_id, AgentId::new("a1").unwrap());
    assert!(!offline.is_online);

    assert!(
        support::no_more_messages(&mut admin_ws, Duration::from_millis(300)).await,
        "expected exactly one offline broadcast, got a second message"
    );
}
