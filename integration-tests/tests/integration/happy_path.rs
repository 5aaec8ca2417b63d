//! Scenario 1: agent registers, requests support, an admin accepts,
//! a video frame crosses the relay, and the session ends cleanly with
//! exactly one session-log entry.

use servidesk_protocol::{
    AcceptSupportPayload, AdminAuthPayload, AdminToRelay, AgentRegisterPayload, AgentToRelay,
    Packet, RelayToAdmin, RelayToAgent, RequestSupportPayload, SessionEndPayload, SessionLogEntry,
};

use crate::support::{self, ADMIN_TOKEN};

#[tokio::test]
async fn happy_path_completes_with_one_session_log_entry() {
    let relay = support::spawn_relay("happy-path", |_| {}).await;

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
    let registered: RelayToAgent = support::recv_as(&mut agent_ws).await;
    let RelayToAgent::AgentRegistered(registered) = registered else {
        panic!("expected agent_registered, got {registered:?}");
    };
    assert_eq!(registered.status, "waiting");

    let mut admin_ws = support::connect(&relay.ws_url()).await;
    support::send_json(
        &mut admin_ws,
        &AdminToRelay::AdminAuth(AdminAuthPayload {
            admin_token: ADMIN_TOKEN.to_string(),
            admin_name: "A".to_string(),
        }),
    )
    .await;
    let auth_result: RelayToAdmin = support::recv_as(&mut admin_ws).await;
    let RelayToAdmin::AdminAuthResult(auth_result) = auth_result else {
        panic!("expected admin_auth_result, got {auth_result:?}");
    };
    assert!(auth_result.success);

    support::send_json(
        &mut agent_ws,
        &AgentToRelay::RequestSupport(RequestSupportPayload {
            customer_name: "Cust".to_string(),
            message: "help".to_string(),
            screen_w: 1920,
            screen_h: 1080,
        }),
    )
    .await;

    let support_request: RelayToAdmin = support::recv_as(&mut admin_ws).await;
    let RelayToAdmin::SupportRequest(support_request) = support_request else {
        panic!("expected support_request, got {support_request:?}");
    };
    let session_id = support_request.session_id;

    support::send_json(
        &mut admin_ws,
        &AdminToRelay::AcceptSupport(AcceptSupportPayload { session_id }),
    )
    .await;

    let accepted: RelayToAgent = support::recv_as(&mut agent_ws).await;
    assert!(matches!(accepted, RelayToAgent::SessionAccepted(_)), "got {accepted:?}");

    let started: RelayToAdmin = support::recv_as(&mut admin_ws).await;
    let RelayToAdmin::SessionStarted(started) = started else {
        panic!("expected session_started, got {started:?}");
    };
    assert_eq!(started.session_id, session_id);
    assert_eq!(started.screen_w, 1920);
    assert_eq!(started.screen_h, 1080);

    let frame = Packet::VideoFrame(vec![0xFF, 0xD8, 0xFF, 0xAA, 0x01, 0x02])
        .encode()
        .unwrap();
    support::send_binary(&mut agent_ws, frame.clone()).await;
    let relayed = support::recv_binary(&mut admin_ws).await;
    assert_eq!(relayed, frame);

    support::send_json(
        &mut admin_ws,
        &AdminToRelay::SessionEnd(SessionEndPayload {
            reason: "completed".to_string(),
        }),
    )
    .await;

    let agent_ended: RelayToAgent = support::recv_as(&mut agent_ws).await;
    let RelayToAgent::SessionEnded(agent_ended) = agent_ended else {
        panic!("expected session_ended, got {agent_ended:?}");
    };
    assert_eq!(agent_ended.reason, "completed");
    assert_eq!(agent_ended.ended_by, "admin");

    let admin_ended: RelayToAdmin = support::recv_as(&mut admin_ws).await;
    let RelayToAdmin::SessionEnded(admin_ended) = admin_ended else {
        panic!("expected session_ended, got {admin_ended:?}");
    };
    assert_eq!(admin_ended.reason, "completed");

    // Give the session-log append a moment to hit disk.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let contents = tokio::fs::read_to_string(relay.data_dir.join("sessions.json"))
        .await
        .expect("read session log");
    let entries: Vec<SessionLogEntry> = serde_json::from_str(&contents).expect("parse session log");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].end_reason, "completed");
    assert_eq!(entries[0].ended_by, "admin");
}
