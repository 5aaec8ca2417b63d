//! Scenario 2: two admins race to accept the same pending request;
//! exactly one wins and the other is told the request is already gone.

use servidesk_protocol::{
    AcceptSupportPayload, AdminAuthPayload, AdminToRelay, AgentRegisterPayload, AgentToRelay,
    RelayErrorCode, RelayToAdmin, RequestSupportPayload,
};

use crate::support::{self, ADMIN_TOKEN};

async fn authed_admin(ws_url: &str, name: &str) -> support::WsStream {
    let mut ws = support::connect(ws_url).await;
    support::send_json(
        &mut ws,
        &AdminToRelay::AdminAuth(AdminAuthPayload {
            admin_token: ADMIN_TOKEN.to_string(),
            admin_name: name.to_string(),
        }),
    )
    .await;
    let _auth_result: RelayToAdmin = support::recv_as(&mut ws).await;
    ws
}

#[tokio::test]
async fn only_one_admin_wins_a_concurrent_accept() {
    let relay = support::spawn_relay("parallel-accept", |_| {}).await;

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
    let _registered: servidesk_protocol::RelayToAgent = support::recv_as(&mut agent_ws).await;

    let mut admin_one = authed_admin(&relay.ws_url(), "one").await;
    let mut admin_two = authed_admin(&relay.ws_url(), "two").await;

    support::send_json(
        &mut agent_ws,
        &AgentToRelay::RequestSupport(RequestSupportPayload {
            customer_name: "Cust".to_string(),
            message: "help".to_string(),
            screen_w: 800,
            screen_h: 600,
        }),
    )
    .await;

    let request_one: RelayToAdmin = support::recv_as(&mut admin_one).await;
    let request_two: RelayToAdmin = support::recv_as(&mut admin_two).await;
    let RelayToAdmin::SupportRequest(request_one) = request_one else {
        panic!("expected support_request, got {request_one:?}");
    };
    let RelayToAdmin::SupportRequest(request_two) = request_two else {
        panic!("expected support_request, got {request_two:?}");
    };
    assert_eq!(request_one.session_id, request_two.session_id);
    let session_id = request_one.session_id;

    support::send_json(
        &mut admin_one,
        &AdminToRelay::AcceptSupport(AcceptSupportPayload { session_id }),
    )
    .await;
    support::send_json(
        &mut admin_two,
        &AdminToRelay::AcceptSupport(AcceptSupportPayload { session_id }),
    )
    .await;

    let (reply_one, reply_two) = tokio::join!(
        support::recv_as::<RelayToAdmin>(&mut admin_one),
        support::recv_as::<RelayToAdmin>(&mut admin_two)
    );

    let is_started = |r: &RelayToAdmin| matches!(r, RelayToAdmin::SessionStarted(_));
    let is_not_found =
        |r: &RelayToAdmin| matches!(r, RelayToAdmin::Error(e) if e.code == RelayErrorCode::SessionNotFound);

    let replies = [reply_one, reply_two];
    let started = replies.iter().filter(|r| is_started(r)).count();
    let rejected = replies.iter().filter(|r| is_not_found(r)).count();

    assert_eq!(started, 1, "exactly one admin should win the accept: {replies:?}");
    assert_eq!(rejected, 1, "the loser should see SessionNotFound: {replies:?}");
}
