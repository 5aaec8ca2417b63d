//! WebSocket upgrade handler: admission, the handshake message, and the
//! per-connection read/write tasks (spec.md §4.4).

use std::net::{IpAddr, SocketAddr};

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State as AxumState;
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use servidesk_protocol::{
    peek_type, AdminAuthPayload, AdminAuthResultPayload, AdminToRelay, AgentRegisterPayload,
    AgentToRelay, ErrorPayload, Packet, RelayErrorCode, RelayToAdmin, RelayToAgent,
};

use crate::forwarding::{self, AdmissionError, RateLimiter, Role};
use crate::session::SessionManager;
use crate::state::{ConnectionHandle, OutboundMessage, State};

/// Resolve the connection's source IP, honoring `trust_proxy`.
fn resolve_addr(config_trust_proxy: bool, headers: &HeaderMap, socket_addr: SocketAddr) -> IpAddr {
    if config_trust_proxy {
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = forwarded.split(',').next() {
                if let Ok(addr) = first.trim().parse::<IpAddr>() {
                    return addr;
                }
            }
        }
    }
    socket_addr.ip()
}

/// Axum handler mounted at the WebSocket endpoint.
pub async fn upgrade(
    AxumState(state): AxumState<State>,
    ConnectInfo(socket_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let trust_proxy = state.read().await.config.trust_proxy;
    let addr = resolve_addr(trust_proxy, &headers, socket_addr);
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, origin))
}

async fn handle_socket(socket: WebSocket, state: State, addr: IpAddr, origin: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

    let handle = ConnectionHandle {
        id: Uuid::new_v4(),
        addr,
        outgoing: tx,
    };

    if let Err(admission_error) = forwarding::check_admission(&state, addr, origin.as_deref()).await {
        let _ = sender
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: close_code(admission_error),
                reason: "rejected".into(),
            })))
            .await;
        return;
    }

    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let result = match msg {
                OutboundMessage::Text(text) => sender.send(Message::Text(text)).await,
                OutboundMessage::Binary(bytes) => sender.send(Message::Binary(bytes)).await,
                OutboundMessage::Ping => sender.send(Message::Ping(Vec::new())).await,
                OutboundMessage::Close(code) => {
                    let _ = sender
                        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                            code,
                            reason: "closed".into(),
                        })))
                        .await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let manager = SessionManager::new(state.clone());
    let max_per_second = state.read().await.config.max_messages_per_second;
    let mut limiter = RateLimiter::new();

    // Handshake: the first message must declare the connection's role.
    let role = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match handshake(&state, &manager, &handle, &text).await {
                    Some(role) => break role,
                    None => return,
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(_)) => return,
            _ => continue,
        }
    };

    match role {
        ConnectionRole::Agent(agent_id) => {
            run_agent_loop(&state, &manager, &mut receiver, &mut limiter, max_per_second, agent_id)
                .await
        }
        ConnectionRole::Admin(admin_id) => {
            run_admin_loop(&state, &manager, &mut receiver, &mut limiter, max_per_second, admin_id)
                .await
        }
    }

    write_task.abort();
}

fn close_code(err: AdmissionError) -> u16 {
    err.close_code()
}

enum ConnectionRole {
    Agent(servidesk_protocol::AgentId),
    Admin(Uuid),
}

async fn handshake(
    state: &State,
    manager: &SessionManager,
    handle: &ConnectionHandle,
    text: &str,
) -> Option<ConnectionRole> {
    let raw: Value = serde_json::from_str(text).ok()?;
    match peek_type(&raw) {
        Some("agent_register") => {
            let AgentToRelay::AgentRegister(payload) =
                serde_json::from_value::<AgentToRelay>(raw).ok()?
            else {
                handle.close(forwarding::CLOSE_BAD_HANDSHAKE);
                return None;
            };
            let AgentRegisterPayload {
                agent_id,
                hostname,
                os,
                version,
                hardware_summary,
                agent_token,
            } = payload;

            let agent_secret = state.read().await.config.agent_secret.clone();
            if let Some(expected) = agent_secret {
                let shared_secret_ok = agent_token
                    .as_deref()
                    .is_some_and(|t| crate::auth::constant_time_eq(t, &expected));
                let provisioned_ok = if shared_secret_ok {
                    false
                } else if let Some(token) = agent_token.as_deref() {
                    state.write().await.agent_tokens.consume(token).await.unwrap_or(false)
                } else {
                    false
                };
                if !shared_secret_ok && !provisioned_ok {
                    handle.send_json(&RelayToAgent::Error(ErrorPayload {
                        code: RelayErrorCode::AuthFailed,
                        message: "invalid agent token".into(),
                    }));
                    handle.close(forwarding::CLOSE_AUTH_FAILED);
                    return None;
                }
            }

            let agent_id_for_role = agent_id.clone();
            let registered = manager
                .register_agent(handle.clone(), agent_id, hostname, os, version, hardware_summary)
                .await;

            if !registered {
                return None;
            }
            Some(ConnectionRole::Agent(
                servidesk_protocol::AgentId::new(agent_id_for_role).ok()?,
            ))
        }
        Some("admin_auth") => {
            let AdminToRelay::AdminAuth(AdminAuthPayload {
                admin_token,
                admin_name,
            }) = serde_json::from_value::<AdminToRelay>(raw).ok()?
            else {
                handle.close(forwarding::CLOSE_BAD_HANDSHAKE);
                return None;
            };

            let mut guard = state.write().await;
            if guard.auth.is_banned(handle.addr) {
                handle.close(forwarding::CLOSE_RATE_LIMITED);
                return None;
            }
            if !crate::auth::constant_time_eq(&admin_token, &guard.config.admin_token) {
                guard.auth.record_failure(handle.addr);
                handle.send_json(&RelayToAdmin::Error(ErrorPayload {
                    code: RelayErrorCode::AuthFailed,
                    message: "invalid admin token".into(),
                }));
                handle.close(forwarding::CLOSE_AUTH_FAILED);
                return None;
            }
            guard.auth.record_success(handle.addr);

            let pending_requests = guard.pending.values().cloned().collect();
            guard.admins.insert(
                handle.id,
                crate::state::AdminConnection {
                    handle: handle.clone(),
                    admin_name: sanitize_name(&admin_name),
                    last_heartbeat_ms: crate::state::now_ms(),
                },
            );
            drop(guard);

            handle.send_json(&RelayToAdmin::AdminAuthResult(AdminAuthResultPayload {
                success: true,
                pending_requests,
            }));
            Some(ConnectionRole::Admin(handle.id))
        }
        _ => {
            handle.close(forwarding::CLOSE_BAD_HANDSHAKE);
            None
        }
    }
}

fn sanitize_name(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '&'))
        .take(128)
        .collect()
}

async fn run_agent_loop(
    state: &State,
    manager: &SessionManager,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    limiter: &mut RateLimiter,
    max_per_second: u32,
    agent_id: servidesk_protocol::AgentId,
) {
    while let Some(msg) = receiver.next().await {
        let Ok(msg) = msg else { break };
        if !limiter.allow(max_per_second) {
            continue;
        }
        match msg {
            Message::Text(text) => {
                let Ok(parsed) = serde_json::from_str::<AgentToRelay>(&text) else {
                    continue;
                };
                match parsed {
                    AgentToRelay::RequestSupport(p) => {
                        manager
                            .request_support(&agent_id, p.customer_name, p.message, p.screen_w, p.screen_h)
                            .await;
                    }
                    AgentToRelay::SessionEnd(p) => {
                        if let Some(session_id) = forwarding::session_for_agent(state, &agent_id).await {
                            manager.end_session(session_id, &p.reason, "agent").await;
                        }
                    }
                    AgentToRelay::Heartbeat(p) => {
                        if let Some(agent) = state.write().await.agents.get_mut(&agent_id) {
                            agent.record.last_heartbeat_ms = crate::state::now_ms();
                            agent.handle.send_json(&RelayToAgent::HeartbeatAck(
                                servidesk_protocol::HeartbeatAckPayload {
                                    client_timestamp_ms: p.client_timestamp_ms,
                                    server_timestamp_ms: crate::state::now_ms(),
                                },
                            ));
                        }
                    }
                    AgentToRelay::MonitorInfo(_)
                    | AgentToRelay::MonitorSwitched(_)
                    | AgentToRelay::ChatMessage(_)
                    | AgentToRelay::E2eKeyExchange(_)
                    | AgentToRelay::FileAccept(_)
                    | AgentToRelay::FileError(_) => {
                        if let Some(session_id) = forwarding::session_for_agent(state, &agent_id).await {
                            forwarding::relay_text(state, session_id, Role::Agent, text).await;
                        }
                    }
                    AgentToRelay::UpdateAgentInfo(p) => {
                        let mut guard = state.write().await;
                        let Some(agent) = guard.agents.get_mut(&agent_id) else {
                            continue;
                        };
                        if let Some(hostname) = p.hostname {
                            agent.record.hostname = hostname;
                        }
                        if let Some(os) = p.os {
                            agent.record.os = os;
                        }
                        if let Some(version) = p.version {
                            agent.record.version = version;
                        }
                        if p.hardware_summary.is_some() {
                            agent.record.hardware_summary = p.hardware_summary;
                        }
                        let snapshot = (
                            agent.record.hostname.clone(),
                            agent.record.os.clone(),
                            agent.record.version.clone(),
                            agent.record.hardware_summary.clone(),
                        );
                        if let Some(mut device) = guard.devices.get(&agent_id).cloned() {
                            (device.hostname, device.os, device.version, device.hardware_summary) = snapshot;
                            device.last_seen_ms = crate::state::now_ms();
                            let _ = guard.devices.upsert(device).await;
                        }
                    }
                    AgentToRelay::AgentRegister(_) | AgentToRelay::Other(_, _) => {}
                }
            }
            Message::Binary(bytes) => {
                if Packet::decode(&bytes).is_err() {
                    continue;
                }
                if let Some(session_id) = forwarding::session_for_agent(state, &agent_id).await {
                    forwarding::touch_session(state, session_id).await;
                    forwarding::relay_binary(state, session_id, Role::Agent, bytes).await;
                }
            }
            Message::Pong(_) => {
                if let Some(agent) = state.write().await.agents.get_mut(&agent_id) {
                    agent.record.last_heartbeat_ms = crate::state::now_ms();
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    manager.disconnect_agent(&agent_id).await;
}

async fn run_admin_loop(
    state: &State,
    manager: &SessionManager,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    limiter: &mut RateLimiter,
    max_per_second: u32,
    admin_id: Uuid,
) {
    while let Some(msg) = receiver.next().await {
        let Ok(msg) = msg else { break };
        if !limiter.allow(max_per_second) {
            continue;
        }
        match msg {
            Message::Text(text) => {
                let Ok(parsed) = serde_json::from_str::<AdminToRelay>(&text) else {
                    continue;
                };
                match parsed {
                    AdminToRelay::AcceptSupport(p) => manager.accept_support(p.session_id, admin_id).await,
                    AdminToRelay::RejectRequest(p) => manager.reject_request(p.session_id, p.reason).await,
                    AdminToRelay::SessionEnd(p) => {
                        if let Some(session_id) = forwarding::session_for_admin(state, admin_id).await {
                            manager.end_session(session_id, &p.reason, "admin").await;
                        }
                    }
                    AdminToRelay::GetDeviceList(_) => manager.get_device_list(admin_id).await,
                    AdminToRelay::DeleteDevice(p) => manager.delete_device(admin_id, p.agent_id).await,
                    AdminToRelay::ConnectUnattended(p) => {
                        manager
                            .connect_unattended(admin_id, p.agent_id, p.password.as_str().to_string())
                            .await;
                    }
                    AdminToRelay::Heartbeat(p) => {
                        let mut guard = state.write().await;
                        if let Some(admin) = guard.admins.get_mut(&admin_id) {
                            admin.last_heartbeat_ms = crate::state::now_ms();
                            admin.handle.send_json(&RelayToAdmin::HeartbeatAck(
                                servidesk_protocol::HeartbeatAckPayload {
                                    client_timestamp_ms: p.client_timestamp_ms,
                                    server_timestamp_ms: crate::state::now_ms(),
                                },
                            ));
                        }
                    }
                    AdminToRelay::QualityChange(_)
                    | AdminToRelay::ChatMessage(_)
                    | AdminToRelay::E2eKeyExchange(_)
                    | AdminToRelay::FileOffer(_)
                    | AdminToRelay::FileComplete(_)
                    | AdminToRelay::FileError(_) => {
                        if let Some(session_id) = forwarding::session_for_admin(state, admin_id).await {
                            forwarding::relay_text(state, session_id, Role::Admin, text).await;
                        }
                    }
                    AdminToRelay::AdminAuth(_) | AdminToRelay::Other(_, _) => {}
                }
            }
            Message::Binary(bytes) => {
                if Packet::decode(&bytes).is_err() {
                    continue;
                }
                if let Some(session_id) = forwarding::session_for_admin(state, admin_id).await {
                    forwarding::touch_session(state, session_id).await;
                    forwarding::relay_binary(state, session_id, Role::Admin, bytes).await;
                }
            }
            Message::Pong(_) => {
                if let Some(admin) = state.write().await.admins.get_mut(&admin_id) {
                    admin.last_heartbeat_ms = crate::state::now_ms();
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    manager.disconnect_admin(admin_id).await;
}
