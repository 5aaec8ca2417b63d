//! Relay session manager (C3): the public operations of spec.md §4.3,
//! each mutating the four shared tables under one critical section.

use uuid::Uuid;

use servidesk_protocol::{
    AgentId, AgentRecord, AgentStatus, DeviceListEntry, DeviceRecord, ErrorPayload, PasswordHash,
    PendingRequest, RelayErrorCode, RelayToAdmin, RelayToAgent, SessionId, SessionLogEntry,
};

use crate::state::{now_ms, ActiveEntry, ConnectionHandle, State};

fn sanitize(input: &str, max_len: usize) -> String {
    let stripped: String = input
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '&'))
        .collect();
    stripped.chars().take(max_len).collect()
}

fn valid_agent_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= 128
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn error(code: RelayErrorCode, message: impl Into<String>) -> RelayToAgent {
    RelayToAgent::Error(ErrorPayload {
        code,
        message: message.into(),
    })
}

fn admin_error(code: RelayErrorCode, message: impl Into<String>) -> RelayToAdmin {
    RelayToAdmin::Error(ErrorPayload {
        code,
        message: message.into(),
    })
}

/// Facade over [`crate::state::ServerState`] implementing spec.md §4.3's
/// public operations.
#[derive(Clone)]
pub struct SessionManager {
    state: State,
}

impl SessionManager {
    /// Wrap shared state.
    pub fn new(state: State) -> Self {
        Self { state }
    }

    /// `register_agent(conn, payload)`. Returns `true` once `handle` has
    /// been inserted into `agents` and owns the `agent_id`; `false` means
    /// the connection was rejected (invalid id or already connected) and
    /// the caller must not treat it as having joined that `agent_id` —
    /// in particular must not later run disconnect cleanup against it.
    pub async fn register_agent(
        &self,
        handle: ConnectionHandle,
        agent_id: String,
        hostname: String,
        os: Option<String>,
        version: Option<String>,
        hardware_summary: Option<String>,
    ) -> bool {
        if !valid_agent_id(&agent_id) {
            handle.send_json(&error(RelayErrorCode::InvalidData, "invalid agent id"));
            handle.close(4000);
            return false;
        }
        let agent_id = AgentId::new(agent_id).expect("validated above");

        let mut state = self.state.write().await;
        if state.agents.contains_key(&agent_id) {
            handle.send_json(&error(
                RelayErrorCode::AlreadyConnected,
                "agent already connected",
            ));
            handle.close(4001);
            return false;
        }

        let hostname = sanitize(&hostname, 256);
        let record = AgentRecord {
            agent_id: agent_id.clone(),
            hostname: hostname.clone(),
            os: os.clone().unwrap_or_default(),
            version: version.clone().unwrap_or_default(),
            hardware_summary: hardware_summary.clone(),
            unattended_enabled: state
                .devices
                .get(&agent_id)
                .map(|d| d.unattended_enabled)
                .unwrap_or(false),
            unattended_password_hash: state
                .devices
                .get(&agent_id)
                .and_then(|d| d.unattended_password_hash.clone()),
            last_heartbeat_ms: now_ms(),
            status: AgentStatus::Connected,
            session_id: None,
        };

        let now = now_ms();
        let device = match state.devices.get(&agent_id) {
            Some(existing) => DeviceRecord {
                agent_id: agent_id.clone(),
                hostname: hostname.clone(),
                os: record.os.clone(),
                version: record.version.clone(),
                customer_name: existing.customer_name.clone(),
                first_seen_ms: existing.first_seen_ms,
                last_seen_ms: now,
                unattended_enabled: existing.unattended_enabled,
                unattended_password_hash: existing.unattended_password_hash.clone(),
                hardware_summary: hardware_summary.clone(),
            },
            None => DeviceRecord {
                agent_id: agent_id.clone(),
                hostname: hostname.clone(),
                os: record.os.clone(),
                version: record.version.clone(),
                customer_name: None,
                first_seen_ms: now,
                last_seen_ms: now,
                unattended_enabled: false,
                unattended_password_hash: None,
                hardware_summary: hardware_summary.clone(),
            },
        };

        if let Err(e) = state.devices.upsert(device).await {
            tracing::error!(error = %e, "failed to persist device record");
        }

        handle.send_json(&RelayToAgent::AgentRegistered(
            servidesk_protocol::AgentRegisteredPayload {
                session_id: agent_id.to_string(),
                status: "waiting".to_string(),
            },
        ));

        let broadcast_id = agent_id.clone();
        state
            .agents
            .insert(agent_id, crate::state::AgentConnection { handle, record });
        drop(state);

        self.broadcast_device_status(&broadcast_id).await;
        true
    }

    /// `request_support(agent_id, payload)`.
    pub async fn request_support(
        &self,
        agent_id: &AgentId,
        customer_name: String,
        message: String,
        screen_w: u16,
        screen_h: u16,
    ) {
        let mut state = self.state.write().await;
        let Some(agent) = state.agents.get_mut(agent_id) else {
            return;
        };

        if agent.record.status != AgentStatus::Connected {
            agent.handle.send_json(&error(
                RelayErrorCode::InvalidData,
                "a support request is already pending or in session",
            ));
            return;
        }

        // Belt-and-suspenders alongside the status check above: each
        // agent_id has at most one pending request (spec.md §3).
        if state.pending.values().any(|p| &p.agent_id == agent_id) {
            return;
        }

        if state.pending.len() as u32 >= state.config.max_pending_requests {
            agent
                .handle
                .send_json(&error(RelayErrorCode::RateLimited, "too many pending requests"));
            return;
        }

        let session_id = SessionId::generate();
        let request = PendingRequest {
            session_id,
            agent_id: agent_id.clone(),
            customer_name: sanitize(&customer_name, 128),
            message: sanitize(&message, 512),
            screen_w,
            screen_h,
            requested_at_ms: now_ms(),
        };
        agent.record.status = AgentStatus::Waiting;
        state.pending.insert(session_id, request.clone());

        let broadcast = RelayToAdmin::SupportRequest(servidesk_protocol::SupportRequestPayload {
            session_id,
            agent_id: agent_id.clone(),
            customer_name: request.customer_name,
            message: request.message,
            screen_w,
            screen_h,
        });
        for admin in state.admins.values() {
            admin.handle.send_json(&broadcast);
        }
    }

    /// `accept_support(session_id, admin_conn, admin_name)`.
    pub async fn accept_support(&self, session_id: SessionId, admin_id: Uuid) {
        let mut state = self.state.write().await;

        let Some(request) = state.pending.remove(&session_id) else {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin.handle.send_json(&admin_error(
                    RelayErrorCode::SessionNotFound,
                    "no such pending request",
                ));
            }
            return;
        };

        let Some(admin_name) = state.admins.get(&admin_id).map(|a| a.admin_name.clone()) else {
            return;
        };

        let Some(agent) = state.agents.get_mut(&request.agent_id) else {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin
                    .handle
                    .send_json(&admin_error(RelayErrorCode::AgentDisconnected, "agent is gone"));
            }
            return;
        };

        if state.active.len() as u32 >= state.config.max_active_sessions {
            agent.record.status = AgentStatus::Connected;
            state.pending.insert(session_id, request);
            if let Some(admin) = state.admins.get(&admin_id) {
                admin.handle.send_json(&admin_error(
                    RelayErrorCode::RateLimited,
                    "too many active sessions",
                ));
            }
            return;
        }

        agent.record.status = AgentStatus::InSession;
        agent.record.session_id = Some(session_id);
        agent.handle.send_json(&RelayToAgent::SessionAccepted(
            servidesk_protocol::SessionAcceptedPayload {
                admin_name: admin_name.clone(),
                message: None,
            },
        ));

        let started_at_ms = now_ms();
        state.active.insert(
            session_id,
            ActiveEntry {
                agent_id: request.agent_id.clone(),
                admin_id,
                admin_name: admin_name.clone(),
                started_at_ms,
                last_activity_ms: started_at_ms,
                unattended: false,
            },
        );

        if let Some(admin) = state.admins.get(&admin_id) {
            admin.handle.send_json(&RelayToAdmin::SessionStarted(
                servidesk_protocol::SessionStartedPayload {
                    session_id,
                    screen_w: request.screen_w,
                    screen_h: request.screen_h,
                },
            ));
        }
    }

    /// `reject_request(session_id, reason)`.
    pub async fn reject_request(&self, session_id: SessionId, reason: Option<String>) {
        let mut state = self.state.write().await;
        let Some(request) = state.pending.remove(&session_id) else {
            return;
        };
        if let Some(agent) = state.agents.get_mut(&request.agent_id) {
            agent.record.status = AgentStatus::Connected;
            agent
                .handle
                .send_json(&RelayToAgent::RequestRejected(
                    servidesk_protocol::RequestRejectedPayload {
                        reason: reason.clone(),
                    },
                ));
        }
        let broadcast = RelayToAdmin::RequestCancelled(servidesk_protocol::RequestCancelledPayload {
            session_id,
        });
        for admin in state.admins.values() {
            admin.handle.send_json(&broadcast);
        }
    }

    /// `end_session(session_id, reason, ended_by)`.
    pub async fn end_session(&self, session_id: SessionId, reason: &str, ended_by: &str) {
        let mut state = self.state.write().await;
        state.pending.remove(&session_id);
        let Some(entry) = state.active.remove(&session_id) else {
            return;
        };

        let ended_payload = RelayToAgent::SessionEnded(servidesk_protocol::SessionEndedPayload {
            reason: reason.to_string(),
            ended_by: ended_by.to_string(),
        });
        let admin_payload = RelayToAdmin::SessionEnded(servidesk_protocol::SessionEndedPayload {
            reason: reason.to_string(),
            ended_by: ended_by.to_string(),
        });

        if let Some(agent) = state.agents.get_mut(&entry.agent_id) {
            agent.record.status = AgentStatus::Connected;
            agent.record.session_id = None;
            agent.handle.send_json(&ended_payload);
        }
        if let Some(admin) = state.admins.get(&entry.admin_id) {
            admin.handle.send_json(&admin_payload);
        }

        let ended_at_ms = now_ms();
        let log_entry = SessionLogEntry {
            session_id,
            agent_id: entry.agent_id,
            admin_name: entry.admin_name,
            started_at_ms: entry.started_at_ms,
            ended_at_ms,
            duration_secs: ended_at_ms.saturating_sub(entry.started_at_ms) / 1000,
            end_reason: reason.to_string(),
            ended_by: ended_by.to_string(),
        };
        if let Err(e) = state.session_log.append(log_entry).await {
            tracing::error!(error = %e, "failed to persist session log entry");
        }
    }

    /// `connect_unattended(admin_conn, agent_id, password_hash, admin_name)`.
    pub async fn connect_unattended(
        &self,
        admin_id: Uuid,
        agent_id: AgentId,
        password_hash: String,
    ) {
        let mut state = self.state.write().await;

        let Some(candidate) = PasswordHash::new(password_hash) else {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin.handle.send_json(&admin_error(
                    RelayErrorCode::InvalidPassword,
                    "malformed password hash",
                ));
            }
            return;
        };

        let Some(device) = state.devices.get(&agent_id).cloned() else {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin
                    .handle
                    .send_json(&admin_error(RelayErrorCode::AgentOffline, "device unknown"));
            }
            return;
        };

        if !device.unattended_enabled {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin.handle.send_json(&admin_error(
                    RelayErrorCode::UnattendedDisabled,
                    "unattended access is disabled",
                ));
            }
            return;
        }

        let Some(expected) = device.unattended_password_hash.clone() else {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin
                    .handle
                    .send_json(&admin_error(RelayErrorCode::NoPassword, "no password set"));
            }
            return;
        };

        if !expected.constant_time_eq(&candidate) {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin.handle.send_json(&admin_error(
                    RelayErrorCode::InvalidPassword,
                    "password does not match",
                ));
            }
            return;
        }

        let Some(agent) = state.agents.get_mut(&agent_id) else {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin
                    .handle
                    .send_json(&admin_error(RelayErrorCode::AgentOffline, "agent is not online"));
            }
            return;
        };

        if agent.record.status != AgentStatus::Connected {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin.handle.send_json(&admin_error(
                    RelayErrorCode::AgentOnline,
                    "agent is already in a session",
                ));
            }
            return;
        }

        if state.active.len() as u32 >= state.config.max_active_sessions {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin.handle.send_json(&admin_error(
                    RelayErrorCode::RateLimited,
                    "too many active sessions",
                ));
            }
            return;
        }

        let Some(admin_name) = state.admins.get(&admin_id).map(|a| a.admin_name.clone()) else {
            return;
        };

        let session_id = SessionId::generate();
        agent.record.status = AgentStatus::InSession;
        agent.record.session_id = Some(session_id);
        agent.handle.send_json(&RelayToAgent::SessionAccepted(
            servidesk_protocol::SessionAcceptedPayload {
                admin_name: admin_name.clone(),
                message: None,
            },
        ));

        let started_at_ms = now_ms();
        state.active.insert(
            session_id,
            ActiveEntry {
                agent_id,
                admin_id,
                admin_name,
                started_at_ms,
                last_activity_ms: started_at_ms,
                unattended: true,
            },
        );

        if let Some(admin) = state.admins.get(&admin_id) {
            admin.handle.send_json(&RelayToAdmin::SessionStarted(
                servidesk_protocol::SessionStartedPayload {
                    session_id,
                    screen_w: 0,
                    screen_h: 0,
                },
            ));
        }
    }

    /// `delete_device(agent_id)`.
    pub async fn delete_device(&self, admin_id: Uuid, agent_id: AgentId) {
        let mut state = self.state.write().await;
        if state.agents.contains_key(&agent_id) {
            if let Some(admin) = state.admins.get(&admin_id) {
                admin
                    .handle
                    .send_json(&admin_error(RelayErrorCode::AgentOnline, "agent is online"));
            }
            return;
        }
        match state.devices.remove(&agent_id).await {
            Ok(true) => {
                let broadcast = RelayToAdmin::DeviceDeleted(servidesk_protocol::DeviceDeletedPayload {
                    agent_id: agent_id.clone(),
                });
                for admin in state.admins.values() {
                    admin.handle.send_json(&broadcast);
                }
            }
            Ok(false) => {
                if let Some(admin) = state.admins.get(&admin_id) {
                    admin
                        .handle
                        .send_json(&admin_error(RelayErrorCode::AgentNotFound, "device not found"));
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to remove device record"),
        }
    }

    /// `get_device_list()`.
    pub async fn get_device_list(&self, admin_id: Uuid) {
        let state = self.state.read().await;
        let mut entries: Vec<DeviceListEntry> = state
            .devices
            .all()
            .map(|record| DeviceListEntry {
                record: record.clone(),
                is_online: state.agents.contains_key(&record.agent_id),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.is_online
                .cmp(&a.is_online)
                .then(b.record.last_seen_ms.cmp(&a.record.last_seen_ms))
        });
        if let Some(admin) = state.admins.get(&admin_id) {
            admin.handle.send_json(&RelayToAdmin::DeviceList(
                servidesk_protocol::DeviceListPayload { devices: entries },
            ));
        }
    }

    /// Remove an agent's live connection and end any session it owns,
    /// broadcasting `device_status_changed` exactly once
    /// (spec.md §8 scenario 3).
    pub async fn disconnect_agent(&self, agent_id: &AgentId) {
        let session_to_end = {
            let state = self.state.read().await;
            state
                .agents
                .get(agent_id)
                .and_then(|a| a.record.session_id)
        };
        if let Some(session_id) = session_to_end {
            self.end_session(session_id, "error", "agent_disconnected").await;
        }
        {
            let mut state = self.state.write().await;
            state.agents.remove(agent_id);
            state.pending.retain(|_, p| &p.agent_id != agent_id);
        }
        self.broadcast_device_status(agent_id).await;
    }

    /// Remove an admin's live connection, ending any session it owns
    /// with `viewer_disconnected`.
    pub async fn disconnect_admin(&self, admin_id: Uuid) {
        let session_to_end = {
            let state = self.state.read().await;
            state
                .active
                .iter()
                .find(|(_, entry)| entry.admin_id == admin_id)
                .map(|(id, _)| *id)
        };
        if let Some(session_id) = session_to_end {
            self.end_session(session_id, "error", "viewer_disconnected").await;
        }
        let mut state = self.state.write().await;
        state.admins.remove(&admin_id);
    }

    async fn broadcast_device_status(&self, agent_id: &AgentId) {
        let state = self.state.read().await;
        let is_online = state.agents.contains_key(agent_id);
        let broadcast = RelayToAdmin::DeviceStatusChanged(
            servidesk_protocol::DeviceStatusChangedPayload {
                agent_id: agent_id.clone(),
                is_online,
            },
        );
        for admin in state.admins.values() {
            admin.handle.send_json(&broadcast);
        }
    }
}
