//! Connection admission, handshake enforcement, per-connection rate
//! limiting, and the bidirectional agent/viewer relay (spec.md §4.4,
//! §5 "Rate limiting", §9 "Hostile first message").

use std::net::IpAddr;
use std::time::{Duration, Instant};

use uuid::Uuid;

use servidesk_protocol::{AgentId, SessionId};

use crate::state::{OutboundMessage, State};

/// WebSocket close code used when the first message on a connection is
/// not `agent_register`/`admin_auth`, or fails validation outright.
pub const CLOSE_BAD_HANDSHAKE: u16 = 4000;
/// Close code used when an `agent_id` is already live on another connection.
pub const CLOSE_ALREADY_CONNECTED: u16 = 4001;
/// Close code used when a token/password check in the handshake fails
/// (spec.md §6: "4001 authentication failure").
pub const CLOSE_AUTH_FAILED: u16 = 4001;
/// Close code used when the source IP is banned, over its connection cap,
/// or its `Origin` header is not on the allow-list (spec.md §6 lists a
/// single 4003 for "banned or over per-IP limit"; origin rejection is an
/// admission-time reject of the same kind and shares the code).
pub const CLOSE_FORBIDDEN_ORIGIN: u16 = 4003;
/// Close code used when the source IP is banned or over its connection cap.
pub const CLOSE_RATE_LIMITED: u16 = 4003;

/// Reject reasons surfaced to the caller before a socket is accepted into
/// the handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// Source IP is serving an active admin-auth ban.
    Banned,
    /// Source IP already holds `max_connections_per_ip` live sockets.
    TooManyConnections,
    /// `Origin` header did not match `allowed_origins`.
    OriginRejected,
}

impl AdmissionError {
    /// The WebSocket close code this rejection maps to.
    pub fn close_code(self) -> u16 {
        match self {
            AdmissionError::Banned | AdmissionError::TooManyConnections => CLOSE_RATE_LIMITED,
            AdmissionError::OriginRejected => CLOSE_FORBIDDEN_ORIGIN,
        }
    }
}

/// Check origin/ban/connection-count admission before a socket is
/// upgraded into a live connection (spec.md §4.4 "Admission").
pub async fn check_admission(
    state: &State,
    addr: IpAddr,
    origin: Option<&str>,
) -> Result<(), AdmissionError> {
    let guard = state.read().await;

    if !is_origin_allowed(&guard.config.allowed_origins, origin) {
        return Err(AdmissionError::OriginRejected);
    }
    if guard.auth.is_banned(addr) {
        return Err(AdmissionError::Banned);
    }
    let live_from_addr = guard
        .agents
        .values()
        .filter(|a| a.handle.addr == addr)
        .count()
        + guard.admins.values().filter(|a| a.handle.addr == addr).count();
    if live_from_addr as u32 >= guard.config.max_connections_per_ip {
        return Err(AdmissionError::TooManyConnections);
    }
    Ok(())
}

/// An empty allow-list means unrestricted; otherwise the `Origin` header
/// must be present and match an entry exactly.
pub fn is_origin_allowed(allowed: &[String], origin: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match origin {
        Some(o) => allowed.iter().any(|a| a == o),
        None => false,
    }
}

/// Fixed-window per-connection message-rate limiter
/// (spec.md §5 "Rate limiting").
pub struct RateLimiter {
    window_started_at: Instant,
    count: u32,
}

impl RateLimiter {
    /// Start a fresh one-second window.
    pub fn new() -> Self {
        Self {
            window_started_at: Instant::now(),
            count: 0,
        }
    }

    /// Record one message; returns `false` once `max_per_second` is
    /// exceeded within the current rolling one-second window.
    pub fn allow(&mut self, max_per_second: u32) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_started_at) >= Duration::from_secs(1) {
            self.window_started_at = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= max_per_second
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Which side of an active session a connection is acting as, for
/// forwarding purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The agent half of the pairing.
    Agent,
    /// The admin/viewer half of the pairing.
    Admin,
}

/// Forward a binary frame (video/input/clipboard/file-transfer/regional
/// update packets) from one side of an active session to the other,
/// without inspecting its contents (spec.md §4.4 "Binary relay").
pub async fn relay_binary(
    state: &State,
    session_id: SessionId,
    from: Role,
    frame: Vec<u8>,
) {
    let guard = state.read().await;
    let Some(entry) = guard.active.get(&session_id) else {
        return;
    };
    match from {
        Role::Agent => {
            if let Some(admin) = guard.admins.get(&entry.admin_id) {
                admin.handle.send_binary(frame);
            }
        }
        Role::Admin => {
            if let Some(agent) = guard.agents.get(&entry.agent_id) {
                agent.handle.send_binary(frame);
            }
        }
    }
}

/// Forward a JSON envelope that the relay does not interpret (e.g.
/// `chat_message`, `e2e_key_exchange`, `monitor_info`) verbatim to the
/// session's other side.
pub async fn relay_text(state: &State, session_id: SessionId, from: Role, text: String) {
    let guard = state.read().await;
    let Some(entry) = guard.active.get(&session_id) else {
        return;
    };
    match from {
        Role::Agent => {
            if let Some(admin) = guard.admins.get(&entry.admin_id) {
                let _ = admin.handle.outgoing.send(OutboundMessage::Text(text));
            }
        }
        Role::Admin => {
            if let Some(agent) = guard.agents.get(&entry.agent_id) {
                let _ = agent.handle.outgoing.send(OutboundMessage::Text(text));
            }
        }
    }
}

/// Find the session an agent connection currently belongs to, if any.
pub async fn session_for_agent(state: &State, agent_id: &AgentId) -> Option<SessionId> {
    let guard = state.read().await;
    guard.agents.get(agent_id).and_then(|a| a.record.session_id)
}

/// Find the session an admin connection currently belongs to, if any.
pub async fn session_for_admin(state: &State, admin_id: Uuid) -> Option<SessionId> {
    let guard = state.read().await;
    guard
        .active
        .iter()
        .find(|(_, entry)| entry.admin_id == admin_id)
        .map(|(id, _)| *id)
}

/// Stamp a session's `last_activity_ms`, used by the idle-timeout reaper.
pub async fn touch_session(state: &State, session_id: SessionId) {
    let mut guard = state.write().await;
    if let Some(entry) = guard.active.get_mut(&session_id) {
        entry.last_activity_ms = crate::state::now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_allow_list_empty_means_unrestricted() {
        assert!(is_origin_allowed(&[], None));
        assert!(is_origin_allowed(&[], Some("https://evil.example")));
    }

    #[test]
    fn origin_allow_list_requires_exact_match() {
        let allowed = vec!["https://support.example".to_string()];
        assert!(is_origin_allowed(&allowed, Some("https://support.example")));
        assert!(!is_origin_allowed(&allowed, Some("https://other.example")));
        assert!(!is_origin_allowed(&allowed, None));
    }

    #[test]
    fn rate_limiter_blocks_past_threshold_within_window() {
        let mut limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.allow(5));
        }
        assert!(!limiter.allow(5));
    }
}
