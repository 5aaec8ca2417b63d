//! Shared data-model records (spec.md §3), owned by the relay but defined
//! here so the peer clients can deserialize the same shapes off the wire
//! (e.g. `device_list`) without redefining them.

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// Where an agent sits in the registration/session state machine
/// (spec.md §4.3 "State machine (agent)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered, not requesting or in a session.
    Connected,
    /// A support request is pending admin action.
    Waiting,
    /// Bound to an active session.
    InSession,
}

/// A 64-character lowercase hex SHA-256 digest, used for the unattended
/// access password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Validate and wrap a candidate password hash.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let valid = raw.len() == 64 && raw.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase());
        valid.then_some(Self(raw))
    }

    /// Borrow the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time equality over the two hex strings, as required by
    /// spec.md §4.3 for unattended-access password comparison.
    pub fn constant_time_eq(&self, other: &PasswordHash) -> bool {
        let a = self.0.as_bytes();
        let b = other.0.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        let mut diff: u8 = 0;
        for (x, y) in a.iter().zip(b.iter()) {
            diff |= x ^ y;
        }
        diff == 0
    }
}

/// The relay's live record of one connected agent (spec.md §3 "Agent
/// registration record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Stable agent id.
    pub agent_id: AgentId,
    /// Reported hostname.
    pub hostname: String,
    /// Reported OS string.
    pub os: String,
    /// Reported agent software version.
    pub version: String,
    /// Free-form hardware summary, if supplied.
    pub hardware_summary: Option<String>,
    /// Whether unattended access is enabled on this agent.
    pub unattended_enabled: bool,
    /// Hash of the unattended-access password, if enabled.
    pub unattended_password_hash: Option<PasswordHash>,
    /// Unix millis of the last heartbeat.
    pub last_heartbeat_ms: u64,
    /// Current state-machine status.
    pub status: AgentStatus,
    /// Session the agent is bound to, if any.
    pub session_id: Option<crate::ids::SessionId>,
}

/// A not-yet-accepted support request (spec.md §3 "Pending request").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Session id this request will become if accepted.
    pub session_id: crate::ids::SessionId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Sanitized customer-supplied display name.
    pub customer_name: String,
    /// Sanitized customer-supplied message.
    pub message: String,
    /// Remote screen width in pixels.
    pub screen_w: u16,
    /// Remote screen height in pixels.
    pub screen_h: u16,
    /// Unix millis the request was created.
    pub requested_at_ms: u64,
}

/// A live admin-agent pairing (spec.md §3 "Active session").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSession {
    /// Session id.
    pub session_id: crate::ids::SessionId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Technician display name.
    pub admin_name: String,
    /// Unix millis the session started.
    pub started_at_ms: u64,
    /// Unix millis of the last forwarded message on either side.
    pub last_activity_ms: u64,
    /// Whether this session was established without agent-side consent.
    pub unattended: bool,
}

/// Persistent device-registry entry (spec.md §3 "Device registry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable agent id, the registry key.
    pub agent_id: AgentId,
    /// Last known hostname.
    pub hostname: String,
    /// Last known OS string.
    pub os: String,
    /// Last known agent version.
    pub version: String,
    /// Customer display name, if supplied.
    pub customer_name: Option<String>,
    /// Unix millis of first registration.
    pub first_seen_ms: u64,
    /// Unix millis of most recent registration.
    pub last_seen_ms: u64,
    /// Whether unattended access is enabled.
    pub unattended_enabled: bool,
    /// Hash of the unattended-access password, if enabled.
    pub unattended_password_hash: Option<PasswordHash>,
    /// Free-form hardware summary.
    pub hardware_summary: Option<String>,
}

/// One line of the append-only session history (spec.md §3 "Session
/// log").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEntry {
    /// Session id.
    pub session_id: crate::ids::SessionId,
    /// Owning agent id.
    pub agent_id: AgentId,
    /// Technician display name.
    pub admin_name: String,
    /// Unix millis the session started.
    pub started_at_ms: u64,
    /// Unix millis the session ended.
    pub ended_at_ms: u64,
    /// Duration in seconds, derived from the two timestamps.
    pub duration_secs: u64,
    /// Why the session ended (`"completed"`, `"timeout"`, `"error"`, …).
    pub end_reason: String,
    /// Who ended it (`"admin"`, `"agent"`, `"server"`).
    pub ended_by: String,
}

/// A `device_list` entry as sent to admins: the persisted record plus
/// the live online flag computed from the current agent table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceListEntry {
    /// The persisted registry record.
    #[serde(flatten)]
    pub record: DeviceRecord,
    /// Whether the agent currently holds a live connection.
    pub is_online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_requires_64_lowercase_hex_chars() {
        assert!(PasswordHash::new("a".repeat(64)).is_some());
        assert!(PasswordHash::new("A".repeat(64)).is_none());
        assert!(PasswordHash::new("a".repeat(63)).is_none());
        assert!(PasswordHash::new("g".repeat(64)).is_none());
    }

    #[test]
    fn password_hash_constant_time_eq_matches_only_equal_values() {
        let a = PasswordHash::new("a".repeat(64)).unwrap();
        let b = PasswordHash::new("a".repeat(64)).unwrap();
        let c = PasswordHash::new("b".repeat(64)).unwrap();
        assert!(a.constant_time_eq(&b));
        assert!(!a.constant_time_eq(&c));
    }
}
