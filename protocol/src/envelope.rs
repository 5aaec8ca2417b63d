//! JSON envelope types: `{"type": ..., "payload": ..., "timestamp"?: ...}`.
//!
//! One adjacently-tagged enum per direction (spec.md §6's JSON type
//! inventory), each with an `Other` fallback variant so an unrecognized
//! `type` round-trips instead of failing deserialization (spec.md §9
//! "Duck-typed JSON payloads").

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::device::{DeviceListEntry, PasswordHash};
use crate::ids::{AgentId, SessionId};
use crate::quality::Quality;

/// Declare a JSON-envelope enum whose wire shape is always
/// `{"type": <tag>, "payload": <value>}`, with a final `Other(tag,
/// value)` arm absorbing any `type` not named here. `#[serde(tag,
/// content)]` can't express that fallback directly (unknown variant
/// names are a hard deserialize error), so this macro hand-rolls the
/// `Serialize`/`Deserialize` pair instead.
fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}

macro_rules! envelope_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident($payload:ty) => $tag:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub enum $name {
            $($(#[$vmeta])* $variant($payload),)+
            /// A `type` value not named above, kept verbatim so callers
            /// can ignore it without losing what it was.
            Other(String, Value),
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                #[derive(Serialize)]
                struct Wire<'a, T> {
                    r#type: &'a str,
                    payload: &'a T,
                }
                match self {
                    $($name::$variant(payload) => {
                        Wire { r#type: $tag, payload }.serialize(serializer)
                    })+
                    $name::Other(tag, value) => {
                        Wire { r#type: tag.as_str(), payload: value }.serialize(serializer)
                    }
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                #[derive(Deserialize)]
                struct Raw {
                    r#type: String,
                    #[serde(default = "empty_payload")]
                    payload: Value,
                }
                let raw = Raw::deserialize(deserializer)?;
                match raw.r#type.as_str() {
                    $($tag => {
                        let payload = serde_json::from_value(raw.payload).map_err(D::Error::custom)?;
                        Ok($name::$variant(payload))
                    })+
                    _ => Ok($name::Other(raw.r#type, raw.payload)),
                }
            }
        }
    };
}

/// Wire-visible error codes (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayErrorCode {
    /// Malformed or unparsable payload.
    InvalidData,
    /// A JSON envelope failed schema validation for its declared type.
    InvalidMessage,
    /// Admin or agent credential check failed.
    AuthFailed,
    /// Action attempted before `admin_auth`/`agent_register` succeeded.
    NotAuthenticated,
    /// Referenced `agent_id` has no registry entry.
    AgentNotFound,
    /// Referenced agent's connection is not currently open.
    AgentDisconnected,
    /// Referenced agent has no live connection (unattended path).
    AgentOffline,
    /// Referenced agent already has a live connection.
    AgentOnline,
    /// A second registration arrived while the first connection is alive.
    AlreadyConnected,
    /// Referenced `session_id` has no pending or active entry.
    SessionNotFound,
    /// Caller exceeded a rate or ban threshold.
    RateLimited,
    /// Unattended access is not enabled on the target agent.
    UnattendedDisabled,
    /// Unattended access is enabled but no password hash is set.
    NoPassword,
    /// Supplied unattended password hash did not match.
    InvalidPassword,
    /// Unexpected internal failure.
    InternalError,
    /// The outbound connection attempt failed.
    ConnectionFailed,
}

/// Body of a `type:"error"` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Machine-readable error code.
    pub code: RelayErrorCode,
    /// Human-readable, localizable message.
    pub message: String,
}

/// `agent_register` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegisterPayload {
    /// Candidate stable agent id.
    pub agent_id: String,
    /// Reported hostname.
    pub hostname: String,
    /// Reported OS string.
    #[serde(default)]
    pub os: Option<String>,
    /// Reported agent version.
    #[serde(default)]
    pub version: Option<String>,
    /// Free-form hardware summary.
    #[serde(default)]
    pub hardware_summary: Option<String>,
    /// Provisioning or shared agent-secret token, if required.
    #[serde(default)]
    pub agent_token: Option<String>,
}

/// `agent_registered` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegisteredPayload {
    /// Correlation id for this registration.
    pub session_id: String,
    /// Always `"waiting"` on success.
    pub status: String,
}

/// `request_support` payload (agent → relay).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSupportPayload {
    /// Sanitized customer display name.
    pub customer_name: String,
    /// Sanitized customer message.
    pub message: String,
    /// Remote screen width in pixels.
    pub screen_w: u16,
    /// Remote screen height in pixels.
    pub screen_h: u16,
}

/// `support_request` broadcast (relay → admin).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportRequestPayload {
    /// Session id this request will become if accepted.
    pub session_id: SessionId,
    /// Owning agent.
    pub agent_id: AgentId,
    /// Sanitized customer display name.
    pub customer_name: String,
    /// Sanitized customer message.
    pub message: String,
    /// Remote screen width in pixels.
    pub screen_w: u16,
    /// Remote screen height in pixels.
    pub screen_h: u16,
}

/// `update_agent_info` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAgentInfoPayload {
    /// Updated hostname, if changed.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Updated OS string, if changed.
    #[serde(default)]
    pub os: Option<String>,
    /// Updated agent version, if changed.
    #[serde(default)]
    pub version: Option<String>,
    /// Updated hardware summary, if changed.
    #[serde(default)]
    pub hardware_summary: Option<String>,
}

/// `heartbeat` / `heartbeat` payload shared by both peer roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Sender's local clock at send time, used to compute RTT.
    pub client_timestamp_ms: u64,
}

/// `heartbeat_ack` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAckPayload {
    /// Echoed from the triggering `heartbeat`.
    pub client_timestamp_ms: u64,
    /// Relay's clock at ack time.
    pub server_timestamp_ms: u64,
}

/// `session_end` payload, sent by either peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndPayload {
    /// Why the session is being ended.
    pub reason: String,
}

/// `session_accepted` payload (relay → agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAcceptedPayload {
    /// Technician display name.
    pub admin_name: String,
    /// Optional note from the technician.
    #[serde(default)]
    pub message: Option<String>,
}

/// `session_started` payload (relay → admin/viewer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartedPayload {
    /// Newly active session id.
    pub session_id: SessionId,
    /// Remote screen width in pixels.
    pub screen_w: u16,
    /// Remote screen height in pixels.
    pub screen_h: u16,
}

/// `session_ended` payload, sent to both peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndedPayload {
    /// Why the session ended.
    pub reason: String,
    /// Who ended it: `"admin"`, `"agent"`, or `"server"`.
    pub ended_by: String,
}

/// `request_rejected` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRejectedPayload {
    /// Technician-supplied reason, if any.
    #[serde(default)]
    pub reason: Option<String>,
}

/// `request_cancelled` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCancelledPayload {
    /// The pending request's session id.
    pub session_id: SessionId,
}

/// `e2e_key_exchange` payload, sent by both peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct E2eKeyExchangePayload {
    /// Base64 of the sender's 65-byte uncompressed P-256 public point.
    pub public_key: String,
}

/// `chat_message` payload. Either the plaintext fields directly, or an
/// `encrypted` envelope whose decrypted plaintext is this same shape
/// minus the `encrypted` field (spec.md §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    /// Base64 AEAD envelope, present once the E2E channel is ready.
    #[serde(default)]
    pub encrypted: Option<String>,
    /// Plaintext message body, present before the channel is ready or
    /// after decryption.
    #[serde(default)]
    pub message: Option<String>,
    /// Sender role: `"agent"` or `"admin"`.
    #[serde(default)]
    pub sender: Option<String>,
    /// ISO-8601 send time.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// `file_offer` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOfferPayload {
    /// Transfer id correlating subsequent `0x04` chunks.
    pub transfer_id: String,
    /// Original file name (sanitized before use as a path).
    pub file_name: String,
    /// Total size in bytes.
    pub file_size: u64,
}

/// `file_accept` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAcceptPayload {
    /// Transfer id being accepted.
    pub transfer_id: String,
}

/// `file_complete` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCompletePayload {
    /// Transfer id that finished.
    pub transfer_id: String,
}

/// `file_error` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileErrorPayload {
    /// Transfer id that failed, if known.
    #[serde(default)]
    pub transfer_id: Option<String>,
    /// Human-readable failure reason.
    pub message: String,
}

/// `admin_auth` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAuthPayload {
    /// Shared admin bearer token.
    pub admin_token: String,
    /// Technician display name.
    pub admin_name: String,
}

/// `admin_auth_result` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAuthResultPayload {
    /// Whether authentication succeeded.
    pub success: bool,
    /// Currently pending support requests, hydrated on success.
    #[serde(default)]
    pub pending_requests: Vec<crate::device::PendingRequest>,
}

/// `accept_support` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptSupportPayload {
    /// Session id to accept.
    pub session_id: SessionId,
}

/// `reject_request` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRequestPayload {
    /// Session id to reject.
    pub session_id: SessionId,
    /// Optional reason shown to the agent.
    #[serde(default)]
    pub reason: Option<String>,
}

/// `delete_device` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteDevicePayload {
    /// Agent id to remove from the registry.
    pub agent_id: AgentId,
}

/// `device_deleted` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDeletedPayload {
    /// Agent id that was removed.
    pub agent_id: AgentId,
}

/// `connect_unattended` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectUnattendedPayload {
    /// Target agent.
    pub agent_id: AgentId,
    /// Hex SHA-256 of the unattended-access password.
    pub password: PasswordHash,
    /// Shared admin bearer token.
    pub admin_token: String,
}

/// `device_list` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceListPayload {
    /// Every registry entry, online first then by `last_seen` descending.
    pub devices: Vec<DeviceListEntry>,
}

/// `device_status_changed` broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusChangedPayload {
    /// Agent whose online state changed.
    pub agent_id: AgentId,
    /// New online state.
    pub is_online: bool,
}

/// `monitor_info` payload (agent → viewer, relay forwards verbatim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorInfoPayload {
    /// Index of the monitor currently being captured.
    pub monitor_index: u32,
    /// Width of that monitor in pixels.
    pub screen_w: u16,
    /// Height of that monitor in pixels.
    pub screen_h: u16,
}

/// `monitor_switched` payload (agent → viewer, relay forwards verbatim).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSwitchedPayload {
    /// Index of the monitor now being captured.
    pub monitor_index: u32,
    /// Width of the new monitor in pixels.
    pub screen_w: u16,
    /// Height of the new monitor in pixels.
    pub screen_h: u16,
}

/// Empty payload for request types that carry none.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

envelope_enum! {
    /// Messages an agent sends to the relay and has interpreted as
    /// control plane (spec.md §6 "Agent→Relay").
    AgentToRelay {
        /// First message on the connection; pins its role.
        AgentRegister(AgentRegisterPayload) => "agent_register",
        /// Ask the relay to broadcast a support request to admins.
        RequestSupport(RequestSupportPayload) => "request_support",
        /// End the currently active session.
        SessionEnd(SessionEndPayload) => "session_end",
        /// Refresh hostname/OS/version/hardware fields.
        UpdateAgentInfo(UpdateAgentInfoPayload) => "update_agent_info",
        /// Keepalive carrying the agent's clock.
        Heartbeat(HeartbeatPayload) => "heartbeat",
        /// Forwarded verbatim to the paired viewer once a session is
        /// active; the relay's control plane never matches this arm.
        MonitorInfo(MonitorInfoPayload) => "monitor_info",
        /// Forwarded verbatim to the paired viewer once a session is
        /// active; the relay's control plane never matches this arm.
        MonitorSwitched(MonitorSwitchedPayload) => "monitor_switched",
        /// Forwarded verbatim to the paired viewer; either peer may send one.
        ChatMessage(ChatMessagePayload) => "chat_message",
        /// Forwarded verbatim to the paired viewer; either peer may send one.
        E2eKeyExchange(E2eKeyExchangePayload) => "e2e_key_exchange",
        /// Reply to an incoming `file_offer`, forwarded to the viewer.
        FileAccept(FileAcceptPayload) => "file_accept",
        /// Failure on either side of a file transfer, forwarded to the viewer.
        FileError(FileErrorPayload) => "file_error",
        /// Technician-pushed quality override, forwarded verbatim from the
        /// viewer side.
        QualityChange(crate::quality::QualityChangePayload) => "quality_change",
    }
}

envelope_enum! {
    /// Messages the relay sends to an agent (spec.md §6 "Relay→Agent").
    RelayToAgent {
        /// Registration accepted.
        AgentRegistered(AgentRegisteredPayload) => "agent_registered",
        /// A technician accepted the agent's support request.
        SessionAccepted(SessionAcceptedPayload) => "session_accepted",
        /// The active session ended.
        SessionEnded(SessionEndedPayload) => "session_ended",
        /// The pending request was rejected.
        RequestRejected(RequestRejectedPayload) => "request_rejected",
        /// Peer ECDH public key for the E2E handshake.
        E2eKeyExchange(E2eKeyExchangePayload) => "e2e_key_exchange",
        /// Chat message from the technician.
        ChatMessage(ChatMessagePayload) => "chat_message",
        /// Incoming file-transfer offer from the technician.
        FileOffer(FileOfferPayload) => "file_offer",
        /// Technician finished sending a file.
        FileComplete(FileCompletePayload) => "file_complete",
        /// Technician's file transfer failed.
        FileError(FileErrorPayload) => "file_error",
        /// Heartbeat acknowledgement carrying RTT timestamps.
        HeartbeatAck(HeartbeatAckPayload) => "heartbeat_ack",
        /// A typed, wire-visible error.
        Error(ErrorPayload) => "error",
    }
}

envelope_enum! {
    /// Messages an admin/viewer sends to the relay (spec.md §6
    /// "Admin→Relay").
    AdminToRelay {
        /// First message on the connection; pins its role.
        AdminAuth(AdminAuthPayload) => "admin_auth",
        /// Accept a pending support request.
        AcceptSupport(AcceptSupportPayload) => "accept_support",
        /// Reject a pending support request.
        RejectRequest(RejectRequestPayload) => "reject_request",
        /// End the currently active session.
        SessionEnd(SessionEndPayload) => "session_end",
        /// Request a fresh device-registry snapshot.
        GetDeviceList(Empty) => "get_device_list",
        /// Remove an offline device from the registry.
        DeleteDevice(DeleteDevicePayload) => "delete_device",
        /// Start a session without agent-side consent.
        ConnectUnattended(ConnectUnattendedPayload) => "connect_unattended",
        /// Keepalive carrying the admin's clock.
        Heartbeat(HeartbeatPayload) => "heartbeat",
        /// Forwarded verbatim to the paired agent once a session is
        /// active; the relay's control plane never matches this arm.
        QualityChange(crate::quality::QualityChangePayload) => "quality_change",
        /// Forwarded verbatim to the paired agent; either peer may send one.
        ChatMessage(ChatMessagePayload) => "chat_message",
        /// Forwarded verbatim to the paired agent; either peer may send one.
        E2eKeyExchange(E2eKeyExchangePayload) => "e2e_key_exchange",
        /// Offer an outgoing file transfer, forwarded to the agent.
        FileOffer(FileOfferPayload) => "file_offer",
        /// Finish an outgoing file transfer, forwarded to the agent.
        FileComplete(FileCompletePayload) => "file_complete",
        /// Failure on either side of a file transfer, forwarded to the agent.
        FileError(FileErrorPayload) => "file_error",
    }
}

envelope_enum! {
    /// Messages the relay sends to an admin/viewer (spec.md §6
    /// "Relay→Admin").
    RelayToAdmin {
        /// Result of `admin_auth`.
        AdminAuthResult(AdminAuthResultPayload) => "admin_auth_result",
        /// Broadcast of a new support request.
        SupportRequest(SupportRequestPayload) => "support_request",
        /// A pending request was rejected or withdrawn.
        RequestCancelled(RequestCancelledPayload) => "request_cancelled",
        /// A session this admin accepted is now active.
        SessionStarted(SessionStartedPayload) => "session_started",
        /// A session ended.
        SessionEnded(SessionEndedPayload) => "session_ended",
        /// Full device-registry snapshot.
        DeviceList(DeviceListPayload) => "device_list",
        /// A device's online state changed.
        DeviceStatusChanged(DeviceStatusChangedPayload) => "device_status_changed",
        /// A device was removed from the registry.
        DeviceDeleted(DeviceDeletedPayload) => "device_deleted",
        /// Forwarded verbatim from the paired agent.
        MonitorInfo(MonitorInfoPayload) => "monitor_info",
        /// Forwarded verbatim from the paired agent.
        MonitorSwitched(MonitorSwitchedPayload) => "monitor_switched",
        /// Chat message from the agent side.
        ChatMessage(ChatMessagePayload) => "chat_message",
        /// Peer ECDH public key for the E2E handshake.
        E2eKeyExchange(E2eKeyExchangePayload) => "e2e_key_exchange",
        /// Agent accepted an outgoing file offer.
        FileAccept(FileAcceptPayload) => "file_accept",
        /// Agent-side file transfer failed.
        FileError(FileErrorPayload) => "file_error",
        /// Heartbeat acknowledgement carrying RTT timestamps.
        HeartbeatAck(HeartbeatAckPayload) => "heartbeat_ack",
        /// A typed, wire-visible error.
        Error(ErrorPayload) => "error",
    }
}

/// One decoded input event, carried as the JSON payload of a `0x02`
/// binary packet (spec.md §4.5 "Input dispatch").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// Absolute pointer move, coordinates normalized to `[0, 1]`.
    MouseMove {
        /// Horizontal position, `0.0` = left edge.
        x: f64,
        /// Vertical position, `0.0` = top edge.
        y: f64,
    },
    /// Mouse button press or release.
    MouseClick {
        /// Which button.
        button: MouseButton,
        /// Press or release.
        action: KeyAction,
        /// Horizontal position, `0.0` = left edge.
        x: f64,
        /// Vertical position, `0.0` = top edge.
        y: f64,
    },
    /// Wheel movement in WHEEL_DELTA units (120 per notch).
    MouseScroll {
        /// Horizontal delta.
        delta_x: i32,
        /// Vertical delta.
        delta_y: i32,
    },
    /// A key press or release.
    Key {
        /// Press or release.
        action: KeyAction,
        /// Platform virtual-key code.
        key_code: u32,
        /// Modifier keys held at the time of the event.
        modifiers: Modifiers,
        /// Single printable code point, when applicable.
        #[serde(default)]
        char: Option<char>,
    },
    /// A fixed platform key combination.
    SpecialKey {
        /// Which combination.
        combination: SpecialKeyCombination,
    },
    /// Quality override requested by the technician.
    QualityChange(crate::quality::QualityChangePayload),
    /// Switch the agent's active capture monitor.
    SwitchMonitor {
        /// Target monitor index.
        monitor_index: u32,
    },
}

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    /// Primary button.
    Left,
    /// Secondary button.
    Right,
    /// Middle/wheel button.
    Middle,
}

/// Press/release discriminant shared by mouse and key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    /// Button or key pressed.
    Down,
    /// Button or key released.
    Up,
}

/// Modifier keys held during a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    /// Control key.
    #[serde(default)]
    pub ctrl: bool,
    /// Alt key.
    #[serde(default)]
    pub alt: bool,
    /// Shift key.
    #[serde(default)]
    pub shift: bool,
    /// Windows/Command key.
    #[serde(default)]
    pub win: bool,
}

/// Fixed platform key combinations the viewer can request directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialKeyCombination {
    /// Ctrl+Alt+Del.
    CtrlAltDel,
    /// Alt+Tab.
    AltTab,
    /// Alt+F4.
    AltF4,
}

/// Parse a raw JSON envelope's `type` field without committing to one of
/// the four directional enums, useful for logging/metrics before dispatch.
pub fn peek_type(raw: &Value) -> Option<&str> {
    raw.get("type").and_then(Value::as_str)
}
