//! Shared relay state: the four tables mutated under one critical section
//! (spec.md §5 "Shared-resource policy").

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use servidesk_protocol::{AgentId, AgentRecord, SessionId};

use crate::auth::AuthTable;
use crate::config::RelayConfig;
use crate::persistence::{AgentTokenStore, DeviceRegistry, SessionLog};

/// A message queued for delivery to one connection's write task.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// A JSON envelope, serialized by the caller.
    Text(String),
    /// A binary frame, forwarded verbatim or produced locally.
    Binary(Vec<u8>),
    /// A transport-level WebSocket ping, used by the heartbeat sweep.
    Ping,
    /// Close the socket with this WebSocket close code.
    Close(u16),
}

/// A live connection, addressable by its stable id from anywhere in the
/// state without holding a direct reference to the socket task
/// (spec.md §9 "Cyclic references between connections and sessions").
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Unique id of this connection (the agent's `AgentId` string hash
    /// is not reused here; admins and agents both get a fresh `Uuid`).
    pub id: Uuid,
    /// Source IP, resolved per `trust_proxy` at admission time.
    pub addr: IpAddr,
    /// Channel the connection's write task drains.
    pub outgoing: mpsc::UnboundedSender<OutboundMessage>,
}

impl ConnectionHandle {
    /// Queue a JSON envelope for delivery. Silently drops the message if
    /// the connection's write task has already exited.
    pub fn send_json(&self, value: &impl serde::Serialize) {
        if let Ok(text) = serde_json::to_string(value) {
            let _ = self.outgoing.send(OutboundMessage::Text(text));
        }
    }

    /// Queue a binary frame for delivery.
    pub fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self.outgoing.send(OutboundMessage::Binary(bytes));
    }

    /// Request the connection close with the given WebSocket close code.
    pub fn close(&self, code: u16) {
        let _ = self.outgoing.send(OutboundMessage::Close(code));
    }

    /// Queue a transport-level ping frame.
    pub fn ping(&self) {
        let _ = self.outgoing.send(OutboundMessage::Ping);
    }
}

/// An agent's live connection plus its registry-facing record.
pub struct AgentConnection {
    /// The socket handle.
    pub handle: ConnectionHandle,
    /// Registration record (spec.md §3 "Agent registration record").
    pub record: AgentRecord,
}

/// An admin/viewer's live connection.
pub struct AdminConnection {
    /// The socket handle.
    pub handle: ConnectionHandle,
    /// Technician display name supplied at `admin_auth`.
    pub admin_name: String,
    /// Unix millis of the last heartbeat or pong received from this
    /// connection, reaped the same way as an agent's `last_heartbeat_ms`.
    pub last_heartbeat_ms: u64,
}

/// An active admin-agent pairing (spec.md §3 "Active session"), storing
/// connection ids rather than owning handles directly.
pub struct ActiveEntry {
    /// Owning agent.
    pub agent_id: AgentId,
    /// The admin connection's id.
    pub admin_id: Uuid,
    /// Technician display name at session start.
    pub admin_name: String,
    /// Unix millis the session started.
    pub started_at_ms: u64,
    /// Unix millis of the last forwarded message.
    pub last_activity_ms: u64,
    /// Whether this session was established without agent consent.
    pub unattended: bool,
}

/// The relay's complete in-memory state.
pub struct ServerState {
    /// Loaded configuration.
    pub config: RelayConfig,
    /// Agents with a live connection, keyed by `agent_id`.
    pub agents: HashMap<AgentId, AgentConnection>,
    /// Admins with a live connection, keyed by connection id.
    pub admins: HashMap<Uuid, AdminConnection>,
    /// Not-yet-accepted support requests, keyed by `session_id`.
    pub pending: HashMap<SessionId, servidesk_protocol::PendingRequest>,
    /// Active sessions, keyed by `session_id`.
    pub active: HashMap<SessionId, ActiveEntry>,
    /// Persistent device registry.
    pub devices: DeviceRegistry,
    /// Persistent append-only session history.
    pub session_log: SessionLog,
    /// One-time agent registration tokens issued via `POST /api/provision`.
    pub agent_tokens: AgentTokenStore,
    /// Admin authentication failure tracking, per source IP.
    pub auth: AuthTable,
    /// `POST /api/provision` attempt counters, per source IP.
    pub provision_attempts: HashMap<IpAddr, (Instant, u32)>,
    /// When this process started serving, for `GET /health`'s `uptime`.
    pub started_at: Instant,
}

impl ServerState {
    /// Construct fresh state from a loaded configuration, hydrating the
    /// device registry and session log from disk.
    pub async fn new(config: RelayConfig) -> crate::Result<Self> {
        let devices = DeviceRegistry::load(&config.data_dir).await?;
        let session_log = SessionLog::load(&config.data_dir).await?;
        let agent_tokens = AgentTokenStore::load(&config.data_dir).await?;
        Ok(Self {
            config,
            agents: HashMap::new(),
            admins: HashMap::new(),
            pending: HashMap::new(),
            active: HashMap::new(),
            devices,
            session_log,
            agent_tokens,
            auth: AuthTable::default(),
            provision_attempts: HashMap::new(),
            started_at: Instant::now(),
        })
    }
}

/// Shared, lock-guarded relay state.
pub type State = Arc<RwLock<ServerState>>;

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
