//! Top-level viewer orchestrator: the connect state machine, admin
//! auth, device/session actions, the stream sink, input production and
//! clipboard sync, wiring them together over one relay [`Transport`]
//! (spec.md §4.6 "Peer client — viewer side").

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use servidesk_protocol::{
    AcceptSupportPayload, AdminAuthPayload, AdminToRelay, AgentId, ConnectUnattendedPayload,
    DeleteDevicePayload, E2eKeyExchangePayload, PasswordHash, RejectRequestPayload,
    RelayToAdmin, SessionEndPayload, SessionId,
};

use crate::clipboard;
use crate::collaborators::{ClipboardHost, FrameSink, InputSource, JpegDecoder, OutgoingFilePrompt};
use crate::config::ViewerConfig;
use crate::file_transfer;
use crate::input;
use crate::session::E2eSession;
use crate::stream_sink::StreamSink;
use crate::transport::{Inbound, Outbound, Transport};
use crate::{Error, Result};

/// Where the connect state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// No live socket.
    Disconnected,
    /// Socket open, `admin_auth` sent, awaiting `admin_auth_result`.
    Connecting,
    /// Authenticated, no session currently active.
    Authenticated,
    /// A session is active; the stream sink and input production loops
    /// are live.
    Viewing,
}

/// Requests initiated by the technician-facing UI, queued onto the
/// connect loop through [`ViewerClient::action_handle`].
#[derive(Debug, Clone)]
pub enum ViewerAction {
    /// Accept a pending support request.
    AcceptSupport(SessionId),
    /// Reject a pending support request.
    RejectRequest {
        /// Session id to reject.
        session_id: SessionId,
        /// Reason shown to the agent.
        reason: Option<String>,
    },
    /// Start a session without agent-side consent.
    ConnectUnattended {
        /// Target agent.
        agent_id: AgentId,
        /// Hex SHA-256 unattended-access password.
        password: PasswordHash,
    },
    /// Remove an offline device from the registry.
    DeleteDevice(AgentId),
    /// Request a fresh device-registry snapshot.
    GetDeviceList,
    /// End the currently active session.
    EndSession {
        /// Reason recorded in the session log.
        reason: String,
    },
    /// Offer an outgoing file transfer.
    SendFile {
        /// Local path to read and send.
        path: PathBuf,
    },
}

/// Sender half of the action queue, cloneable so a UI layer can hold it
/// independently of the running client.
#[derive(Clone)]
pub struct ActionHandle(mpsc::UnboundedSender<ViewerAction>);

impl ActionHandle {
    /// Queue one action for the connect loop to act on.
    pub fn send(&self, action: ViewerAction) -> Result<()> {
        self.0.send(action).map_err(|_| Error::ConnectionClosed)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).min(30))
}

/// The peer client running on the technician's machine: owns the
/// platform collaborators and drives one relay connection at a time.
pub struct ViewerClient {
    config: ViewerConfig,
    decoder: Box<dyn JpegDecoder>,
    frame_sink: Box<dyn FrameSink>,
    input_source: Box<dyn InputSource>,
    clipboard_host: Box<dyn ClipboardHost>,
    outgoing_file_prompt: Box<dyn OutgoingFilePrompt>,
    actions_rx: mpsc::UnboundedReceiver<ViewerAction>,
}

impl ViewerClient {
    /// Construct a client around its platform collaborators, returning
    /// it alongside an [`ActionHandle`] the UI layer uses to queue
    /// accept/reject/end/file actions.
    pub fn new(
        config: ViewerConfig,
        decoder: Box<dyn JpegDecoder>,
        frame_sink: Box<dyn FrameSink>,
        input_source: Box<dyn InputSource>,
        clipboard_host: Box<dyn ClipboardHost>,
        outgoing_file_prompt: Box<dyn OutgoingFilePrompt>,
    ) -> (Self, ActionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                decoder,
                frame_sink,
                input_source,
                clipboard_host,
                outgoing_file_prompt,
                actions_rx: rx,
            },
            ActionHandle(tx),
        )
    }

    /// Run the connect FSM until told to stop: connect, authenticate,
    /// serve one session lifecycle, then reconnect with backoff on
    /// loss.
    pub async fn run(&mut self) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            match self.connect_and_serve().await {
                Ok(()) => {
                    info!("relay connection closed cleanly");
                    attempt = 0;
                }
                Err(err) => {
                    warn!(%err, "relay connection lost");
                }
            }

            if !self.config.auto_reconnect {
                return Ok(());
            }
            attempt += 1;
            if attempt > self.config.reconnect_max_retries {
                return Err(Error::ConnectFailed(
                    "exhausted reconnect attempts".into(),
                ));
            }
            let delay = backoff_delay(attempt);
            info!(attempt, ?delay, "reconnecting to relay");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_serve(&mut self) -> Result<()> {
        self.config.validate()?;
        let (transport, mut inbound) = Transport::connect(&self.config.relay_server_url).await?;

        transport.send(Outbound::Envelope(Box::new(AdminToRelay::AdminAuth(
            AdminAuthPayload {
                admin_token: self.config.admin_token.clone(),
                admin_name: self.config.admin_name.clone(),
            },
        ))))?;

        let mut state = ConnectState::Connecting;
        let mut stream = StreamSink::default();
        let mut e2e: Option<E2eSession> = None;

        let mut heartbeat = interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let mut clipboard_tick = interval(clipboard::POLL_INTERVAL);
        clipboard_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = inbound.recv() => {
                    let Some(frame) = maybe else { return Err(Error::ConnectionClosed) };
                    match frame {
                        Inbound::Envelope(envelope) => {
                            if let Some(next) = self
                                .handle_envelope(envelope, &transport, &mut e2e, &mut stream)
                                .await?
                            {
                                state = next;
                            }
                        }
                        Inbound::Binary(packet) => {
                            if state == ConnectState::Viewing {
                                let channel = e2e.get_or_insert_with(E2eSession::start);
                                stream.handle(&packet, channel, self.decoder.as_mut(), self.frame_sink.as_mut())?;
                            }
                        }
                    }
                }
                Some(action) = self.actions_rx.recv() => {
                    self.handle_action(action, &transport).await?;
                }
                maybe = self.input_source.next_event(), if state == ConnectState::Viewing => {
                    let Some(event) = maybe else { continue };
                    let packet = input::encode(event)?;
                    transport.send(Outbound::Binary(packet))?;
                }
                _ = heartbeat.tick() => {
                    transport.send(Outbound::Envelope(Box::new(AdminToRelay::Heartbeat(
                        servidesk_protocol::HeartbeatPayload { client_timestamp_ms: now_ms() },
                    ))))?;
                }
                _ = clipboard_tick.tick(), if state == ConnectState::Viewing => {
                    if let Some(packet) = clipboard::poll(self.clipboard_host.as_mut()).await? {
                        transport.send(Outbound::Binary(packet))?;
                    }
                }
            }
        }
    }

    async fn handle_envelope(
        &mut self,
        envelope: RelayToAdmin,
        transport: &Transport,
        e2e: &mut Option<E2eSession>,
        stream: &mut StreamSink,
    ) -> Result<Option<ConnectState>> {
        match envelope {
            RelayToAdmin::AdminAuthResult(payload) => {
                if !payload.success {
                    return Err(Error::AuthFailed);
                }
                info!(pending = payload.pending_requests.len(), "authenticated with relay");
                Ok(Some(ConnectState::Authenticated))
            }
            RelayToAdmin::SupportRequest(payload) => {
                info!(agent_id = %payload.agent_id, "support request received");
                Ok(None)
            }
            RelayToAdmin::RequestCancelled(payload) => {
                debug!(session_id = %payload.session_id, "support request cancelled");
                Ok(None)
            }
            RelayToAdmin::SessionStarted(payload) => {
                info!(session_id = %payload.session_id, "session started");
                stream.reset();
                stream.establish(payload.screen_w, payload.screen_h, self.frame_sink.as_mut());
                let session = E2eSession::start();
                transport.send(Outbound::Envelope(Box::new(AdminToRelay::E2eKeyExchange(
                    E2eKeyExchangePayload {
                        public_key: session.public_key_base64().unwrap_or_default(),
                    },
                ))))?;
                *e2e = Some(session);
                Ok(Some(ConnectState::Viewing))
            }
            RelayToAdmin::SessionEnded(payload) => {
                info!(reason = %payload.reason, "session ended");
                *e2e = None;
                Ok(Some(ConnectState::Authenticated))
            }
            RelayToAdmin::DeviceList(_) | RelayToAdmin::DeviceStatusChanged(_) | RelayToAdmin::DeviceDeleted(_) => {
                Ok(None)
            }
            RelayToAdmin::MonitorInfo(payload) => {
                stream.establish(payload.screen_w, payload.screen_h, self.frame_sink.as_mut());
                Ok(None)
            }
            RelayToAdmin::MonitorSwitched(payload) => {
                stream.reset();
                stream.establish(payload.screen_w, payload.screen_h, self.frame_sink.as_mut());
                Ok(None)
            }
            RelayToAdmin::ChatMessage(_) => Ok(None),
            RelayToAdmin::E2eKeyExchange(payload) => {
                if let Some(session) = e2e.as_mut() {
                    session.complete(&payload.public_key)?;
                }
                Ok(None)
            }
            RelayToAdmin::FileAccept(payload) => {
                info!(transfer_id = %payload.transfer_id, "outgoing file accepted");
                Ok(None)
            }
            RelayToAdmin::FileError(payload) => {
                warn!(message = %payload.message, "outgoing file transfer failed");
                Ok(None)
            }
            RelayToAdmin::HeartbeatAck(_) => Ok(None),
            RelayToAdmin::Error(payload) => {
                warn!(?payload.code, message = %payload.message, "relay reported an error");
                Ok(None)
            }
            RelayToAdmin::Other(tag, _) => {
                debug!(tag, "ignoring unrecognized envelope type");
                Ok(None)
            }
        }
    }

    async fn handle_action(&mut self, action: ViewerAction, transport: &Transport) -> Result<()> {
        match action {
            ViewerAction::AcceptSupport(session_id) => {
                transport.send(Outbound::Envelope(Box::new(AdminToRelay::AcceptSupport(
                    AcceptSupportPayload { session_id },
                ))))?;
            }
            ViewerAction::RejectRequest { session_id, reason } => {
                transport.send(Outbound::Envelope(Box::new(AdminToRelay::RejectRequest(
                    RejectRequestPayload { session_id, reason },
                ))))?;
            }
            ViewerAction::ConnectUnattended { agent_id, password } => {
                transport.send(Outbound::Envelope(Box::new(
                    AdminToRelay::ConnectUnattended(ConnectUnattendedPayload {
                        agent_id,
                        password,
                        admin_token: self.config.admin_token.clone(),
                    }),
                )))?;
            }
            ViewerAction::DeleteDevice(agent_id) => {
                transport.send(Outbound::Envelope(Box::new(AdminToRelay::DeleteDevice(
                    DeleteDevicePayload { agent_id },
                ))))?;
            }
            ViewerAction::GetDeviceList => {
                transport.send(Outbound::Envelope(Box::new(AdminToRelay::GetDeviceList(
                    servidesk_protocol::Empty {},
                ))))?;
            }
            ViewerAction::EndSession { reason } => {
                transport.send(Outbound::Envelope(Box::new(AdminToRelay::SessionEnd(
                    SessionEndPayload { reason },
                ))))?;
            }
            ViewerAction::SendFile { path } => {
                self.send_file(transport, &path).await?;
            }
        }
        Ok(())
    }

    async fn send_file(&mut self, transport: &Transport, path: &std::path::Path) -> Result<()> {
        let Some((source, display_name)) = self.outgoing_file_prompt.prompt().await else {
            return Ok(());
        };
        let source = if source.as_os_str().is_empty() { path.to_path_buf() } else { source };
        let metadata = tokio::fs::metadata(&source).await?;
        let offer = file_transfer::offer(&display_name, metadata.len());
        transport.send(Outbound::Envelope(Box::new(AdminToRelay::FileOffer(
            offer.clone(),
        ))))?;

        let (chunks, complete) = file_transfer::read_chunks(&source, &offer.transfer_id).await?;
        for chunk in chunks {
            transport.send(Outbound::Binary(chunk))?;
            tokio::time::sleep(file_transfer::INTER_CHUNK_SLEEP).await;
        }
        transport.send(Outbound::Envelope(Box::new(AdminToRelay::FileComplete(
            complete,
        ))))?;
        Ok(())
    }
}
