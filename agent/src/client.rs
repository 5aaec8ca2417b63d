//! Top-level agent orchestrator: the connect state machine, registration,
//! heartbeats, and session lifecycle, wiring the streaming, input,
//! clipboard and file-transfer pieces together over one relay
//! [`Transport`] (spec.md §4.5 "Peer client — agent side").

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use servidesk_protocol::{
    AgentRegisterPayload, AgentToRelay, E2eKeyExchangePayload, EncoderState, MonitorInfoPayload,
    MonitorSwitchedPayload, Packet, QualityController, RelayToAgent,
};

use crate::clipboard;
use crate::collaborators::{ClipboardHost, FrameSource, InputInjector, JpegEncoder};
use crate::config::AgentConfig;
use crate::file_transfer::{self, IncomingTransfer, SavePathPrompt};
use crate::input::{self, InputOutcome};
use crate::session::E2eSession;
use crate::streaming;
use crate::transport::{Inbound, Outbound, Transport};
use crate::{Error, Result};

/// Where the connect state machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    /// No live socket.
    Disconnected,
    /// Socket open, `agent_register` sent, awaiting `agent_registered`.
    Connecting,
    /// Registered with the relay, no pending or active session.
    Registered,
    /// Registered, waiting on a technician to accept a support request.
    Waiting,
    /// A session is active; the streaming/input/clipboard loops are live.
    InSession,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Delay before the next reconnect attempt: `min(2^n, 30)` seconds, or a
/// fixed 5s when unattended access keeps the agent retrying indefinitely.
fn backoff_delay(attempt: u32, unattended: bool) -> Duration {
    if unattended {
        Duration::from_secs(5)
    } else {
        Duration::from_secs(2u64.saturating_pow(attempt).min(30))
    }
}

/// The peer client running on the supported endpoint: owns the platform
/// collaborators and drives one relay connection at a time.
pub struct AgentClient {
    config: AgentConfig,
    frame_source: Box<dyn FrameSource>,
    encoder: Arc<dyn JpegEncoder>,
    injector: Box<dyn InputInjector>,
    clipboard_host: Box<dyn ClipboardHost>,
    save_prompt: Box<dyn SavePathPrompt>,
    save_dir: PathBuf,
}

impl AgentClient {
    /// Construct a client around its platform collaborators. `save_dir`
    /// is the directory accepted incoming file transfers are written to.
    pub fn new(
        config: AgentConfig,
        frame_source: Box<dyn FrameSource>,
        encoder: Arc<dyn JpegEncoder>,
        injector: Box<dyn InputInjector>,
        clipboard_host: Box<dyn ClipboardHost>,
        save_prompt: Box<dyn SavePathPrompt>,
        save_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            frame_source,
            encoder,
            injector,
            clipboard_host,
            save_prompt,
            save_dir,
        }
    }

    /// Run the connect FSM until told to stop: connect, register, serve
    /// one session lifecycle, then reconnect with backoff on loss.
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
            if !self.config.unattended_access_enabled
                && attempt > self.config.reconnect_max_retries
            {
                return Err(Error::ConnectFailed(
                    "exhausted reconnect attempts".into(),
                ));
            }
            let delay = backoff_delay(attempt, self.config.unattended_access_enabled);
            info!(attempt, ?delay, "reconnecting to relay");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_serve(&mut self) -> Result<()> {
        self.config.validate()?;
        let (transport, mut inbound) = Transport::connect(&self.config.relay_server_url).await?;

        transport.send(Outbound::Envelope(Box::new(AgentToRelay::AgentRegister(
            AgentRegisterPayload {
                agent_id: self.config.agent_id.clone(),
                hostname: self.config.hostname.clone(),
                os: self.config.os.clone(),
                version: self.config.version.clone(),
                hardware_summary: None,
                agent_token: self
                    .config
                    .agent_token
                    .clone()
                    .or_else(|| self.config.provision_token.clone()),
            },
        ))))?;

        let mut state = ConnectState::Connecting;

        let mut heartbeat = interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let fps = self.config.capture_max_fps.max(1);
        let mut tick = interval(Duration::from_millis(1000 / fps as u64));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut clipboard_tick = interval(clipboard::POLL_INTERVAL);
        clipboard_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut quality = QualityController::new(self.config.capture_default_quality);
        let encoder_state = Arc::new(Mutex::new(EncoderState::default()));
        let e2e: Arc<Mutex<Option<E2eSession>>> = Arc::new(Mutex::new(None));
        let mut incoming: Option<IncomingTransfer> = None;

        loop {
            tokio::select! {
                maybe = inbound.recv() => {
                    let Some(frame) = maybe else { return Err(Error::ConnectionClosed) };
                    match frame {
                        Inbound::Envelope(envelope) => {
                            if let Some(next) = self
                                .handle_envelope(envelope, &transport, &e2e, &mut quality, &encoder_state, &mut incoming)
                                .await?
                            {
                                state = next;
                            }
                        }
                        Inbound::Binary(packet) => {
                            self.handle_binary(packet, &transport, &mut quality, &mut incoming).await?;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    transport.send(Outbound::Envelope(Box::new(AgentToRelay::Heartbeat(
                        servidesk_protocol::HeartbeatPayload { client_timestamp_ms: now_ms() },
                    ))))?;
                }
                _ = tick.tick(), if state == ConnectState::InSession
                    && e2e.lock().unwrap().as_ref().is_some_and(|s| !s.is_unencrypted() || s.fallback_elapsed()) => {
                    let tick_start = Instant::now();
                    streaming::run_tick(
                        self.frame_source.as_mut(),
                        self.encoder.clone(),
                        encoder_state.clone(),
                        e2e.clone(),
                        transport.handle(),
                        quality.current(),
                    ).await?;
                    streaming::sleep_remaining(tick_start, quality.current()).await;
                }
                _ = clipboard_tick.tick(), if state == ConnectState::InSession => {
                    if let Some(packet) = clipboard::poll(self.clipboard_host.as_mut()).await? {
                        transport.send(Outbound::Binary(packet))?;
                    }
                }
            }
        }
    }

    async fn handle_envelope(
        &mut self,
        envelope: RelayToAgent,
        transport: &Transport,
        e2e: &Arc<Mutex<Option<E2eSession>>>,
        quality: &mut QualityController,
        encoder_state: &Arc<Mutex<EncoderState>>,
        incoming: &mut Option<IncomingTransfer>,
    ) -> Result<Option<ConnectState>> {
        match envelope {
            RelayToAgent::AgentRegistered(payload) => {
                info!(session_id = %payload.session_id, "registered with relay");
                Ok(Some(ConnectState::Waiting))
            }
            RelayToAgent::SessionAccepted(payload) => {
                info!(admin = %payload.admin_name, "support request accepted");
                *encoder_state.lock().unwrap() = EncoderState::default();
                *incoming = None;
                let session = E2eSession::start();
                let (screen_w, screen_h) = self.frame_source.screen_size();
                transport.send(Outbound::Envelope(Box::new(AgentToRelay::E2eKeyExchange(
                    E2eKeyExchangePayload {
                        public_key: session.public_key_base64().unwrap_or_default(),
                    },
                ))))?;
                transport.send(Outbound::Envelope(Box::new(AgentToRelay::MonitorInfo(
                    MonitorInfoPayload {
                        monitor_index: self.frame_source.monitor_index(),
                        screen_w,
                        screen_h,
                    },
                ))))?;
                *e2e.lock().unwrap() = Some(session);
                Ok(Some(ConnectState::InSession))
            }
            RelayToAgent::SessionEnded(payload) => {
                info!(reason = %payload.reason, "session ended");
                *e2e.lock().unwrap() = None;
                *incoming = None;
                Ok(Some(ConnectState::Waiting))
            }
            RelayToAgent::RequestRejected(payload) => {
                debug!(?payload.reason, "support request rejected");
                Ok(None)
            }
            RelayToAgent::E2eKeyExchange(payload) => {
                if let Some(session) = e2e.lock().unwrap().as_mut() {
                    session.complete(&payload.public_key)?;
                }
                Ok(None)
            }
            RelayToAgent::ChatMessage(_) => Ok(None),
            RelayToAgent::FileOffer(offer) => {
                self.handle_file_offer(transport, offer, incoming).await?;
                Ok(None)
            }
            RelayToAgent::FileComplete(payload) => {
                let matches = incoming
                    .as_ref()
                    .is_some_and(|t| t.transfer_id() == payload.transfer_id);
                if matches {
                    if let Some(transfer) = incoming.take() {
                        match transfer.flush().await {
                            Ok(path) => info!(?path, "file transfer complete"),
                            Err(err) => warn!(%err, "failed to flush received file"),
                        }
                    }
                }
                Ok(None)
            }
            RelayToAgent::FileError(payload) => {
                warn!(message = %payload.message, "file transfer failed");
                *incoming = None;
                Ok(None)
            }
            RelayToAgent::QualityChange(payload) => {
                quality.force(payload.quality);
                Ok(None)
            }
            RelayToAgent::HeartbeatAck(payload) => {
                let rtt_ms = now_ms().saturating_sub(payload.client_timestamp_ms) as f64;
                quality.record_rtt(rtt_ms);
                Ok(None)
            }
            RelayToAgent::Error(payload) => {
                warn!(?payload.code, message = %payload.message, "relay reported an error");
                Ok(None)
            }
            RelayToAgent::Other(tag, _) => {
                debug!(tag, "ignoring unrecognized envelope type");
                Ok(None)
            }
        }
    }

    async fn handle_file_offer(
        &mut self,
        transport: &Transport,
        offer: servidesk_protocol::FileOfferPayload,
        incoming: &mut Option<IncomingTransfer>,
    ) -> Result<()> {
        match self
            .save_prompt
            .prompt(&offer.file_name, offer.file_size)
            .await
        {
            Some(dest_dir) => {
                let dest_dir = if dest_dir.is_absolute() {
                    dest_dir
                } else {
                    self.save_dir.join(dest_dir)
                };
                let transfer_id = offer.transfer_id.clone();
                *incoming = Some(file_transfer::begin(&offer, &dest_dir));
                transport.send(Outbound::Envelope(Box::new(AgentToRelay::FileAccept(
                    servidesk_protocol::FileAcceptPayload { transfer_id },
                ))))?;
            }
            None => {
                transport.send(Outbound::Envelope(Box::new(AgentToRelay::FileError(
                    servidesk_protocol::FileErrorPayload {
                        transfer_id: Some(offer.transfer_id),
                        message: "transfer declined".into(),
                    },
                ))))?;
            }
        }
        Ok(())
    }

    async fn handle_binary(
        &mut self,
        packet: Packet,
        transport: &Transport,
        quality: &mut QualityController,
        incoming: &mut Option<IncomingTransfer>,
    ) -> Result<()> {
        match &packet {
            Packet::InputEvent(_) => {
                let event = input::decode(&packet)?;
                let outcome = input::handle(
                    event,
                    self.injector.as_mut(),
                    self.frame_source.as_mut(),
                    quality,
                    self.config.map_cmd_to_ctrl,
                )
                .await?;
                match outcome {
                    InputOutcome::MonitorSwitched(monitor_index, screen_w, screen_h) => {
                        transport.send(Outbound::Envelope(Box::new(
                            AgentToRelay::MonitorSwitched(MonitorSwitchedPayload {
                                monitor_index,
                                screen_w,
                                screen_h,
                            }),
                        )))?;
                    }
                    InputOutcome::Handled | InputOutcome::QualityChanged(_) => {}
                }
            }
            Packet::ClipboardData(_) => {
                clipboard::apply_incoming(self.clipboard_host.as_mut(), &packet).await?;
            }
            Packet::FileTransfer { .. } => {
                let Some(transfer) = incoming.as_mut() else {
                    warn!("file chunk with no transfer in progress, dropping");
                    return Ok(());
                };
                if let Err(err) = transfer.accept_chunk(&packet) {
                    warn!(%err, "dropping file chunk for the wrong transfer");
                }
            }
            other => {
                debug!(?other, "ignoring unexpected binary packet from viewer");
            }
        }
        Ok(())
    }
}
