//! WebSocket transport to the relay.
//!
//! Follows the teacher's event-loop shape: the socket is split into a
//! read half and a write half, outbound frames are fed through an
//! `mpsc` channel into a dedicated write task, and decoded inbound
//! frames are forwarded out through a second channel so the rest of
//! the agent never touches the socket directly.

use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use servidesk_protocol::{Packet, RelayToAgent};

use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One frame read off the relay socket, decoded far enough to route.
#[derive(Debug)]
pub enum Inbound {
    /// A JSON envelope addressed to this agent.
    Envelope(RelayToAgent),
    /// A raw binary packet (video/region/input/clipboard/file chunk).
    Binary(Packet),
}

/// One frame queued to be written to the relay socket.
#[derive(Debug)]
pub enum Outbound {
    /// A JSON envelope to serialize and send as a text frame.
    Envelope(Box<servidesk_protocol::AgentToRelay>),
    /// A raw binary packet to send as a binary frame.
    Binary(Packet),
}

/// A live relay connection: a sender for outbound frames, a receiver
/// for inbound ones, and the background tasks driving both.
pub struct Transport {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

/// Cheap, cloneable handle for queuing outbound frames from a context
/// that doesn't hold a `&Transport` — namely the streaming tick's
/// spawned encode/seal task (see `streaming::run_tick`), which must
/// keep running after its tick's `select!` arm returns.
#[derive(Clone)]
pub struct OutboundHandle {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl OutboundHandle {
    pub fn new(outbound_tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { outbound_tx }
    }

    /// Queue an outbound frame. Fails if the write task has exited.
    pub fn send(&self, frame: Outbound) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .map_err(|_| Error::ConnectionClosed)
    }
}

impl Transport {
    /// Connect to the relay and spawn the read/write tasks.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<Inbound>)> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| Error::ConnectFailed(e.to_string()))?;

        if response.status() != http::StatusCode::SWITCHING_PROTOCOLS {
            return Err(Error::ConnectFailed(format!(
                "unexpected handshake status {}",
                response.status()
            )));
        }

        let (ws_writer, ws_reader) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Inbound>();

        let write_task = tokio::spawn(Self::run_write_task(ws_writer, outbound_rx));
        let read_task = tokio::spawn(Self::run_read_task(ws_reader, inbound_tx));

        Ok((
            Self {
                outbound_tx,
                read_task,
                write_task,
            },
            inbound_rx,
        ))
    }

    /// Queue an outbound frame. Fails if the write task has exited.
    pub fn send(&self, frame: Outbound) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// A cloneable sender handle for tasks spawned off the main loop.
    pub fn handle(&self) -> OutboundHandle {
        OutboundHandle::new(self.outbound_tx.clone())
    }

    /// Tear down both background tasks.
    pub fn close(self) {
        self.read_task.abort();
        self.write_task.abort();
    }

    async fn run_write_task(
        mut writer: futures::stream::SplitSink<WsStream, Message>,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    ) {
        while let Some(frame) = outbound_rx.recv().await {
            let message = match frame {
                Outbound::Envelope(envelope) => match serde_json::to_string(&envelope) {
                    Ok(text) => Message::Text(text),
                    Err(err) => {
                        warn!(%err, "failed to serialize outbound envelope");
                        continue;
                    }
                },
                Outbound::Binary(packet) => match packet.encode() {
                    Ok(bytes) => Message::Binary(bytes),
                    Err(err) => {
                        warn!(%err, "failed to encode outbound binary packet");
                        continue;
                    }
                },
            };
            if let Err(err) = writer.send(message).await {
                warn!(%err, "relay write failed, closing transport");
                break;
            }
        }
        let _ = writer.close().await;
    }

    async fn run_read_task(
        mut reader: futures::stream::SplitStream<WsStream>,
        inbound_tx: mpsc::UnboundedSender<Inbound>,
    ) {
        while let Some(message) = reader.next().await {
            let message = match message {
                Ok(message) => message,
                Err(err) => {
                    debug!(%err, "relay read failed, closing transport");
                    break;
                }
            };
            let inbound = match message {
                Message::Text(text) => match serde_json::from_str::<RelayToAgent>(&text) {
                    Ok(envelope) => Inbound::Envelope(envelope),
                    Err(err) => {
                        warn!(%err, "failed to decode inbound envelope");
                        continue;
                    }
                },
                Message::Binary(bytes) => match Packet::decode(&bytes) {
                    Ok(packet) => Inbound::Binary(packet),
                    Err(err) => {
                        warn!(%err, "failed to decode inbound binary packet");
                        continue;
                    }
                },
                Message::Close(_) => break,
                _ => continue,
            };
            if inbound_tx.send(inbound).is_err() {
                break;
            }
        }
    }
}
