//! Shared harness: spin up a real relay on a loopback port and talk to
//! it over plain WebSocket, the same way `native.rs` mocks a server for
//! the signing-protocol suite this crate's shape is borrowed from.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use axum_server::Handle;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use servidesk_relay_server::{RelayConfig, RelayServer};

/// Shared admin bearer token used across every scenario test.
pub const ADMIN_TOKEN: &str = "integration-test-admin-token";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn temp_data_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "servidesk-integration-{label}-{:x}",
        rand::random::<u64>()
    ));
    std::fs::create_dir_all(&dir).expect("create test data dir");
    dir
}

/// A relay running on its own background thread, reachable at `addr`
/// until this handle is dropped.
pub struct RunningRelay {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
    handle: Handle,
}

impl RunningRelay {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Build a default test config, write `seed` into its data dir before
/// the relay starts, then spawn it and wait until it is listening.
pub async fn spawn_relay(label: &str, configure: impl FnOnce(&mut RelayConfig)) -> RunningRelay {
    let data_dir = temp_data_dir(label);

    let mut config = RelayConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.admin_token = ADMIN_TOKEN.to_string();
    config.data_dir = data_dir.clone();
    config.heartbeat_interval_ms = 60_000;
    config.heartbeat_timeout_ms = 120_000;
    configure(&mut config);

    let handle = Handle::new();
    let (tx, rx) = oneshot::channel::<SocketAddr>();

    let server_handle = handle.clone();
    let server_config = config.clone();
    thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("test relay runtime");
        runtime.block_on(async move {
            let server = RelayServer::new(server_config)
                .await
                .expect("build relay server");
            server.start(server_handle).await.expect("run relay server");
        });
    });

    let listen_handle = handle.clone();
    thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().expect("test relay listen runtime");
        runtime.block_on(async move {
            loop {
                if let Some(addr) = listen_handle.listening().await {
                    let _ = tx.send(addr);
                    break;
                }
            }
        });
    });

    let addr = rx.await.expect("relay never started listening");
    RunningRelay {
        addr,
        data_dir,
        handle,
    }
}

/// Write a device record into a not-yet-started relay's data dir, in
/// the exact shape `DeviceRegistry::load` expects to find on disk: a
/// bare JSON array of `DeviceRecord`.
pub fn seed_device(data_dir: &std::path::Path, record: servidesk_protocol::DeviceRecord) {
    std::fs::write(
        data_dir.join("devices.json"),
        serde_json::to_string_pretty(&vec![record]).unwrap(),
    )
    .expect("write seeded devices.json");
}

pub async fn connect(url: &str) -> WsStream {
    let (stream, _) = connect_async(url).await.expect("connect to relay");
    stream
}

pub async fn send_json<T: Serialize>(ws: &mut WsStream, value: &T) {
    let text = serde_json::to_string(value).expect("serialize outbound envelope");
    ws.send(Message::Text(text)).await.expect("send text frame");
}

pub async fn send_binary(ws: &mut WsStream, bytes: Vec<u8>) {
    ws.send(Message::Binary(bytes)).await.expect("send binary frame");
}

/// Wait for the next text frame, skipping transport-level ping/pong.
pub async fn recv_text(ws: &mut WsStream) -> String {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a relay message")
            .expect("relay closed the connection")
            .expect("websocket transport error");
        match message {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Wait for the next binary frame, skipping transport-level ping/pong.
pub async fn recv_binary(ws: &mut WsStream) -> Vec<u8> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a relay message")
            .expect("relay closed the connection")
            .expect("websocket transport error");
        match message {
            Message::Binary(bytes) => return bytes,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a binary frame, got {other:?}"),
        }
    }
}

pub async fn recv_as<T: DeserializeOwned>(ws: &mut WsStream) -> T {
    let text = recv_text(ws).await;
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("failed to decode {text}: {e}"))
}

/// `true` once no frame arrives within `timeout` — used to assert a
/// broadcast happened exactly once rather than repeatedly.
pub async fn no_more_messages(ws: &mut WsStream, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, ws.next()).await.is_err()
}
