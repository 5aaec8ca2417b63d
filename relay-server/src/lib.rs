//! ServiDesk relay: session manager (C3), forwarding plane (C4), and the
//! plain-HTTP admin/provisioning surface, all sharing one `ServerState`
//! behind a single `Arc<RwLock<_>>` (spec.md §5 "Shared-resource policy").

#![deny(missing_docs)]

mod auth;
pub mod config;
mod error;
pub mod forwarding;
mod http;
mod persistence;
pub mod session;
pub mod state;
mod websocket;

pub use config::RelayConfig;
pub use error::Error;
pub use session::SessionManager;
pub use state::{ServerState, State};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use axum_server::Handle;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio_stream::wrappers::IntervalStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Result type for the relay server crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The relay's WebSocket and HTTP surface, bound to one listening address.
pub struct RelayServer {
    state: State,
}

impl RelayServer {
    /// Build the relay's state from a loaded configuration, hydrating the
    /// device registry and session log from disk.
    pub async fn new(config: RelayConfig) -> Result<Self> {
        Ok(Self {
            state: Arc::new(RwLock::new(ServerState::new(config).await?)),
        })
    }

    /// Serve the relay until `handle` is shut down, spawning the
    /// heartbeat and cleanup background tasks alongside the HTTP/WS
    /// listener (spec.md §4.4 "Heartbeats", §4.3 "Cleanup loop").
    pub async fn start(&self, handle: Handle) -> Result<()> {
        let (addr, heartbeat_interval_ms, tls, origins) = {
            let guard = self.state.read().await;
            let addr: SocketAddr = format!("{}:{}", guard.config.host, guard.config.port)
                .parse()
                .map_err(|_| Error::InvalidBindAddress)?;
            let origins: Vec<HeaderValue> = guard
                .config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect();
            (
                addr,
                guard.config.heartbeat_interval_ms,
                guard.config.tls.clone(),
                origins,
            )
        };

        tokio::spawn(heartbeat_loop(self.state.clone(), heartbeat_interval_ms));
        tokio::spawn(cleanup_loop(self.state.clone()));

        let app = self.router(origins);
        tracing::info!(%addr, "servidesk relay listening");

        match tls {
            Some(tls) => {
                let rustls =
                    axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                        .await
                        .map_err(Error::Tls)?;
                axum_server::bind_rustls(addr, rustls)
                    .handle(handle)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await?;
            }
            None => {
                axum_server::bind(addr)
                    .handle(handle)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await?;
            }
        }
        Ok(())
    }

    fn router(&self, origins: Vec<HeaderValue>) -> Router {
        let cors = if origins.is_empty() {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
                .allow_methods(vec![Method::GET, Method::POST])
                .allow_headers(tower_http::cors::Any)
                .allow_origin(origins)
        };

        Router::new()
            .route("/ws", get(websocket::upgrade))
            .route("/health", get(http::health))
            .route("/api/status", get(http::status))
            .route("/api/sessions", get(http::sessions))
            .route("/api/stats", get(http::stats))
            .route("/api/provision", post(http::provision))
            .route("/update/:file", get(http::serve_update))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}

/// WebSocket ping/pong liveness sweep (spec.md §4.4 "Heartbeats"): every
/// tick, a transport-level ping is sent to each live connection; a reply
/// refreshes that connection's `last_heartbeat_ms` (see the `Pong`
/// handlers in `websocket.rs`), which [`cleanup_loop`] later reaps
/// against `heartbeat_timeout_ms`. This folds the spec's separate
/// "previous round's `is_alive` flag" bookkeeping into the same
/// timestamp the application-level `heartbeat`/`heartbeat_ack` exchange
/// already maintains, rather than tracking it twice.
async fn heartbeat_loop(state: State, interval_ms: u64) {
    let interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut ticks = IntervalStream::new(interval);
    while ticks.next().await.is_some() {
        let guard = state.read().await;
        for agent in guard.agents.values() {
            agent.handle.ping();
        }
        for admin in guard.admins.values() {
            admin.handle.ping();
        }
    }
}

/// Every 30s, walk the three tables named in spec.md §4.3 "Cleanup
/// loop": expire idle active sessions, reap agents past their heartbeat
/// timeout, and reap admins the same way.
async fn cleanup_loop(state: State) {
    let interval = tokio::time::interval(Duration::from_secs(30));
    let mut ticks = IntervalStream::new(interval);
    while ticks.next().await.is_some() {
        run_cleanup_pass(&state).await;
    }
}

async fn run_cleanup_pass(state: &State) {
    let manager = SessionManager::new(state.clone());
    let now = state::now_ms();

    let (expired_sessions, expired_agents, expired_admins) = {
        let guard = state.read().await;
        let expired_sessions: Vec<_> = guard
            .active
            .iter()
            .filter(|(_, entry)| {
                now.saturating_sub(entry.started_at_ms) >= guard.config.session_timeout_ms
            })
            .map(|(id, _)| *id)
            .collect();
        let expired_agents: Vec<_> = guard
            .agents
            .iter()
            .filter(|(_, a)| {
                now.saturating_sub(a.record.last_heartbeat_ms) >= guard.config.heartbeat_timeout_ms
            })
            .map(|(id, _)| id.clone())
            .collect();
        let expired_admins: Vec<_> = guard
            .admins
            .iter()
            .filter(|(_, a)| {
                now.saturating_sub(a.last_heartbeat_ms) >= guard.config.heartbeat_timeout_ms
            })
            .map(|(id, _)| *id)
            .collect();
        (expired_sessions, expired_agents, expired_admins)
    };

    for session_id in expired_sessions {
        manager.end_session(session_id, "timeout", "server").await;
    }
    for agent_id in expired_agents {
        tracing::info!(%agent_id, "reaping agent past heartbeat timeout");
        manager.disconnect_agent(&agent_id).await;
    }
    for admin_id in expired_admins {
        tracing::info!(%admin_id, "reaping admin past heartbeat timeout");
        manager.disconnect_admin(admin_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    #[tokio::test]
    async fn cleanup_pass_ends_idle_session_and_reaps_stale_agent() {
        let mut config = RelayConfig::default();
        config.session_timeout_ms = 0;
        config.heartbeat_timeout_ms = 0;
        config.data_dir = std::env::temp_dir().join(format!("servidesk-lib-test-{:x}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&config.data_dir).await.unwrap();

        let state: State = Arc::new(RwLock::new(ServerState::new(config).await.unwrap()));
        run_cleanup_pass(&state).await;

        let guard = state.read().await;
        assert!(guard.active.is_empty());
        assert!(guard.agents.is_empty());
    }
}
