//! Load a relay configuration, apply any CLI overrides, and serve until
//! Ctrl-C.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use axum_server::Handle;
use servidesk_relay_server::{RelayConfig, RelayServer};

pub async fn run(
    config_path: PathBuf,
    bind: Option<String>,
    heartbeat_interval_ms: Option<u64>,
    session_timeout_ms: Option<u64>,
) -> Result<()> {
    let mut config: RelayConfig = RelayConfig::load(&config_path).await?;

    if let Some(bind) = bind {
        let (host, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--bind must be in host:port form"))?;
        config.host = host.to_string();
        config.port = port.parse()?;
    }
    if let Some(interval) = heartbeat_interval_ms {
        config.heartbeat_interval_ms = interval;
    }
    if let Some(timeout) = session_timeout_ms {
        config.session_timeout_ms = timeout;
    }

    let server = RelayServer::new(config).await?;
    let handle = Handle::new();

    tokio::spawn({
        let handle = handle.clone();
        async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining connections");
            handle.graceful_shutdown(Some(Duration::from_secs(10)));
        }
    });

    server.start(handle).await?;
    Ok(())
}
