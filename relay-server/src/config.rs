//! Relay configuration (spec.md §6 "Configuration (relay, enumerated)").

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{Error, Result};

/// Top-level relay configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// TCP port to bind.
    pub port: u16,
    /// Bind host/address.
    pub host: String,
    /// Shared bearer token admins authenticate with.
    pub admin_token: String,
    /// Optional shared secret agents must present at registration.
    pub agent_secret: Option<String>,
    /// Whether to resolve the client IP from `X-Forwarded-For`.
    pub trust_proxy: bool,
    /// Maximum simultaneous connections from one source IP.
    pub max_connections_per_ip: u32,
    /// Maximum devices retained in the registry.
    pub max_devices: u32,
    /// Active-session idle timeout, in milliseconds.
    pub session_timeout_ms: u64,
    /// Heartbeat ping cadence, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat staleness before a connection is dropped, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Maximum outstanding pending requests.
    pub max_pending_requests: u32,
    /// Maximum simultaneous active sessions.
    pub max_active_sessions: u32,
    /// Maximum size of a single WebSocket frame, in bytes.
    pub max_message_size_bytes: u32,
    /// Maximum inbound messages per connection per second.
    pub max_messages_per_second: u32,
    /// Browser `Origin` allow-list; empty means unrestricted.
    pub allowed_origins: Vec<String>,
    /// `tracing` env-filter directive, e.g. `"info"` or `"servidesk=debug"`.
    pub log_level: String,
    /// Directory persisted JSON state files are written to.
    pub data_dir: PathBuf,
    /// TLS certificate and key, if terminating TLS in-process.
    pub tls: Option<TlsConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            host: "0.0.0.0".to_string(),
            admin_token: String::new(),
            agent_secret: None,
            trust_proxy: false,
            max_connections_per_ip: 10,
            max_devices: 1000,
            session_timeout_ms: 4 * 60 * 60 * 1000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_pending_requests: 100,
            max_active_sessions: 500,
            max_message_size_bytes: 10 * 1024 * 1024,
            max_messages_per_second: 50,
            allowed_origins: Vec::new(),
            log_level: "info".to_string(),
            data_dir: PathBuf::from("./data"),
            tls: None,
        }
    }
}

/// TLS certificate/key pair for terminating TLS in-process
/// (`axum_server::tls_rustls`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain.
    pub cert: PathBuf,
    /// Path to the PEM private key.
    pub key: PathBuf,
}

impl RelayConfig {
    /// Load, validate and canonicalize a relay configuration file.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !fs::try_exists(path.as_ref()).await? {
            return Err(Error::ConfigNotFound(path.as_ref().to_path_buf()));
        }

        let contents = fs::read_to_string(path.as_ref()).await?;
        let mut config: RelayConfig = toml::from_str(&contents)?;

        if config.heartbeat_timeout_ms <= config.heartbeat_interval_ms {
            return Err(Error::SessionTimeoutConfig);
        }

        let dir = path
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        if config.data_dir.is_relative() {
            config.data_dir = dir.join(&config.data_dir);
        }
        fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| Error::DataDir(config.data_dir.clone(), e))?;
        config.data_dir = config.data_dir.canonicalize()?;

        if let Some(tls) = config.tls.as_mut() {
            if tls.cert.is_relative() {
                tls.cert = dir.join(&tls.cert).canonicalize()?;
            }
            if tls.key.is_relative() {
                tls.key = dir.join(&tls.key).canonicalize()?;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_heartbeat_timeout_shorter_than_interval() {
        let dir = tempfile_dir();
        let path = dir.join("relay.toml");
        tokio::fs::write(
            &path,
            r#"
            admin_token = "T"
            heartbeat_interval_ms = 1000
            heartbeat_timeout_ms = 500
            "#,
        )
        .await
        .unwrap();
        let result = RelayConfig::load(&path).await;
        assert!(matches!(result, Err(Error::SessionTimeoutConfig)));
    }

    fn tempfile_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("servidesk-test-{:x}", rand::random::<u64>()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
