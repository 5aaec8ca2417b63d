//! Viewer (technician-side) configuration, loaded from a TOML file.
//!
//! Mirrors `servidesk-agent`'s `AgentConfig::load` shape (spec.md §6
//! "Client configuration"), trimmed to the fields the technician side
//! actually needs: no capture/unattended-agent settings, but the same
//! `wss://`-only validation and reconnect/backoff knobs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{Error, Result};

/// Top-level viewer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Relay WebSocket endpoint; must use `wss://`.
    pub relay_server_url: String,
    /// Shared admin bearer token.
    pub admin_token: String,
    /// Technician display name sent with `admin_auth`.
    pub admin_name: String,
    /// Whether to reconnect automatically after an unexpected close.
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up.
    pub reconnect_max_retries: u32,
    /// Application-level heartbeat cadence, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Remap the Command key to Ctrl for cross-platform shortcuts
    /// before the event reaches the agent's injector.
    pub map_cmd_to_ctrl: bool,
    /// Whether this host's pointer coordinate origin is bottom-left,
    /// requiring the y axis to be flipped before it goes on the wire
    /// (spec.md §4.6 "Input production": "the wire is always top-left
    /// origin").
    pub flip_y_origin: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            relay_server_url: String::new(),
            admin_token: String::new(),
            admin_name: String::new(),
            auto_reconnect: true,
            reconnect_max_retries: 5,
            heartbeat_interval_ms: 10_000,
            map_cmd_to_ctrl: false,
            flip_y_origin: false,
        }
    }
}

impl ViewerConfig {
    /// Load and validate a configuration file.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !fs::try_exists(path.as_ref()).await? {
            return Err(Error::ConfigNotFound(path.as_ref().to_path_buf()));
        }
        let contents = fs::read_to_string(path.as_ref()).await?;
        let config: ViewerConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject anything but a `wss://` relay URL (spec.md §6 "agents/
    /// viewers MUST reject non-`wss://` URLs").
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.relay_server_url)?;
        if url.scheme() != "wss" {
            return Err(Error::InsecureRelayUrl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_wss_relay_url() {
        let dir = std::env::temp_dir()
            .join(format!("servidesk-viewer-cfg-{:x}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("viewer.toml");
        tokio::fs::write(
            &path,
            r#"relay_server_url = "ws://example.com/ws"
admin_token = "t"
admin_name = "a"
"#,
        )
        .await
        .unwrap();
        let result = ViewerConfig::load(&path).await;
        assert!(matches!(result, Err(Error::InsecureRelayUrl)));
    }

    #[tokio::test]
    async fn accepts_wss_relay_url() {
        let dir = std::env::temp_dir()
            .join(format!("servidesk-viewer-cfg-{:x}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("viewer.toml");
        tokio::fs::write(
            &path,
            r#"relay_server_url = "wss://relay.example/ws"
admin_token = "t"
admin_name = "a"
"#,
        )
        .await
        .unwrap();
        let config = ViewerConfig::load(&path).await.unwrap();
        assert_eq!(config.admin_name, "a");
    }
}
