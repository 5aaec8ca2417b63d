//! Agent configuration (spec.md §6 "Client configuration (enumerated)").

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use servidesk_protocol::Quality;

use crate::{Error, Result};

/// Top-level agent configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Relay WebSocket endpoint; must use `wss://`.
    pub relay_server_url: String,
    /// Stable agent id. Auto-generated on first run if left empty.
    pub agent_id: String,
    /// Pre-shared agent secret, if the relay requires one.
    pub agent_token: Option<String>,
    /// One-time provisioning token from `POST /api/provision`.
    pub provision_token: Option<String>,
    /// Ceiling on the streaming loop's target frame rate.
    pub capture_max_fps: u32,
    /// Starting quality tier before the adaptive controller takes over.
    pub capture_default_quality: Quality,
    /// Whether this agent accepts `connect_unattended` sessions.
    pub unattended_access_enabled: bool,
    /// Hex SHA-256 of the unattended-access password, if enabled.
    pub unattended_access_password_hash: Option<String>,
    /// Whether to reconnect automatically after an unexpected close.
    pub auto_reconnect: bool,
    /// Reconnect attempts before giving up (ignored when unattended).
    pub reconnect_max_retries: u32,
    /// Remap the Command key to Ctrl for cross-platform shortcuts.
    pub map_cmd_to_ctrl: bool,
    /// Application-level heartbeat cadence, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Reported hostname, collected by an external hardware-info source.
    pub hostname: String,
    /// Reported OS string.
    pub os: Option<String>,
    /// Reported agent software version.
    pub version: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_server_url: String::new(),
            agent_id: String::new(),
            agent_token: None,
            provision_token: None,
            capture_max_fps: 30,
            capture_default_quality: Quality::Medium,
            unattended_access_enabled: false,
            unattended_access_password_hash: None,
            auto_reconnect: true,
            reconnect_max_retries: 5,
            map_cmd_to_ctrl: false,
            heartbeat_interval_ms: 10_000,
            hostname: String::new(),
            os: None,
            version: None,
        }
    }
}

impl AgentConfig {
    /// Load and validate a configuration file, generating a fresh
    /// `agent_id` (a UUID) on first run if the file doesn't already
    /// carry one (spec.md §6 "`agent_id` (UUID, auto-generated on first
    /// run)").
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if !fs::try_exists(path.as_ref()).await? {
            return Err(Error::ConfigNotFound(path.as_ref().to_path_buf()));
        }
        let contents = fs::read_to_string(path.as_ref()).await?;
        let mut config: AgentConfig = toml::from_str(&contents)?;

        if config.agent_id.is_empty() {
            config.agent_id = uuid::Uuid::new_v4().simple().to_string();
            let updated = toml::to_string_pretty(&config).map_err(|e| {
                Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;
            fs::write(path.as_ref(), updated).await?;
        }

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
        let dir = std::env::temp_dir().join(format!("servidesk-agent-cfg-{:x}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("agent.toml");
        tokio::fs::write(&path, r#"relay_server_url = "ws://example.com/ws""#)
            .await
            .unwrap();
        let result = AgentConfig::load(&path).await;
        assert!(matches!(result, Err(Error::InsecureRelayUrl)));
    }

    #[tokio::test]
    async fn generates_agent_id_on_first_load() {
        let dir = std::env::temp_dir().join(format!("servidesk-agent-cfg-{:x}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("agent.toml");
        tokio::fs::write(&path, r#"relay_server_url = "wss://relay.example/ws""#)
            .await
            .unwrap();
        let config = AgentConfig::load(&path).await.unwrap();
        assert!(!config.agent_id.is_empty());

        let reloaded = AgentConfig::load(&path).await.unwrap();
        assert_eq!(reloaded.agent_id, config.agent_id);
    }
}
