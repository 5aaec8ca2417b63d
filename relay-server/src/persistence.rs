//! Atomic JSON persistence for the device registry and session log
//! (spec.md §6 "Persisted state (relay)"): each file is rewritten as a
//! whole via temp-file-plus-rename after every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::fs;

use servidesk_protocol::{AgentId, DeviceRecord, SessionLogEntry};

use crate::Result;

async fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json_or_default<T: Default + serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T> {
    if !fs::try_exists(path).await? {
        return Ok(T::default());
    }
    let contents = fs::read_to_string(path).await?;
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&contents)?)
}

/// Persistent device registry: upserted on every agent registration,
/// removed only by explicit admin delete of an offline device.
pub struct DeviceRegistry {
    path: PathBuf,
    devices: HashMap<AgentId, DeviceRecord>,
}

impl DeviceRegistry {
    /// Load the registry from `devices.json` in `data_dir`, or start
    /// empty if the file does not exist yet.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("devices.json");
        let list: Vec<DeviceRecord> = read_json_or_default(&path).await?;
        let devices = list
            .into_iter()
            .map(|d| (d.agent_id.clone(), d))
            .collect();
        Ok(Self { path, devices })
    }

    /// Upsert one record and flush the whole registry atomically.
    /// A no-op upsert (identical record) still rewrites the file, since
    /// this type has no cheap equality short-circuit over `DeviceRecord`
    /// beyond what the caller has already checked.
    pub async fn upsert(&mut self, record: DeviceRecord) -> Result<()> {
        self.devices.insert(record.agent_id.clone(), record);
        self.flush().await
    }

    /// Remove a device and flush. Returns `false` if it was not present.
    pub async fn remove(&mut self, agent_id: &AgentId) -> Result<bool> {
        let removed = self.devices.remove(agent_id).is_some();
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    /// Look up one device record.
    pub fn get(&self, agent_id: &AgentId) -> Option<&DeviceRecord> {
        self.devices.get(agent_id)
    }

    /// Snapshot of every registry entry, in storage order. Callers
    /// attach `is_online` and apply the online-first/`last_seen`-desc
    /// ordering (spec.md §4.3 `get_device_list`).
    pub fn all(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    async fn flush(&self) -> Result<()> {
        let list: Vec<&DeviceRecord> = self.devices.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        write_atomic(&self.path, &json).await
    }
}

/// Append-only session history, rewritten whole on each append (the
/// same atomic-write discipline as the device registry, since the
/// expected write volume does not justify a true append-mode log).
pub struct SessionLog {
    path: PathBuf,
    entries: Vec<SessionLogEntry>,
}

impl SessionLog {
    /// Load `sessions.json` from `data_dir`, or start empty.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("sessions.json");
        let entries = read_json_or_default(&path).await?;
        Ok(Self { path, entries })
    }

    /// Append one record and flush.
    pub async fn append(&mut self, entry: SessionLogEntry) -> Result<()> {
        self.entries.push(entry);
        let json = serde_json::to_string_pretty(&self.entries)?;
        write_atomic(&self.path, &json).await
    }

    /// All recorded sessions, oldest first.
    pub fn entries(&self) -> &[SessionLogEntry] {
        &self.entries
    }
}

/// One-time agent registration tokens issued by `POST /api/provision`
/// (spec.md §6 "Persisted state (relay)": `agent-tokens.json`).
pub struct AgentTokenStore {
    path: PathBuf,
    live: std::collections::HashSet<String>,
}

impl AgentTokenStore {
    /// Load `agent-tokens.json` from `data_dir`, or start empty.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("agent-tokens.json");
        let list: Vec<String> = read_json_or_default(&path).await?;
        Ok(Self {
            path,
            live: list.into_iter().collect(),
        })
    }

    /// Mint and persist a fresh token.
    pub async fn issue(&mut self) -> Result<String> {
        let mut raw = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut raw);
        let token = hex::encode(raw);
        self.live.insert(token.clone());
        self.flush().await?;
        Ok(token)
    }

    /// Consume a token if it is live, invalidating it either way it was
    /// presented (one-time use). Returns whether it was valid.
    pub async fn consume(&mut self, token: &str) -> Result<bool> {
        let removed = self.live.remove(token);
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn flush(&self) -> Result<()> {
        let list: Vec<&String> = self.live.iter().collect();
        let json = serde_json::to_string_pretty(&list)?;
        write_atomic(&self.path, &json).await
    }
}
