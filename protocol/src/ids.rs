//! Validated identifier newtypes shared by every crate in the workspace.

use std::fmt;

use rand::RngCore;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A stable agent identifier: `[A-Za-z0-9_-]{1,128}`.
///
/// This is the key of the agent table, the pending-request owner, and the
/// device registry — every place spec.md calls out the same validation
/// rule gets it from here instead of re-deriving it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(String);

impl AgentId {
    /// Validate and wrap a candidate agent id.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if is_valid_agent_id(&raw) {
            Ok(Self(raw))
        } else {
            Err(Error::InvalidAgentId(raw))
        }
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_agent_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= crate::constants::AGENT_ID_MAX_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for AgentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AgentId::new(raw).map_err(D::Error::custom)
    }
}

/// A 192-bit random session id, carried on the wire as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId([u8; 24]);

impl SessionId {
    /// Generate a new random session id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a session id from its hex wire representation.
    pub fn from_hex(raw: &str) -> Result<Self> {
        let decoded = hex::decode(raw).map_err(|_| Error::InvalidAgentId(raw.to_string()))?;
        let bytes: [u8; 24] = decoded
            .try_into()
            .map_err(|_| Error::InvalidAgentId(raw.to_string()))?;
        Ok(Self(bytes))
    }

    /// Render as lowercase hex, the wire representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SessionId::from_hex(&raw).map_err(D::Error::custom)
    }
}
