use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the relay server.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file does not exist.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// `session.interval` must be greater than `session.timeout`.
    #[error("session reap interval must exceed the session timeout")]
    SessionTimeoutConfig,

    /// `data_dir` could not be created or is not writable.
    #[error("data directory {0} is not usable: {1}")]
    DataDir(PathBuf, std::io::Error),

    /// A handler ran outside the state it required.
    #[error("connection is not in the expected state")]
    InvalidConnectionState,

    /// `host:port` did not parse as a socket address.
    #[error("invalid bind address")]
    InvalidBindAddress,

    /// The configured TLS certificate/key could not be loaded.
    #[error("failed to load TLS certificate/key: {0}")]
    Tls(std::io::Error),

    /// The admin bearer token did not match.
    #[error("authentication failed")]
    AuthFailed,

    /// Error produced by the TOML config parser.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Error produced performing filesystem I/O.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error produced by the JSON codec.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Error produced by the wire codec or E2E channel crate.
    #[error(transparent)]
    Protocol(#[from] servidesk_protocol::Error),
}

/// Result type for the relay server crate.
pub type Result<T> = std::result::Result<T, Error>;
