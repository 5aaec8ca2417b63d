use thiserror::Error;

/// Errors produced by the agent peer client.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured `relay_server_url` was not `wss://`.
    #[error("relay_server_url must use the wss:// scheme")]
    InsecureRelayUrl,

    /// Configuration file does not exist.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(std::path::PathBuf),

    /// `connect_async` failed or the handshake response was not 101.
    #[error("failed to connect to relay: {0}")]
    ConnectFailed(String),

    /// The outbound write task has exited; the connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// A capture/encode/inject/clipboard collaborator call failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Error produced by the shared wire codec or E2E channel.
    #[error(transparent)]
    Protocol(#[from] servidesk_protocol::Error),

    /// Error produced by the JSON codec.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Error produced by the TOML config parser.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Error produced performing filesystem I/O.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error produced by the WebSocket transport.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A `relay_server_url` did not parse as a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// Result type for the agent crate.
pub type Result<T> = std::result::Result<T, Error>;
