use thiserror::Error;

/// Errors produced by the wire codec and end-to-end channel.
#[derive(Debug, Error)]
pub enum Error {
    /// A binary packet's type byte did not match any known packet kind.
    #[error("unknown packet type byte {0:#04x}")]
    UnknownPacketType(u8),

    /// A binary packet was truncated before its declared length.
    #[error("packet truncated: expected {expected} bytes, found {found}")]
    Truncated {
        /// Expected length in bytes.
        expected: usize,
        /// Bytes actually available.
        found: usize,
    },

    /// A file-transfer chunk carried a transfer id that was not
    /// valid ASCII or exceeded the 1-byte length prefix.
    #[error("invalid file transfer id")]
    InvalidTransferId,

    /// An `agent_id` failed the `[A-Za-z0-9_-]{1,128}` validation.
    #[error("invalid agent id {0:?}")]
    InvalidAgentId(String),

    /// A supplied unattended-access password hash was not 64 lowercase
    /// hex characters.
    #[error("password hash must be 64 lowercase hex characters")]
    InvalidPasswordHash,

    /// ECDH public key was not a 65-byte uncompressed P-256 point.
    #[error("invalid ECDH public key encoding")]
    InvalidPublicKey,

    /// AEAD seal or open failed (wrong key, flipped byte, or reused
    /// nonce pair).
    #[error("AEAD operation failed")]
    Aead,

    /// The E2E channel has not completed key derivation yet.
    #[error("end-to-end channel is not ready")]
    ChannelNotReady,

    /// A sealed envelope was shorter than the minimum nonce+tag size.
    #[error("sealed envelope too short")]
    EnvelopeTooShort,

    /// Error produced by the JSON codec.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Error produced performing I/O on a packet buffer.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for the protocol crate.
pub type Result<T> = std::result::Result<T, Error>;
