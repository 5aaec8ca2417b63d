//! Constants shared by the relay and both peer clients.

/// HKDF-SHA256 salt used to derive the E2E AES-256-GCM key.
pub const E2E_HKDF_SALT: &[u8] = b"servidesk-e2e";

/// HKDF-SHA256 info used to derive the E2E AES-256-GCM key.
pub const E2E_HKDF_INFO: &[u8] = b"aes-key";

/// Length in bytes of an AES-256-GCM key.
pub const AES_KEY_LEN: usize = 32;

/// Length in bytes of the AEAD nonce (4 byte random prefix + 8 byte
/// little-endian counter).
pub const NONCE_LEN: usize = 12;

/// Length in bytes of the AEAD authentication tag.
pub const TAG_LEN: usize = 16;

/// Length in bytes of an uncompressed P-256 public key point, leading
/// `0x04` byte included.
pub const P256_PUBLIC_KEY_LEN: usize = 65;

/// Number of seconds the agent waits for an `e2e_key_exchange` before
/// falling back to unencrypted legacy streaming.
pub const E2E_FALLBACK_SECS: u64 = 5;

/// Keyframe cadence: a full frame is forced every this many streaming
/// ticks (~2s at 30fps).
pub const KEYFRAME_INTERVAL: u32 = 60;

/// Aggregate dirty area above this fraction of the screen forces a
/// full-frame fallback instead of a regional update.
pub const DIRTY_AREA_FULL_FRAME_THRESHOLD: f32 = 0.5;

/// WHEEL_DELTA units per mouse wheel notch.
pub const WHEEL_DELTA: i32 = 120;

/// Maximum outgoing file-transfer chunk size in bytes.
pub const FILE_CHUNK_MAX_BYTES: usize = 1_500_000;

/// Regular expression-equivalent validation is hand rolled in
/// [`crate::ids::AgentId`]; this is the maximum length it allows.
pub const AGENT_ID_MAX_LEN: usize = 128;
