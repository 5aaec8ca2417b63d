//! ECDH(P-256) + HKDF-SHA256 + AES-256-GCM end-to-end channel.
//!
//! The relay forwards every byte this module produces without being able
//! to read it: key agreement happens entirely between the two peers.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::EncodedPoint;
use rand::RngCore;
use sha2::Sha256;

use crate::constants::{
    AES_KEY_LEN, E2E_HKDF_INFO, E2E_HKDF_SALT, NONCE_LEN, P256_PUBLIC_KEY_LEN, TAG_LEN,
};
use crate::error::{Error, Result};

/// One side's ephemeral ECDH key pair, not yet bound to a peer.
pub struct LocalKeyPair {
    secret: EphemeralSecret,
    public: EncodedPoint,
}

impl LocalKeyPair {
    /// Generate a fresh ephemeral P-256 key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut rand::rngs::OsRng);
        let public = secret.public_key().to_encoded_point(false);
        Self { secret, public }
    }

    /// The 65-byte uncompressed point to send as `public_key` in the
    /// `e2e_key_exchange` payload.
    pub fn public_key_bytes(&self) -> [u8; P256_PUBLIC_KEY_LEN] {
        let mut out = [0u8; P256_PUBLIC_KEY_LEN];
        out.copy_from_slice(self.public.as_bytes());
        out
    }

    /// Complete the handshake against the peer's public key, producing a
    /// channel ready to seal and open packets.
    pub fn derive_channel(self, peer_public_key: &[u8]) -> Result<Channel> {
        let peer_point = EncodedPoint::from_bytes(peer_public_key)
            .map_err(|_| Error::InvalidPublicKey)?;
        let peer_public = p256::PublicKey::from_sec1_bytes(peer_point.as_bytes())
            .map_err(|_| Error::InvalidPublicKey)?;
        let shared = self.secret.diffie_hellman(&peer_public);

        let hk = Hkdf::<Sha256>::new(Some(E2E_HKDF_SALT), shared.raw_secret_bytes().as_slice());
        let mut key_bytes = [0u8; AES_KEY_LEN];
        hk.expand(E2E_HKDF_INFO, &mut key_bytes)
            .expect("AES-256 key length is a valid HKDF output length");

        let cipher = Aes256Gcm::new_from_slice(&key_bytes).expect("key is exactly 32 bytes");
        let mut nonce_prefix = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut nonce_prefix);

        Ok(Channel {
            cipher,
            nonce_prefix,
            counter: 0,
        })
    }
}

/// A ready-to-use, per-connection AEAD channel.
///
/// Mirrors the "E2E state" record in spec.md §3: nonce prefix and counter
/// are fixed at derivation time, and the counter only ever moves forward.
pub struct Channel {
    cipher: Aes256Gcm,
    nonce_prefix: [u8; 4],
    counter: u64,
}

impl Channel {
    fn next_nonce(&mut self) -> [u8; NONCE_LEN] {
        self.counter = self
            .counter
            .checked_add(1)
            .expect("u64 nonce counter exhausted before key rotation");
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..4].copy_from_slice(&self.nonce_prefix);
        nonce[4..].copy_from_slice(&self.counter.to_le_bytes());
        nonce
    }

    /// Seal a plaintext buffer, producing `[12 B nonce][ciphertext][16 B tag]`.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce_bytes = self.next_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| Error::Aead)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a sealed envelope produced by [`Channel::seal`] on the peer
    /// under the same derived key.
    pub fn open(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        if envelope.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::EnvelopeTooShort);
        }
        let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(
                nonce,
                Payload {
                    msg: ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| Error::Aead)
    }
}

/// Per-session wrapper around [`LocalKeyPair`]/[`Channel`] that adds the
/// 5-second fallback timer from spec.md §4.2 "Fallback rule": if no
/// `e2e_key_exchange` arrives within the window, the peer starts
/// streaming unencrypted; a key exchange that arrives later still
/// upgrades subsequent frames. Shared by both peer clients so the
/// fallback discipline can't drift between the agent and viewer sides.
pub struct E2eSession {
    local: Option<LocalKeyPair>,
    channel: Option<Channel>,
    deadline: tokio::time::Instant,
}

impl E2eSession {
    /// Start a session: generate a local key pair and arm the fallback
    /// deadline relative to now.
    pub fn start() -> Self {
        Self {
            local: Some(LocalKeyPair::generate()),
            channel: None,
            deadline: tokio::time::Instant::now()
                + std::time::Duration::from_secs(crate::constants::E2E_FALLBACK_SECS),
        }
    }

    /// Base64 of this side's public key, to send as `e2e_key_exchange`.
    pub fn public_key_base64(&self) -> Option<String> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        self.local
            .as_ref()
            .map(|kp| STANDARD.encode(kp.public_key_bytes()))
    }

    /// Time remaining until the fallback timer fires.
    pub fn time_remaining(&self) -> std::time::Duration {
        self.deadline
            .saturating_duration_since(tokio::time::Instant::now())
    }

    /// Whether the fallback window has elapsed without a completed
    /// handshake.
    pub fn fallback_elapsed(&self) -> bool {
        self.channel.is_none() && tokio::time::Instant::now() >= self.deadline
    }

    /// Whether frames should currently be sent in the clear.
    pub fn is_unencrypted(&self) -> bool {
        self.channel.is_none()
    }

    /// Complete the handshake against a peer's base64-encoded public key.
    /// Can run before or after the fallback timer fires; a late key
    /// exchange still upgrades subsequent frames (spec.md §4.2).
    pub fn complete(&mut self, peer_public_key_b64: &str) -> Result<()> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let Some(local) = self.local.take() else {
            return Ok(());
        };
        let peer_bytes = STANDARD
            .decode(peer_public_key_b64)
            .map_err(|_| Error::InvalidPublicKey)?;
        let channel = local.derive_channel(&peer_bytes)?;
        self.channel = Some(channel);
        Ok(())
    }

    /// Seal a plaintext payload if the channel is established, otherwise
    /// pass it through unencrypted.
    pub fn seal_or_passthrough(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match &mut self.channel {
            Some(channel) => channel.seal(plaintext),
            None => Ok(plaintext.to_vec()),
        }
    }

    /// Open a sealed payload if the channel is established, otherwise
    /// treat the bytes as already-plaintext.
    pub fn open_or_passthrough(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match &self.channel {
            Some(channel) => channel.open(bytes),
            None => Ok(bytes.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_derives_matching_channels() {
        let alice = LocalKeyPair::generate();
        let bob = LocalKeyPair::generate();

        let alice_pub = alice.public_key_bytes();
        let bob_pub = bob.public_key_bytes();

        let mut alice_channel = alice.derive_channel(&bob_pub).unwrap();
        let bob_channel = bob.derive_channel(&alice_pub).unwrap();

        let sealed = alice_channel.seal(b"hello viewer").unwrap();
        let opened = bob_channel.open(&sealed).unwrap();
        assert_eq!(opened, b"hello viewer");
    }

    #[test]
    fn nonce_counter_strictly_increases_and_never_repeats() {
        let alice = LocalKeyPair::generate();
        let bob = LocalKeyPair::generate();
        let mut channel = alice.derive_channel(&bob.public_key_bytes()).unwrap();

        let first = channel.seal(b"one").unwrap();
        let second = channel.seal(b"two").unwrap();
        assert_ne!(&first[..NONCE_LEN], &second[..NONCE_LEN]);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let alice = LocalKeyPair::generate();
        let bob = LocalKeyPair::generate();
        let mallory = LocalKeyPair::generate();
        let bob_pub = bob.public_key_bytes();

        let mut alice_channel = alice.derive_channel(&bob_pub).unwrap();
        let mallory_channel = mallory.derive_channel(&bob_pub).unwrap();

        let sealed = alice_channel.seal(b"secret").unwrap();
        assert!(mallory_channel.open(&sealed).is_err());
    }

    #[test]
    fn e2e_session_unencrypted_until_handshake_completes() {
        let session = E2eSession::start();
        assert!(session.is_unencrypted());
    }

    #[test]
    fn e2e_session_handshake_upgrades_to_encrypted() {
        let agent = E2eSession::start();
        let viewer = E2eSession::start();

        let agent_pub = agent.public_key_base64().unwrap();
        let viewer_pub = viewer.public_key_base64().unwrap();

        let mut agent = agent;
        agent.complete(&viewer_pub).unwrap();
        assert!(!agent.is_unencrypted());

        let mut viewer = viewer;
        viewer.complete(&agent_pub).unwrap();

        let sealed = agent.seal_or_passthrough(b"hello viewer").unwrap();
        let opened = viewer.open_or_passthrough(&sealed).unwrap();
        assert_eq!(opened, b"hello viewer");
    }

    #[tokio::test(start_paused = true)]
    async fn e2e_session_fallback_elapses_after_five_seconds() {
        let session = E2eSession::start();
        assert!(!session.fallback_elapsed());
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        assert!(session.fallback_elapsed());
    }

    #[test]
    fn flipped_ciphertext_byte_fails_to_open() {
        let alice = LocalKeyPair::generate();
        let bob = LocalKeyPair::generate();
        let alice_pub = alice.public_key_bytes();
        let bob_pub = bob.public_key_bytes();
        let mut alice_channel = alice.derive_channel(&bob_pub).unwrap();
        let bob_channel = bob.derive_channel(&alice_pub).unwrap();

        let mut sealed = alice_channel.seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(bob_channel.open(&sealed).is_err());
    }
}
