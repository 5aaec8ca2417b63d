//! End-to-end encryption session for the agent side.
//!
//! The handshake, AEAD sealing and the 5-second fallback timer (spec.md
//! §4.2 "Fallback rule") are identical on both peers, so the
//! implementation lives once in `servidesk-protocol` and is re-exported
//! here under the name the rest of this crate already uses.

pub use servidesk_protocol::E2eSession;
