//! End-to-end encryption session for the viewer side.
//!
//! Identical to the agent side's handshake/fallback-timer behavior
//! (spec.md §4.2); the implementation lives once in
//! `servidesk-protocol` and is re-exported here under the name the
//! rest of this crate uses.

pub use servidesk_protocol::E2eSession;
