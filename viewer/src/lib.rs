//! Peer client for the technician's machine.
//!
//! Owns the relay connect FSM, admin authentication, device/session
//! actions, the persistent-surface stream sink, input production and
//! clipboard sync, and outgoing file transfers. The platform-specific
//! collaborators (JPEG decode, frame presentation, input capture,
//! clipboard access, outgoing-file prompts) are narrow traits in
//! [`collaborators`] so this crate's logic is testable without a real
//! desktop underneath it.

pub mod client;
pub mod clipboard;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod file_transfer;
pub mod input;
pub mod session;
pub mod stream_sink;
pub mod transport;

pub use client::{ActionHandle, ConnectState, ViewerAction, ViewerClient};
pub use collaborators::{ClipboardHost, FrameSink, InputSource, JpegDecoder, OutgoingFilePrompt};
pub use config::ViewerConfig;
pub use error::{Error, Result};
pub use session::E2eSession;
