//! Peer client for the supported endpoint.
//!
//! Owns the relay connect FSM, the capture/encode streaming loop, input
//! injection dispatch, clipboard synchronization and incoming file
//! transfers. The platform-specific collaborators (screen capture, JPEG
//! encode, input injection, clipboard access) are narrow traits in
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
pub mod streaming;
pub mod transport;

pub use client::{AgentClient, ConnectState};
pub use collaborators::{CapturedFrame, ClipboardHost, FrameSource, InputInjector, JpegEncoder};
pub use config::AgentConfig;
pub use error::{Error, Result};
pub use session::E2eSession;
