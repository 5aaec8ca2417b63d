//! Wire codec, end-to-end channel, and shared session types for
//! ServiDesk's relay and the two peer clients.
//!
//! This crate owns every shape that crosses the WebSocket: the JSON
//! envelope types (`envelope`), the binary packet framing (`binary`), the
//! ECDH/AEAD end-to-end channel (`e2e`), the adaptive quality controller
//! (`quality`), the dirty-rect streaming contract (`dirty_rect`), and the
//! registry/session record types (`device`) so the relay and both peer
//! clients share one definition instead of redefining them per crate.

#![deny(missing_docs)]

mod binary;
mod constants;
mod device;
mod dirty_rect;
mod e2e;
mod envelope;
mod error;
mod ids;
mod quality;

pub use binary::{Packet, Region};
pub use constants::*;
pub use device::{
    ActiveSession, AgentRecord, AgentStatus, DeviceListEntry, DeviceRecord, PasswordHash,
    PendingRequest, SessionLogEntry,
};
pub use dirty_rect::{DirtyRegion, EncoderState, FrameDecision, PersistentSurface};
pub use e2e::{Channel, E2eSession, LocalKeyPair};
pub use envelope::{
    peek_type, AcceptSupportPayload, AdminAuthPayload, AdminAuthResultPayload, AdminToRelay,
    AgentRegisterPayload, AgentRegisteredPayload, AgentToRelay, ChatMessagePayload,
    ConnectUnattendedPayload, DeleteDevicePayload, DeviceDeletedPayload, DeviceListPayload,
    DeviceStatusChangedPayload, E2eKeyExchangePayload, Empty, ErrorPayload, FileAcceptPayload,
    FileCompletePayload,
    FileErrorPayload, FileOfferPayload, HeartbeatAckPayload, HeartbeatPayload, InputEvent,
    KeyAction, Modifiers, MonitorInfoPayload, MonitorSwitchedPayload, MouseButton, RelayErrorCode,
    RejectRequestPayload, RelayToAdmin, RelayToAgent, RequestCancelledPayload,
    RequestRejectedPayload, RequestSupportPayload, SessionAcceptedPayload, SessionEndPayload, SessionEndedPayload,
    SessionStartedPayload, SpecialKeyCombination, SupportRequestPayload, UpdateAgentInfoPayload,
};
pub use error::Error;
pub use ids::{AgentId, SessionId};
pub use quality::{Quality, QualityChangePayload, QualityController};

pub use hex;
pub use uuid;

/// Result type for the protocol crate.
pub type Result<T> = std::result::Result<T, Error>;
