//! Core contract shared by the Matrix client runtime and its consumers.
//!
//! This crate defines the room event model and its decoding, the listener
//! registry, the sync lifecycle, and the common error/retry/credential types.
//! It performs no I/O.

/// Decoding of whole `/sync` response bodies.
pub mod batch;
/// Sync loop tuning.
pub mod config;
/// Credential model and the shared session store.
pub mod credentials;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Room event model and per-event decoding.
pub mod event;
/// Listener capability and thread-safe registry.
pub mod listener;
/// Backoff policy used by the sync loop.
pub mod retry;
/// Sync loop lifecycle state machine.
pub mod state_machine;
/// Status and request payload types.
pub mod types;

pub use batch::{InviteUpdate, RoomUpdate, SkippedEvent, SyncBatch};
pub use config::SyncConfig;
pub use credentials::{Credential, CredentialSource, SessionStore};
pub use error::{ClientError, ErrorCategory, classify_http_status};
pub use event::{
    DecodeError, EventSource, InviteEvent, MemberChange, Membership, RoomEvent, RoomMembership,
};
pub use listener::{
    BroadcastListener, ChannelListener, EventListener, ListenerHandle, ListenerRegistry,
    ListenerSnapshot,
};
pub use retry::RetryPolicy;
pub use state_machine::{SyncPhase, SyncStateMachine, SyncTrigger};
pub use types::{
    CreateRoomRequest, Member, Presence, ReceiptType, RoomPreset, RoomVisibility, StopReason,
    SyncStatus,
};
