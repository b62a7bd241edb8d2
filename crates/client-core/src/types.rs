use serde::{Deserialize, Serialize};

use crate::{error::ClientError, state_machine::SyncPhase};

/// Why the sync loop last stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The session was logged out; the loop suspended instead of sending an unauthenticated call.
    CredentialsCleared,
    /// The homeserver rejected the credential or the request; see `SyncStatus::last_error`.
    Unrecoverable,
}

/// Snapshot of the sync loop, published on every phase change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Delay before the next retry while in `Backoff`.
    pub lag_hint_ms: Option<u64>,
    /// Set once the loop stops; cleared by the next start.
    pub stop_reason: Option<StopReason>,
    /// Most recent failure, recoverable or not. Cleared after a successful poll,
    /// and when the loop stops for any reason other than `Unrecoverable`.
    pub last_error: Option<ClientError>,
}

impl SyncStatus {
    pub fn running(&self) -> bool {
        self.phase != SyncPhase::Stopped
    }
}

/// A joined member as reported by `/joined_members`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user_id: String,
    /// `None` when the member has no display name.
    pub display_name: Option<String>,
    /// `None` when the member has no avatar.
    pub avatar_url: Option<String>,
}

/// Room preset accepted by `createRoom`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomPreset {
    PublicChat,
    PrivateChat,
    TrustedPrivateChat,
}

/// Room directory visibility accepted by `createRoom`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomVisibility {
    Public,
    Private,
}

/// Body of a `createRoom` request. `None` fields are omitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRoomRequest {
    pub preset: RoomPreset,
    pub visibility: RoomVisibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "room_alias_name", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub invite: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_version: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub is_direct: bool,
}

impl CreateRoomRequest {
    pub fn new(preset: RoomPreset, visibility: RoomVisibility) -> Self {
        Self {
            preset,
            visibility,
            name: None,
            alias: None,
            topic: None,
            invite: Vec::new(),
            room_version: None,
            is_direct: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_invite(mut self, user_id: impl Into<String>) -> Self {
        self.invite.push(user_id.into());
        self
    }

    pub fn with_room_version(mut self, version: impl Into<String>) -> Self {
        self.room_version = Some(version.into());
        self
    }

    /// A private direct chat with one user, as used for `m.direct` rooms.
    pub fn direct(user_id: impl Into<String>) -> Self {
        let mut request = Self::new(RoomPreset::TrustedPrivateChat, RoomVisibility::Private);
        request.invite.push(user_id.into());
        request.is_direct = true;
        request
    }
}

/// Read receipt kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReceiptType {
    /// `m.read`
    Read,
    /// `m.read.private`
    ReadPrivate,
    /// `m.fully_read`
    FullyRead,
}

impl ReceiptType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "m.read",
            Self::ReadPrivate => "m.read.private",
            Self::FullyRead => "m.fully_read",
        }
    }
}

/// Presence states accepted by `/presence/{userId}/status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Online,
    Offline,
    Unavailable,
}
