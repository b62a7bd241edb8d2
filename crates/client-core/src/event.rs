//! Typed room events decoded from raw sync payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a single raw event could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The entry is not a JSON object.
    #[error("event is not a JSON object")]
    NotAnObject,
    /// A required field is absent.
    #[error("event is missing required field '{0}'")]
    MissingField(&'static str),
    /// A field is present but has the wrong JSON type.
    #[error("event field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Which part of a room's sync payload an event came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// `state.events`: state in effect at the start of the timeline.
    State,
    /// `timeline.events`: appended history, possibly including state changes.
    Timeline,
}

/// The user's relationship to the room the event was delivered under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RoomMembership {
    /// Delivered under `rooms.join`.
    Joined,
    /// Delivered under `rooms.leave`.
    Left,
}

/// One decoded room event. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomEvent {
    pub event_id: String,
    pub room_id: String,
    pub sender: String,
    /// Event type such as `m.room.message`; unknown types are kept verbatim.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Milliseconds since the Unix epoch, when the server supplied it.
    pub origin_server_ts: Option<u64>,
    /// Always a JSON object; `{}` when the server omitted it.
    pub content: Value,
    pub state_key: Option<String>,
    pub source: EventSource,
    pub membership: RoomMembership,
}

impl RoomEvent {
    /// Decode one element of a room's event array.
    ///
    /// `event_id`, `type` and `sender` are required. Entries taken from a
    /// `state` section must also carry a `state_key`.
    pub fn decode(
        room_id: &str,
        raw: &Value,
        source: EventSource,
        membership: RoomMembership,
    ) -> Result<Self, DecodeError> {
        let object = raw.as_object().ok_or(DecodeError::NotAnObject)?;

        let event_id = required_str(object, "event_id")?;
        let event_type = required_str(object, "type")?;
        let sender = required_str(object, "sender")?;
        let state_key = optional_str(object, "state_key")?;
        if source == EventSource::State && state_key.is_none() {
            return Err(DecodeError::MissingField("state_key"));
        }

        let origin_server_ts = match object.get("origin_server_ts") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_u64().ok_or(DecodeError::InvalidField {
                field: "origin_server_ts",
                expected: "a non-negative integer",
            })?),
        };

        Ok(Self {
            event_id,
            room_id: room_id.to_owned(),
            sender,
            event_type,
            origin_server_ts,
            content: content_object(object)?,
            state_key,
            source,
            membership,
        })
    }

    /// State events carry a `state_key`, even when it is the empty string.
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// Message body, for `m.room.message` and similar events.
    pub fn body(&self) -> Option<&str> {
        self.content.get("body").and_then(Value::as_str)
    }

    pub fn msgtype(&self) -> Option<&str> {
        self.content.get("msgtype").and_then(Value::as_str)
    }

    /// Interpret an `m.room.member` state event.
    pub fn member_change(&self) -> Option<MemberChange> {
        if self.event_type != "m.room.member" {
            return None;
        }
        let user_id = self.state_key.clone()?;
        let membership = self
            .content
            .get("membership")
            .and_then(Value::as_str)
            .map(Membership::from)?;

        Some(MemberChange {
            user_id,
            membership,
            display_name: non_empty_str(&self.content, "displayname"),
            avatar_url: non_empty_str(&self.content, "avatar_url"),
        })
    }
}

/// Membership value from an `m.room.member` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
    /// Value not defined by the client-server API at the time of writing.
    Other(String),
}

impl From<&str> for Membership {
    fn from(value: &str) -> Self {
        match value {
            "join" => Self::Join,
            "invite" => Self::Invite,
            "leave" => Self::Leave,
            "ban" => Self::Ban,
            "knock" => Self::Knock,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// A membership change extracted from an `m.room.member` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberChange {
    /// The affected user (the event's `state_key`).
    pub user_id: String,
    pub membership: Membership,
    /// `None` when the event has no (or an empty) display name.
    pub display_name: Option<String>,
    /// `None` when the event has no (or an empty) avatar.
    pub avatar_url: Option<String>,
}

/// Stripped state event received for a room the user is invited to.
///
/// The homeserver omits `event_id` and timestamps for these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InviteEvent {
    pub room_id: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub state_key: Option<String>,
    pub content: Value,
}

impl InviteEvent {
    pub fn decode(room_id: &str, raw: &Value) -> Result<Self, DecodeError> {
        let object = raw.as_object().ok_or(DecodeError::NotAnObject)?;
        Ok(Self {
            room_id: room_id.to_owned(),
            sender: required_str(object, "sender")?,
            event_type: required_str(object, "type")?,
            state_key: optional_str(object, "state_key")?,
            content: content_object(object)?,
        })
    }
}

fn required_str(object: &Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    optional_str(object, field)?.ok_or(DecodeError::MissingField(field))
}

fn optional_str(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, DecodeError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(DecodeError::InvalidField {
            field,
            expected: "a string",
        }),
    }
}

fn content_object(object: &Map<String, Value>) -> Result<Value, DecodeError> {
    match object.get("content") {
        None | Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(content @ Value::Object(_)) => Ok(content.clone()),
        Some(_) => Err(DecodeError::InvalidField {
            field: "content",
            expected: "an object",
        }),
    }
}

fn non_empty_str(content: &Value, field: &str) -> Option<String> {
    content
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
