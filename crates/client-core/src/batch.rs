//! Decoding of one `/sync` response body into per-room event batches.

use serde_json::{Map, Value};
use tracing::warn;

use crate::{
    error::ClientError,
    event::{DecodeError, EventSource, InviteEvent, RoomEvent, RoomMembership},
};

/// Events for one joined or left room, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomUpdate {
    pub room_id: String,
    pub membership: RoomMembership,
    /// `state` entries followed by `timeline` entries, each in server order.
    pub events: Vec<RoomEvent>,
    /// The server truncated the timeline; there is a gap before it.
    pub limited: bool,
    /// Pagination token for history preceding this timeline chunk.
    pub prev_batch: Option<String>,
}

/// Stripped state for one room the user is invited to.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteUpdate {
    pub room_id: String,
    pub events: Vec<InviteEvent>,
}

/// A malformed entry that was dropped from the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEvent {
    pub room_id: String,
    /// `None` for stripped invite state.
    pub source: Option<EventSource>,
    /// Position of the entry in its server-provided array.
    pub index: usize,
    pub error: DecodeError,
}

/// One accepted `/sync` response.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncBatch {
    /// Resume token to present on the next request.
    pub next_batch: String,
    pub rooms: Vec<RoomUpdate>,
    pub invites: Vec<InviteUpdate>,
    pub skipped: Vec<SkippedEvent>,
}

impl SyncBatch {
    /// Parse a raw response body.
    ///
    /// Only a body that is not JSON, or that lacks `next_batch`, fails the
    /// whole batch. Individual malformed events end up in `skipped`.
    pub fn parse(body: &str) -> Result<Self, ClientError> {
        let root: Value = serde_json::from_str(body)
            .map_err(|err| ClientError::protocol(format!("sync body is not JSON: {err}")))?;

        let next_batch = root
            .get("next_batch")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::protocol("sync response is missing 'next_batch'"))?
            .to_owned();

        let mut batch = Self {
            next_batch,
            rooms: Vec::new(),
            invites: Vec::new(),
            skipped: Vec::new(),
        };

        let rooms = root.get("rooms");
        for (section, membership) in [("join", RoomMembership::Joined), ("leave", RoomMembership::Left)] {
            for (room_id, room) in section_rooms(rooms, section) {
                let update = batch.decode_room(room_id, room, membership);
                batch.rooms.push(update);
            }
        }
        for (room_id, room) in section_rooms(rooms, "invite") {
            let update = batch.decode_invite(room_id, room);
            batch.invites.push(update);
        }

        Ok(batch)
    }

    /// Number of room events (not invites) that will be delivered.
    pub fn event_count(&self) -> usize {
        self.rooms.iter().map(|room| room.events.len()).sum()
    }

    fn decode_room(&mut self, room_id: &str, room: &Value, membership: RoomMembership) -> RoomUpdate {
        let mut events = Vec::new();
        for source in [EventSource::State, EventSource::Timeline] {
            let key = match source {
                EventSource::State => "state",
                EventSource::Timeline => "timeline",
            };
            for (index, raw) in event_array(room.get(key)).iter().enumerate() {
                match RoomEvent::decode(room_id, raw, source, membership) {
                    Ok(event) => events.push(event),
                    Err(error) => self.skip(room_id, Some(source), index, error),
                }
            }
        }

        let timeline = room.get("timeline");
        RoomUpdate {
            room_id: room_id.to_owned(),
            membership,
            events,
            limited: timeline
                .and_then(|t| t.get("limited"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            prev_batch: timeline
                .and_then(|t| t.get("prev_batch"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        }
    }

    fn decode_invite(&mut self, room_id: &str, room: &Value) -> InviteUpdate {
        let mut events = Vec::new();
        for (index, raw) in event_array(room.get("invite_state")).iter().enumerate() {
            match InviteEvent::decode(room_id, raw) {
                Ok(event) => events.push(event),
                Err(error) => self.skip(room_id, None, index, error),
            }
        }
        InviteUpdate {
            room_id: room_id.to_owned(),
            events,
        }
    }

    fn skip(&mut self, room_id: &str, source: Option<EventSource>, index: usize, error: DecodeError) {
        warn!(room_id, ?source, index, %error, "skipping malformed sync event");
        self.skipped.push(SkippedEvent {
            room_id: room_id.to_owned(),
            source,
            index,
            error,
        });
    }
}

fn section_rooms<'a>(rooms: Option<&'a Value>, section: &str) -> impl Iterator<Item = (&'a str, &'a Value)> {
    rooms
        .and_then(|rooms| rooms.get(section))
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(Map::iter)
        .map(|(room_id, room)| (room_id.as_str(), room))
}

fn event_array(container: Option<&Value>) -> &[Value] {
    container
        .and_then(|c| c.get("events"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
