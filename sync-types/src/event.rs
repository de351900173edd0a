//! Per-room data delivered by the server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A timeline or state event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    /// Globally unique event identifier
    pub event_id: String,
    /// Event type, e.g. `m.room.message`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Sender user ID
    pub sender: String,
    /// Server timestamp in milliseconds
    pub origin_server_ts: u64,
    /// Event content
    #[serde(default)]
    pub content: Value,
    /// Present on state events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    /// Unsigned server-added data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
}

impl RoomEvent {
    /// Whether this event carries a state key.
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }
}

/// Stripped state shared with invited or knocking users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrippedStateEvent {
    /// Event type
    #[serde(rename = "type")]
    pub event_type: String,
    /// State key
    pub state_key: String,
    /// Sender user ID
    pub sender: String,
    /// Event content
    #[serde(default)]
    pub content: Value,
}

/// A room member used to name or badge an unnamed room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hero {
    /// User ID
    pub user_id: String,
    /// Display name, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displayname: Option<String>,
    /// Avatar URL, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Everything the server sent about one room in one response.
///
/// Timeline events arrive newest-first and their order is not guaranteed
/// stable; use [`RoomPayload::newest_event`] rather than position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomPayload {
    /// Computed room name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Room avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Room topic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Joined member count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_count: Option<u64>,
    /// Invited member count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invited_count: Option<u64>,
    /// Heroes for unnamed rooms
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub heroes: Vec<Hero>,
    /// Activity ordering signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bump_stamp: Option<i64>,
    /// Server claims this is the first time it sends the room on this connection
    #[serde(default)]
    pub initial: bool,
    /// Server hint for how many timeline events are live (not trusted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_live: Option<u32>,
    /// Timeline events, newest-first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timeline: Vec<RoomEvent>,
    /// Requested state events
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_state: Vec<RoomEvent>,
    /// Pagination token for older timeline events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
    /// Whether the timeline was truncated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limited: Option<bool>,
    /// Stripped state when the user is invited
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invite_state: Vec<StrippedStateEvent>,
    /// Stripped state when the user is knocking
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knock_state: Vec<StrippedStateEvent>,
    /// Direct-message flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_dm: Option<bool>,
    /// Encryption flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    /// Unread notification count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_count: Option<u64>,
    /// Unread highlight count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_count: Option<u64>,
}

impl RoomPayload {
    /// The newest timeline event by server timestamp.
    ///
    /// On equal timestamps the event delivered first wins, since delivery
    /// is newest-first.
    pub fn newest_event(&self) -> Option<&RoomEvent> {
        self.timeline
            .iter()
            .rev()
            .max_by_key(|event| event.origin_server_ts)
    }

    /// Timeline events ordered oldest-first by server timestamp.
    ///
    /// Events sharing a timestamp keep their relative chronological order
    /// (reverse of delivery order).
    pub fn timeline_oldest_first(&self) -> Vec<&RoomEvent> {
        let mut events: Vec<&RoomEvent> = self.timeline.iter().rev().collect();
        events.sort_by_key(|event| event.origin_server_ts);
        events
    }

    /// Whether invite state is present.
    pub fn has_invite_state(&self) -> bool {
        !self.invite_state.is_empty()
    }

    /// Whether knock state is present.
    pub fn has_knock_state(&self) -> bool {
        !self.knock_state.is_empty()
    }
}
