//! Request side of a sync round trip.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ExtensionsRequest, ListRange, WireError};

/// A `[event_type, state_key]` pair selecting room state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKeyPair(pub String, pub String);

impl StateKeyPair {
    /// Create a pair from an event type and state key.
    pub fn new(event_type: impl Into<String>, state_key: impl Into<String>) -> Self {
        Self(event_type.into(), state_key.into())
    }
}

/// Which state events the server should include with each room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredState {
    /// State to include
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<StateKeyPair>,
    /// State to exclude from an otherwise wildcard include
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<StateKeyPair>,
}

impl RequiredState {
    /// Require the given `(type, state_key)` pairs.
    pub fn including<I, T, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (T, K)>,
        T: Into<String>,
        K: Into<String>,
    {
        Self {
            include: pairs
                .into_iter()
                .map(|(t, k)| StateKeyPair::new(t, k))
                .collect(),
            exclude: Vec::new(),
        }
    }
}

/// Server-side filters narrowing which rooms a list contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilters {
    /// Only direct-message rooms (or only non-DM rooms when false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_dm: Option<bool>,
    /// Only encrypted rooms (or only unencrypted when false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_encrypted: Option<bool>,
    /// Only rooms the user is invited to (or excluding them when false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_invite: Option<bool>,
    /// Only rooms of these creation types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub room_types: Vec<String>,
    /// Exclude rooms of these creation types
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_room_types: Vec<String>,
    /// Only rooms inside these spaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spaces: Vec<String>,
}

/// Per-list parameters sent on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    /// Windows of the list the client wants populated
    pub ranges: Vec<ListRange>,
    /// Maximum timeline events per room
    pub timeline_limit: u32,
    /// State events to include per room
    pub required_state: RequiredState,
    /// Optional room filters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<ListFilters>,
    /// Whether to include room heroes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_heroes: Option<bool>,
}

/// Explicit per-room subscription, independent of list membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSubscription {
    /// Maximum timeline events for this room
    pub timeline_limit: u32,
    /// State events to include
    pub required_state: RequiredState,
    /// Whether to include room heroes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_heroes: Option<bool>,
}

impl RoomSubscription {
    /// Create a subscription with the given timeline depth.
    pub fn new(timeline_limit: u32) -> Self {
        Self {
            timeline_limit,
            ..Self::default()
        }
    }

    /// Set the required state.
    pub fn with_required_state(mut self, required_state: RequiredState) -> Self {
        self.required_state = required_state;
        self
    }

    /// Set whether heroes are included.
    pub fn with_include_heroes(mut self, include: bool) -> Self {
        self.include_heroes = Some(include);
        self
    }
}

/// One long-poll request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Continuation token from the previous response (absent on a fresh session)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<String>,
    /// Long-poll timeout in milliseconds
    pub timeout: u64,
    /// Presence state to set while syncing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_presence: Option<String>,
    /// Named room lists
    #[serde(default)]
    pub lists: BTreeMap<String, ListRequest>,
    /// Active room subscriptions, resent every cycle
    #[serde(default)]
    pub room_subscriptions: BTreeMap<String, RoomSubscription>,
    /// Extension toggles
    #[serde(default)]
    pub extensions: ExtensionsRequest,
}

impl SyncRequest {
    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Deserialization)
    }
}
