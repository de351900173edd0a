//! Response side of a sync round trip.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ExtensionsResponse, ListRange, RoomPayload, WireError};

/// A server instruction mutating one list's room sequence.
///
/// The operation set is fixed by the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum ListOp {
    /// Authoritative replacement of the slots in `range`
    Sync {
        /// Window being replaced
        range: ListRange,
        /// Room IDs for the window, in order
        #[serde(default)]
        room_ids: Vec<String>,
    },
    /// Insert (or move) a room at `index`
    Insert {
        /// Target position
        index: usize,
        /// Room being inserted
        room_id: String,
    },
    /// Remove the room at `index`
    Delete {
        /// Position to remove
        index: usize,
    },
    /// Forget the slots in `range`
    Invalidate {
        /// Window being invalidated
        range: ListRange,
    },
}

/// Per-list section of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    /// Authoritative total number of rooms matching the list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Operations to apply in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<ListOp>,
}

/// One long-poll response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Continuation token to echo on the next request
    pub pos: String,
    /// Updated lists, keyed by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub lists: BTreeMap<String, ListResponse>,
    /// Room payloads, keyed by room ID
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rooms: BTreeMap<String, RoomPayload>,
    /// Extension payloads
    #[serde(default)]
    pub extensions: ExtensionsResponse,
}

impl SyncResponse {
    /// A response carrying only a new position token.
    pub fn empty(pos: impl Into<String>) -> Self {
        Self {
            pos: pos.into(),
            ..Self::default()
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from JSON bytes.
    ///
    /// Rejects operations whose ranges run backwards.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WireError> {
        let response: Self = serde_json::from_slice(bytes).map_err(WireError::Deserialization)?;
        response.validate()?;
        Ok(response)
    }

    fn validate(&self) -> Result<(), WireError> {
        for (name, list) in &self.lists {
            for op in &list.ops {
                let range = match op {
                    ListOp::Sync { range, .. } | ListOp::Invalidate { range } => range,
                    ListOp::Insert { .. } | ListOp::Delete { .. } => continue,
                };
                if !range.is_valid() {
                    return Err(WireError::InvalidData(format!(
                        "list {name}: range {range:?} ends before it starts"
                    )));
                }
            }
        }
        Ok(())
    }
}
