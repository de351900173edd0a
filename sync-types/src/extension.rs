//! Protocol extensions: auxiliary data channels layered on the base protocol.
//!
//! Extension data is not reconciled by the engine. It is split into
//! [`ExtensionPayload`] values and handed to the room store unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The extension categories defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionKind {
    /// Device-to-device messages
    ToDevice,
    /// One-time key counts and device list changes
    E2ee,
    /// Global and per-room account data
    AccountData,
    /// Read receipts
    Receipts,
    /// Typing notifications
    Typing,
    /// Presence updates
    Presence,
}

impl ExtensionKind {
    /// Every extension category, in wire order.
    pub const ALL: [ExtensionKind; 6] = [
        ExtensionKind::ToDevice,
        ExtensionKind::E2ee,
        ExtensionKind::AccountData,
        ExtensionKind::Receipts,
        ExtensionKind::Typing,
        ExtensionKind::Presence,
    ];
}

/// Request toggle for one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionToggle {
    /// Whether the extension is enabled
    pub enabled: bool,
    /// Resume token for extensions with their own stream position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

impl ExtensionToggle {
    /// An enabled extension without a resume token.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            since: None,
        }
    }

    /// An enabled extension resuming from `since`.
    pub fn enabled_since(since: Option<String>) -> Self {
        Self {
            enabled: true,
            since,
        }
    }
}

/// Extension toggles sent with a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionsRequest {
    /// To-device messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_device: Option<ExtensionToggle>,
    /// E2EE key counts and device lists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2ee: Option<ExtensionToggle>,
    /// Account data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_data: Option<ExtensionToggle>,
    /// Read receipts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipts: Option<ExtensionToggle>,
    /// Typing notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing: Option<ExtensionToggle>,
    /// Presence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<ExtensionToggle>,
}

impl ExtensionsRequest {
    /// Enable the given categories. `to_device_since` resumes the to-device stream.
    pub fn for_kinds<'a>(
        kinds: impl IntoIterator<Item = &'a ExtensionKind>,
        to_device_since: Option<String>,
    ) -> Self {
        let mut request = Self::default();
        for kind in kinds {
            match kind {
                ExtensionKind::ToDevice => {
                    request.to_device = Some(ExtensionToggle::enabled_since(to_device_since.clone()))
                }
                ExtensionKind::E2ee => request.e2ee = Some(ExtensionToggle::enabled()),
                ExtensionKind::AccountData => {
                    request.account_data = Some(ExtensionToggle::enabled())
                }
                ExtensionKind::Receipts => request.receipts = Some(ExtensionToggle::enabled()),
                ExtensionKind::Typing => request.typing = Some(ExtensionToggle::enabled()),
                ExtensionKind::Presence => request.presence = Some(ExtensionToggle::enabled()),
            }
        }
        request
    }
}

/// To-device extension response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToDeviceResponse {
    /// Token to send as `since` next time
    pub next_batch: String,
    /// Raw to-device events
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Users whose device lists changed or who no longer share a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLists {
    /// Users whose devices changed
    #[serde(default)]
    pub changed: Vec<String>,
    /// Users no longer sharing an encrypted room
    #[serde(default)]
    pub left: Vec<String>,
}

/// E2EE extension response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct E2eeResponse {
    /// Remaining one-time keys per algorithm
    #[serde(default)]
    pub device_one_time_keys_count: BTreeMap<String, u64>,
    /// Device list changes
    #[serde(default)]
    pub device_lists: DeviceLists,
    /// Algorithms with an unused fallback key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_unused_fallback_key_types: Option<Vec<String>>,
}

/// Account data extension response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountDataResponse {
    /// Global account data events
    #[serde(default)]
    pub global: Vec<Value>,
    /// Per-room account data events
    #[serde(default)]
    pub rooms: BTreeMap<String, Vec<Value>>,
}

/// Receipts or typing extension response: one ephemeral event per room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomEduResponse {
    /// Ephemeral event content per room
    #[serde(default)]
    pub rooms: BTreeMap<String, Value>,
}

/// Presence extension response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceResponse {
    /// Presence events
    #[serde(default)]
    pub events: Vec<Value>,
}

/// Extension payloads in a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionsResponse {
    /// To-device messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_device: Option<ToDeviceResponse>,
    /// E2EE data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e2ee: Option<E2eeResponse>,
    /// Account data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_data: Option<AccountDataResponse>,
    /// Read receipts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipts: Option<RoomEduResponse>,
    /// Typing notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typing: Option<RoomEduResponse>,
    /// Presence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceResponse>,
}

impl ExtensionsResponse {
    /// Whether no extension sent anything.
    pub fn is_empty(&self) -> bool {
        self.to_device.is_none()
            && self.e2ee.is_none()
            && self.account_data.is_none()
            && self.receipts.is_none()
            && self.typing.is_none()
            && self.presence.is_none()
    }

    /// Split into store-ready payloads.
    ///
    /// Categories come out in [`ExtensionKind::ALL`] order; within a
    /// category the server's order is preserved.
    pub fn payloads(&self) -> Vec<ExtensionPayload> {
        let mut out = Vec::new();

        if let Some(to_device) = &self.to_device {
            if !to_device.events.is_empty() {
                out.push(ExtensionPayload::ToDevice {
                    events: to_device.events.clone(),
                });
            }
        }
        if let Some(e2ee) = &self.e2ee {
            out.push(ExtensionPayload::E2ee(e2ee.clone()));
        }
        if let Some(account_data) = &self.account_data {
            if !account_data.global.is_empty() {
                out.push(ExtensionPayload::GlobalAccountData {
                    events: account_data.global.clone(),
                });
            }
            for (room_id, events) in &account_data.rooms {
                out.push(ExtensionPayload::RoomAccountData {
                    room_id: room_id.clone(),
                    events: events.clone(),
                });
            }
        }
        if let Some(receipts) = &self.receipts {
            for (room_id, content) in &receipts.rooms {
                out.push(ExtensionPayload::Receipts {
                    room_id: room_id.clone(),
                    content: content.clone(),
                });
            }
        }
        if let Some(typing) = &self.typing {
            for (room_id, content) in &typing.rooms {
                out.push(ExtensionPayload::Typing {
                    room_id: room_id.clone(),
                    content: content.clone(),
                });
            }
        }
        if let Some(presence) = &self.presence {
            if !presence.events.is_empty() {
                out.push(ExtensionPayload::Presence {
                    events: presence.events.clone(),
                });
            }
        }

        out
    }
}

/// One unit of extension data for the room store.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionPayload {
    /// To-device events
    ToDevice {
        /// Raw events
        events: Vec<Value>,
    },
    /// Key counts and device list changes
    E2ee(E2eeResponse),
    /// Global account data
    GlobalAccountData {
        /// Raw events
        events: Vec<Value>,
    },
    /// Account data for one room
    RoomAccountData {
        /// Room ID
        room_id: String,
        /// Raw events
        events: Vec<Value>,
    },
    /// Receipt event for one room
    Receipts {
        /// Room ID
        room_id: String,
        /// Receipt event
        content: Value,
    },
    /// Typing event for one room
    Typing {
        /// Room ID
        room_id: String,
        /// Typing event
        content: Value,
    },
    /// Presence events
    Presence {
        /// Raw events
        events: Vec<Value>,
    },
}

impl ExtensionPayload {
    /// The category this payload belongs to.
    pub fn kind(&self) -> ExtensionKind {
        match self {
            Self::ToDevice { .. } => ExtensionKind::ToDevice,
            Self::E2ee(_) => ExtensionKind::E2ee,
            Self::GlobalAccountData { .. } | Self::RoomAccountData { .. } => {
                ExtensionKind::AccountData
            }
            Self::Receipts { .. } => ExtensionKind::Receipts,
            Self::Typing { .. } => ExtensionKind::Typing,
            Self::Presence { .. } => ExtensionKind::Presence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn for_kinds_enables_only_requested() {
        let request = ExtensionsRequest::for_kinds(
            &[ExtensionKind::ToDevice, ExtensionKind::Typing],
            Some("since-1".into()),
        );

        assert_eq!(
            request.to_device,
            Some(ExtensionToggle::enabled_since(Some("since-1".into())))
        );
        assert_eq!(request.typing, Some(ExtensionToggle::enabled()));
        assert!(request.e2ee.is_none());
        assert!(request.presence.is_none());
    }

    #[test]
    fn payloads_keep_category_and_event_order() {
        let response: ExtensionsResponse = serde_json::from_value(json!({
            "presence": { "events": [{ "n": 1 }, { "n": 2 }] },
            "to_device": { "next_batch": "t2", "events": [{ "n": "a" }, { "n": "b" }] },
            "account_data": {
                "global": [{ "type": "m.push_rules" }],
                "rooms": { "!r": [{ "type": "m.tag" }] }
            },
            "typing": { "rooms": { "!r": { "user_ids": ["@a"] } } }
        }))
        .unwrap();

        let kinds: Vec<_> = response.payloads().iter().map(|p| p.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ExtensionKind::ToDevice,
                ExtensionKind::AccountData,
                ExtensionKind::AccountData,
                ExtensionKind::Typing,
                ExtensionKind::Presence,
            ]
        );

        match &response.payloads()[0] {
            ExtensionPayload::ToDevice { events } => {
                assert_eq!(events, &vec![json!({ "n": "a" }), json!({ "n": "b" })]);
            }
            other => panic!("Expected ToDevice, got {:?}", other),
        }
    }

    #[test]
    fn empty_to_device_batch_yields_no_payload() {
        let response = ExtensionsResponse {
            to_device: Some(ToDeviceResponse {
                next_batch: "t9".into(),
                events: vec![],
            }),
            ..ExtensionsResponse::default()
        };

        assert!(!response.is_empty());
        assert!(response.payloads().is_empty());
    }
}
