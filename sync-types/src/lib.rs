//! # sync-types
//!
//! Wire format types for the slidesync sliding-window sync protocol.
//!
//! This crate provides the foundational types used across all slidesync crates:
//! - [`ListRange`] - Inclusive index windows over a room list
//! - [`SyncRequest`] / [`SyncResponse`] - One long-poll round trip
//! - [`ListOp`] - Server instructions mutating a list's room sequence
//! - [`RoomPayload`], [`RoomEvent`] - Per-room data delivered by the server
//! - [`ExtensionPayload`] - Auxiliary channels forwarded to the room store
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod extension;
mod range;
mod request;
mod response;

pub use error::WireError;
pub use event::{Hero, RoomEvent, RoomPayload, StrippedStateEvent};
pub use extension::{
    AccountDataResponse, DeviceLists, E2eeResponse, ExtensionKind, ExtensionPayload,
    ExtensionToggle, ExtensionsRequest, ExtensionsResponse, PresenceResponse, RoomEduResponse,
    ToDeviceResponse,
};
pub use range::ListRange;
pub use request::{
    ListFilters, ListRequest, RequiredState, RoomSubscription, StateKeyPair, SyncRequest,
};
pub use response::{ListOp, ListResponse, SyncResponse};
