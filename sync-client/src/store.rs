//! Room store abstraction.
//!
//! The engine does not own rooms. Everything it learns about a room is
//! pushed into a [`RoomStore`] supplied by the application, which owns the
//! room objects, membership, and event application.
//!
//! [`MemoryRoomStore`] is an in-memory implementation that records every
//! call. It suits tests and embedders without their own persistence.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use sync_types::{ExtensionPayload, RoomEvent, RoomPayload};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store-specific failure.
    #[error("store error: {0}")]
    Backend(String),
}

/// The user's relationship to a room, as far as the engine can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Membership {
    /// Member of the room.
    Joined,
    /// Invited (the payload carried invite state).
    Invited,
    /// Knocking (the payload carried knock state).
    Knocking,
}

impl Membership {
    /// Classify a room payload.
    pub fn of(payload: &RoomPayload) -> Self {
        if payload.has_invite_state() {
            Self::Invited
        } else if payload.has_knock_state() {
            Self::Knocking
        } else {
            Self::Joined
        }
    }
}

/// What the engine needs to read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    /// Room ID.
    pub room_id: String,
    /// Current membership.
    pub membership: Membership,
    /// Event the store considers the newest in the room.
    pub most_recent_event: Option<RoomEvent>,
}

/// Room storage consumed by the engine.
///
/// Calls are made from the sync loop while it processes a response; an
/// error aborts that response and the loop retries later.
pub trait RoomStore: Send + Sync {
    /// Look up a room.
    fn get_room(&self, room_id: &str) -> Option<RoomRecord>;

    /// Create a room, or update the membership of an existing one.
    fn create_room(&self, room_id: &str, membership: Membership) -> Result<(), StoreError>;

    /// Insert or replace one state entry.
    fn apply_state_upsert(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: &Value,
        sender: &str,
    ) -> Result<(), StoreError>;

    /// Append a timeline event. Called at most once per event ID.
    fn append_timeline_event(&self, room_id: &str, event: &RoomEvent) -> Result<(), StoreError>;

    /// Record the room's newest event.
    fn set_most_recent_event(&self, room_id: &str, event: &RoomEvent) -> Result<(), StoreError>;

    /// Persist the room's summary fields.
    fn persist_room_snapshot(&self, room_id: &str, payload: &RoomPayload) -> Result<(), StoreError>;

    /// Accept one unit of extension data.
    fn apply_extension(&self, payload: &ExtensionPayload) -> Result<(), StoreError>;
}

/// One state entry held by [`MemoryRoomStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    /// Event content.
    pub content: Value,
    /// Sender user ID.
    pub sender: String,
}

/// A room held by [`MemoryRoomStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRoom {
    /// Current membership.
    pub membership: Membership,
    /// State keyed by `(type, state_key)`.
    pub state: BTreeMap<(String, String), StateEntry>,
    /// Timeline in append order.
    pub timeline: Vec<RoomEvent>,
    /// Newest event.
    pub most_recent_event: Option<RoomEvent>,
    /// Last persisted summary.
    pub snapshot: Option<RoomPayload>,
    /// Number of summary writes.
    pub snapshot_writes: usize,
}

impl MemoryRoom {
    fn new(membership: Membership) -> Self {
        Self {
            membership,
            state: BTreeMap::new(),
            timeline: Vec::new(),
            most_recent_event: None,
            snapshot: None,
            snapshot_writes: 0,
        }
    }
}

/// In-memory [`RoomStore`]. Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MemoryRoomStore {
    inner: Arc<Mutex<MemoryRoomStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryRoomStoreInner {
    rooms: HashMap<String, MemoryRoom>,
    extensions: Vec<ExtensionPayload>,
    /// Writes to let through before failing, and the error to fail with.
    pending_failure: Option<(usize, String)>,
}

impl MemoryRoomStoreInner {
    fn check_failure(&mut self) -> Result<(), StoreError> {
        match self.pending_failure.take() {
            Some((0, error)) => Err(StoreError::Backend(error)),
            Some((remaining, error)) => {
                self.pending_failure = Some((remaining - 1, error));
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn room_mut(&mut self, room_id: &str) -> Result<&mut MemoryRoom, StoreError> {
        self.rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::Backend(format!("unknown room {room_id}")))
    }
}

impl MemoryRoomStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryRoomStoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of a stored room.
    pub fn room(&self, room_id: &str) -> Option<MemoryRoom> {
        self.lock().rooms.get(room_id).cloned()
    }

    /// IDs of all stored rooms, sorted.
    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().rooms.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Event IDs of a room's timeline, in append order.
    pub fn timeline_ids(&self, room_id: &str) -> Vec<String> {
        self.lock()
            .rooms
            .get(room_id)
            .map(|room| room.timeline.iter().map(|e| e.event_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Every extension payload received, in order.
    pub fn extensions(&self) -> Vec<ExtensionPayload> {
        self.lock().extensions.clone()
    }

    /// Cause the next write to fail with the given error.
    pub fn fail_next_write(&self, error: &str) {
        self.fail_write_after(0, error);
    }

    /// Let `successful` writes through, then fail the one after with `error`.
    pub fn fail_write_after(&self, successful: usize, error: &str) {
        self.lock().pending_failure = Some((successful, error.to_string()));
    }
}

impl RoomStore for MemoryRoomStore {
    fn get_room(&self, room_id: &str) -> Option<RoomRecord> {
        self.lock().rooms.get(room_id).map(|room| RoomRecord {
            room_id: room_id.to_string(),
            membership: room.membership,
            most_recent_event: room.most_recent_event.clone(),
        })
    }

    fn create_room(&self, room_id: &str, membership: Membership) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_failure()?;
        inner
            .rooms
            .entry(room_id.to_string())
            .and_modify(|room| room.membership = membership)
            .or_insert_with(|| MemoryRoom::new(membership));
        Ok(())
    }

    fn apply_state_upsert(
        &self,
        room_id: &str,
        event_type: &str,
        state_key: &str,
        content: &Value,
        sender: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_failure()?;
        inner.room_mut(room_id)?.state.insert(
            (event_type.to_string(), state_key.to_string()),
            StateEntry {
                content: content.clone(),
                sender: sender.to_string(),
            },
        );
        Ok(())
    }

    fn append_timeline_event(&self, room_id: &str, event: &RoomEvent) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_failure()?;
        inner.room_mut(room_id)?.timeline.push(event.clone());
        Ok(())
    }

    fn set_most_recent_event(&self, room_id: &str, event: &RoomEvent) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_failure()?;
        inner.room_mut(room_id)?.most_recent_event = Some(event.clone());
        Ok(())
    }

    fn persist_room_snapshot(&self, room_id: &str, payload: &RoomPayload) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_failure()?;
        let room = inner.room_mut(room_id)?;
        room.snapshot = Some(payload.clone());
        room.snapshot_writes += 1;
        Ok(())
    }

    fn apply_extension(&self, payload: &ExtensionPayload) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.check_failure()?;
        inner.extensions.push(payload.clone());
        Ok(())
    }
}
