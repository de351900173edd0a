//! Response reconciliation.
//!
//! Turns one parsed [`SyncResponse`] into list mutations, room store writes,
//! and a [`SyncUpdate`] describing what actually changed. Rooms the server
//! re-sends without anything new are absorbed silently.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use sync_core::RoomList;
use sync_types::{RoomEvent, RoomPayload, SyncResponse};

use crate::store::{Membership, RoomStore, StoreError};

/// What one response changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncUpdate {
    /// Position token of the response.
    pub pos: String,
    /// Lists whose room sequence changed.
    pub lists: BTreeSet<String>,
    /// Rooms merged into the store.
    pub rooms: BTreeSet<String>,
    /// Subset of `rooms` delivered for the first time.
    pub initial_rooms: BTreeSet<String>,
}

impl SyncUpdate {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty() && self.rooms.is_empty()
    }
}

/// Per-session memory used to tell new data from re-deliveries.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    seen_rooms: HashSet<String>,
    seen_events: HashMap<String, HashSet<String>>,
    latest_event: HashMap<String, String>,
    /// Rooms written by a failed apply, keyed to whether they were initial.
    unreported: BTreeMap<String, bool>,
}

impl Reconciler {
    /// Create an empty reconciler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `room_id` has been processed this session.
    pub fn has_seen_room(&self, room_id: &str) -> bool {
        self.seen_rooms.contains(room_id)
    }

    /// Whether `event_id` has been forwarded to the store for `room_id`.
    pub fn has_seen_event(&self, room_id: &str, event_id: &str) -> bool {
        self.seen_events
            .get(room_id)
            .map_or(false, |events| events.contains(event_id))
    }

    /// Forget a room so its next delivery is treated as initial.
    pub fn forget_room(&mut self, room_id: &str) {
        self.seen_rooms.remove(room_id);
        self.seen_events.remove(room_id);
        self.latest_event.remove(room_id);
        self.unreported.remove(room_id);
    }

    /// Forget everything (session reset).
    pub fn clear(&mut self) {
        self.seen_rooms.clear();
        self.seen_events.clear();
        self.latest_event.clear();
        self.unreported.clear();
    }

    /// Apply a response to `lists` and `store`.
    ///
    /// Lists named in the response but not registered locally are skipped.
    /// Extension payloads are forwarded unconditionally.
    pub fn apply<S>(
        &mut self,
        response: &SyncResponse,
        lists: &mut BTreeMap<String, RoomList>,
        store: &S,
    ) -> Result<SyncUpdate, StoreError>
    where
        S: RoomStore + ?Sized,
    {
        let mut update = SyncUpdate {
            pos: response.pos.clone(),
            ..SyncUpdate::default()
        };

        for (name, list_response) in &response.lists {
            match lists.get_mut(name) {
                Some(list) => {
                    if list.apply_response(list_response) {
                        update.lists.insert(name.clone());
                    }
                }
                None => tracing::debug!(list = %name, "Ignoring response for unknown list"),
            }
        }

        // Room marks only take effect once the whole response is stored
        let mut seen = Vec::new();
        let mut latest = Vec::new();

        for (room_id, payload) in &response.rooms {
            let initial = payload.initial && !self.seen_rooms.contains(room_id);
            let new_content = self.has_new_timeline_content(room_id, payload);

            if initial || new_content || payload.has_invite_state() {
                update.rooms.insert(room_id.clone());
                if initial {
                    update.initial_rooms.insert(room_id.clone());
                }
                if let Err(e) = self.merge_room(room_id, payload, store) {
                    self.defer(&update);
                    return Err(e);
                }
            }

            seen.push(room_id.clone());
            if let Some(newest) = payload.newest_event() {
                latest.push((room_id.clone(), newest.event_id.clone()));
            }
        }

        for extension in response.extensions.payloads() {
            if let Err(e) = store.apply_extension(&extension) {
                self.defer(&update);
                return Err(e);
            }
        }

        self.seen_rooms.extend(seen);
        self.latest_event.extend(latest);
        for (room_id, initial) in std::mem::take(&mut self.unreported) {
            if initial {
                update.initial_rooms.insert(room_id.clone());
            }
            update.rooms.insert(room_id);
        }

        tracing::debug!(
            pos = %update.pos,
            lists = update.lists.len(),
            rooms = update.rooms.len(),
            initial = update.initial_rooms.len(),
            "Reconciled response"
        );
        Ok(update)
    }

    /// Remember rooms a failed apply already wrote so the next successful
    /// apply surfaces them, even if their events are now marked seen.
    fn defer(&mut self, update: &SyncUpdate) {
        for room_id in &update.rooms {
            let initial = update.initial_rooms.contains(room_id);
            *self.unreported.entry(room_id.clone()).or_insert(false) |= initial;
        }
    }

    /// Newest event differs from the one remembered and was never forwarded.
    fn has_new_timeline_content(&self, room_id: &str, payload: &RoomPayload) -> bool {
        match payload.newest_event() {
            Some(newest) => {
                self.latest_event.get(room_id) != Some(&newest.event_id)
                    && !self.has_seen_event(room_id, &newest.event_id)
            }
            None => false,
        }
    }

    fn merge_room<S>(
        &mut self,
        room_id: &str,
        payload: &RoomPayload,
        store: &S,
    ) -> Result<(), StoreError>
    where
        S: RoomStore + ?Sized,
    {
        store.create_room(room_id, Membership::of(payload))?;

        for event in &payload.required_state {
            if let Some(state_key) = &event.state_key {
                store.apply_state_upsert(
                    room_id,
                    &event.event_type,
                    state_key,
                    &event.content,
                    &event.sender,
                )?;
            }
        }
        for stripped in payload.invite_state.iter().chain(&payload.knock_state) {
            store.apply_state_upsert(
                room_id,
                &stripped.event_type,
                &stripped.state_key,
                &stripped.content,
                &stripped.sender,
            )?;
        }

        for event in payload.timeline_oldest_first() {
            if self.has_seen_event(room_id, &event.event_id) {
                continue;
            }
            if let Some(state_key) = &event.state_key {
                store.apply_state_upsert(
                    room_id,
                    &event.event_type,
                    state_key,
                    &event.content,
                    &event.sender,
                )?;
            }
            store.append_timeline_event(room_id, event)?;
            self.seen_events
                .entry(room_id.to_string())
                .or_default()
                .insert(event.event_id.clone());
        }

        if let Some(candidate) = payload.newest_event() {
            let current = store
                .get_room(room_id)
                .and_then(|record| record.most_recent_event);
            if replaces_most_recent(current.as_ref(), candidate) {
                store.set_most_recent_event(room_id, candidate)?;
            }
        }

        store.persist_room_snapshot(room_id, payload)
    }
}

/// A fetched event only replaces the stored newest event if it is strictly newer.
fn replaces_most_recent(current: Option<&RoomEvent>, candidate: &RoomEvent) -> bool {
    match current {
        Some(current) => {
            current.event_id != candidate.event_id
                && candidate.origin_server_ts > current.origin_server_ts
        }
        None => true,
    }
}
