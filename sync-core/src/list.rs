//! Room list state.
//!
//! A [`RoomList`] owns one named list's sparse room-ID sequence, its total
//! count and loading state, and the ranges it will request next. Server
//! operations are applied here; nothing in this module performs I/O.
//!
//! ## Loading states
//!
//! ```text
//! NotLoaded ──(data)──▶ PartiallyLoaded ◀──▶ FullyLoaded
//!                           ▲
//! Preloaded ──(SYNC)────────┘   (cache restore only; also left on reset)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use sync_types::{ListFilters, ListOp, ListRange, ListRequest, ListResponse, RequiredState};
use thiserror::Error;

use crate::range::{plan, ranges_are_well_formed, SyncMode};

/// Longest accepted list name, in bytes.
pub const MAX_LIST_NAME_LEN: usize = 64;

/// Most entries accepted in `required_state.include` or `.exclude`.
pub const MAX_REQUIRED_STATE_ENTRIES: usize = 100;

/// Default number of rooms added per `load_more`.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default timeline depth for list rooms (enough for a preview line).
pub const DEFAULT_TIMELINE_LIMIT: u32 = 1;

/// Configuration errors for lists and room subscriptions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListError {
    /// List name is empty.
    #[error("list name must not be empty")]
    EmptyName,

    /// List name exceeds [`MAX_LIST_NAME_LEN`] bytes.
    #[error("list name is {len} bytes (max {max})")]
    NameTooLong {
        /// Actual length in bytes.
        len: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// A required-state section has too many entries.
    #[error("required_state.{section} has {len} entries (max {max})")]
    RequiredStateTooLarge {
        /// `include` or `exclude`.
        section: &'static str,
        /// Actual number of entries.
        len: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Batch size of zero.
    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    /// Ranges are inverted, overlapping, or out of order.
    #[error("ranges must be ascending and non-overlapping: {0:?}")]
    InvalidRanges(Vec<ListRange>),
}

/// Check required state against the protocol limits.
pub fn validate_required_state(required_state: &RequiredState) -> Result<(), ListError> {
    for (section, len) in [
        ("include", required_state.include.len()),
        ("exclude", required_state.exclude.len()),
    ] {
        if len > MAX_REQUIRED_STATE_ENTRIES {
            return Err(ListError::RequiredStateTooLarge {
                section,
                len,
                max: MAX_REQUIRED_STATE_ENTRIES,
            });
        }
    }
    Ok(())
}

/// How much of a list is held locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadingState {
    /// Nothing received yet.
    NotLoaded,
    /// Restored from cache; not yet confirmed by the server.
    Preloaded,
    /// Some rooms held, more exist or slots were invalidated.
    PartiallyLoaded,
    /// Every room the list covers is held.
    FullyLoaded,
}

/// Loading state as a function of the held sequence, count, and mode.
///
/// Fully loaded when selective with any room present, or when the count is
/// known and met; partially loaded when anything is present.
pub fn compute_loading_state(
    room_ids: &[Option<String>],
    total_count: Option<usize>,
    mode: SyncMode,
) -> LoadingState {
    let loaded = room_ids.iter().flatten().count();

    let complete = total_count.map_or(false, |total| loaded >= total);
    if (mode == SyncMode::Selective && loaded > 0) || complete {
        LoadingState::FullyLoaded
    } else if loaded > 0 {
        LoadingState::PartiallyLoaded
    } else {
        LoadingState::NotLoaded
    }
}

/// Parameters for a room list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListConfig {
    /// List name (unique per engine)
    pub name: String,
    /// Initial sync mode
    pub mode: SyncMode,
    /// Rooms added per `load_more`
    pub batch_size: usize,
    /// Optional cap on the highest index requested
    pub max_rooms: Option<usize>,
    /// Timeline events per room
    pub timeline_limit: u32,
    /// State events per room
    pub required_state: RequiredState,
    /// Server-side room filters
    pub filters: Option<ListFilters>,
    /// Whether to request heroes
    pub include_heroes: Option<bool>,
    /// Initial ranges for selective mode
    pub ranges: Vec<ListRange>,
}

impl ListConfig {
    /// Create a config with default batch size and timeline depth.
    pub fn new(name: impl Into<String>, mode: SyncMode) -> Self {
        Self {
            name: name.into(),
            mode,
            batch_size: DEFAULT_BATCH_SIZE,
            max_rooms: None,
            timeline_limit: DEFAULT_TIMELINE_LIMIT,
            required_state: RequiredState::default(),
            filters: None,
            include_heroes: None,
            ranges: Vec::new(),
        }
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Cap the list at `max_rooms` entries.
    pub fn with_max_rooms(mut self, max_rooms: usize) -> Self {
        self.max_rooms = Some(max_rooms);
        self
    }

    /// Set the timeline depth.
    pub fn with_timeline_limit(mut self, timeline_limit: u32) -> Self {
        self.timeline_limit = timeline_limit;
        self
    }

    /// Set the required state.
    pub fn with_required_state(mut self, required_state: RequiredState) -> Self {
        self.required_state = required_state;
        self
    }

    /// Set the room filters.
    pub fn with_filters(mut self, filters: ListFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Set whether heroes are requested.
    pub fn with_include_heroes(mut self, include: bool) -> Self {
        self.include_heroes = Some(include);
        self
    }

    /// Set the ranges used in selective mode.
    pub fn with_ranges(mut self, ranges: Vec<ListRange>) -> Self {
        self.ranges = ranges;
        self
    }

    /// Check the config against the protocol limits.
    pub fn validate(&self) -> Result<(), ListError> {
        if self.name.is_empty() {
            return Err(ListError::EmptyName);
        }
        if self.name.len() > MAX_LIST_NAME_LEN {
            return Err(ListError::NameTooLong {
                len: self.name.len(),
                max: MAX_LIST_NAME_LEN,
            });
        }
        if self.batch_size == 0 {
            return Err(ListError::ZeroBatchSize);
        }
        validate_required_state(&self.required_state)?;
        if !ranges_are_well_formed(&self.ranges) {
            return Err(ListError::InvalidRanges(self.ranges.clone()));
        }
        Ok(())
    }

    fn initial_ranges(&self) -> Vec<ListRange> {
        plan(
            self.mode,
            &self.ranges,
            self.batch_size,
            0,
            self.max_rooms,
        )
    }
}

/// Persisted view of one list, used for cold-start recovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSnapshot {
    /// Sparse room-ID sequence (`null` for empty slots)
    pub room_ids: Vec<Option<String>>,
    /// Total count at the time of the snapshot
    pub total_count: Option<usize>,
    /// Ranges in effect at the time of the snapshot
    pub ranges: Vec<ListRange>,
}

impl ListSnapshot {
    /// Number of non-empty slots.
    pub fn loaded_count(&self) -> usize {
        self.room_ids.iter().flatten().count()
    }
}

/// One named room list and its locally held window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomList {
    config: ListConfig,
    mode: SyncMode,
    ranges: Vec<ListRange>,
    page_start: usize,
    room_ids: Vec<Option<String>>,
    total_count: Option<usize>,
    loading_state: LoadingState,
}

impl RoomList {
    /// Create a list from a validated config.
    pub fn new(config: ListConfig) -> Result<Self, ListError> {
        config.validate()?;
        let ranges = config.initial_ranges();
        Ok(Self {
            mode: config.mode,
            ranges,
            page_start: 0,
            room_ids: Vec::new(),
            total_count: None,
            loading_state: LoadingState::NotLoaded,
            config,
        })
    }

    /// List name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration the list was created with.
    pub fn config(&self) -> &ListConfig {
        &self.config
    }

    /// Current sync mode (restore may switch it to selective).
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Ranges the next request will carry.
    pub fn ranges(&self) -> &[ListRange] {
        &self.ranges
    }

    /// Sparse room-ID sequence.
    pub fn room_ids(&self) -> &[Option<String>] {
        &self.room_ids
    }

    /// Non-empty room IDs in list order.
    pub fn loaded_room_ids(&self) -> impl Iterator<Item = &str> {
        self.room_ids.iter().flatten().map(String::as_str)
    }

    /// Number of non-empty slots.
    pub fn loaded_count(&self) -> usize {
        self.room_ids.iter().flatten().count()
    }

    /// Server's total count, if known.
    pub fn total_count(&self) -> Option<usize> {
        self.total_count
    }

    /// Current loading state.
    pub fn loading_state(&self) -> LoadingState {
        self.loading_state
    }

    /// Build this list's section of the next request.
    pub fn request(&self) -> ListRequest {
        ListRequest {
            ranges: self.ranges.clone(),
            timeline_limit: self.config.timeline_limit,
            required_state: self.config.required_state.clone(),
            filters: self.config.filters.clone(),
            include_heroes: self.config.include_heroes,
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Advance the window by one batch.
    ///
    /// Paging moves to the next page; growing extends the window from the
    /// current end. Selective lists do not move. Returns whether the ranges
    /// changed.
    pub fn load_more(&mut self) -> bool {
        let next = match self.mode {
            SyncMode::Selective => return false,
            SyncMode::Paging => {
                self.page_start = self.page_start.saturating_add(self.config.batch_size);
                plan(
                    SyncMode::Paging,
                    &self.ranges,
                    self.config.batch_size,
                    self.page_start,
                    self.config.max_rooms,
                )
            }
            SyncMode::Growing => plan(
                SyncMode::Growing,
                &self.ranges,
                self.config.batch_size,
                0,
                self.config.max_rooms,
            ),
        };

        let changed = next != self.ranges;
        self.ranges = next;
        changed
    }

    /// Replace the ranges and switch to selective mode.
    pub fn set_ranges(&mut self, ranges: Vec<ListRange>) -> Result<(), ListError> {
        if !ranges_are_well_formed(&ranges) {
            return Err(ListError::InvalidRanges(ranges));
        }
        self.mode = SyncMode::Selective;
        self.ranges = ranges;
        self.recompute();
        Ok(())
    }

    /// Drop all held data and return to the initial range plan.
    pub fn reset(&mut self) {
        self.mode = self.config.mode;
        self.ranges = self.config.initial_ranges();
        self.page_start = 0;
        self.room_ids.clear();
        self.total_count = None;
        self.loading_state = LoadingState::NotLoaded;
    }

    /// Persistable view of the list.
    pub fn snapshot(&self) -> ListSnapshot {
        ListSnapshot {
            room_ids: self.room_ids.clone(),
            total_count: self.total_count,
            ranges: self.ranges.clone(),
        }
    }

    /// Seed the list from a cached snapshot.
    ///
    /// Snapshots with no rooms are ignored. Otherwise the list enters
    /// `Preloaded` with the cached sequence, count, and ranges; a list that was
    /// fully loaded is frozen in selective mode. Returns whether anything was
    /// restored.
    pub fn restore(&mut self, snapshot: &ListSnapshot) -> bool {
        let loaded = snapshot.loaded_count();
        if loaded == 0 {
            return false;
        }

        self.room_ids = snapshot.room_ids.clone();
        self.total_count = snapshot.total_count;
        if !snapshot.ranges.is_empty() {
            self.ranges = snapshot.ranges.clone();
        }
        if let Some(last) = self.ranges.last() {
            self.page_start = last.start();
        }
        if snapshot.total_count.map_or(false, |total| loaded >= total) {
            self.mode = SyncMode::Selective;
        }
        self.loading_state = LoadingState::Preloaded;

        tracing::debug!(
            list = %self.config.name,
            loaded,
            total = ?self.total_count,
            mode = ?self.mode,
            "Restored list from cache"
        );
        true
    }

    // =========================================================================
    // Server operations
    // =========================================================================

    /// Apply one list section of a response: every op in order, then the count.
    ///
    /// Returns whether any op changed the room sequence. A count-only update
    /// is absorbed and reports no change.
    pub fn apply_response(&mut self, response: &ListResponse) -> bool {
        let mut changed = false;
        let mut invalidated = false;
        for op in &response.ops {
            changed |= self.apply_op_within(op, self.index_limit(response.count));
            invalidated |= matches!(op, ListOp::Invalidate { .. });
        }

        if let Some(count) = response.count {
            self.total_count = Some(count);
            if !invalidated {
                self.recompute();
            }
        }
        changed
    }

    /// Apply a single operation. Returns whether any slot changed.
    ///
    /// Positions past the known list size are ignored: a SYNC window is cut
    /// at the larger of the count and the requested window, and an INSERT
    /// beyond it is dropped.
    pub fn apply_op(&mut self, op: &ListOp) -> bool {
        self.apply_op_within(op, self.index_limit(None))
    }

    /// One past the highest position the server may address.
    fn index_limit(&self, count: Option<usize>) -> usize {
        let requested = self
            .ranges
            .iter()
            .filter(|range| range.is_valid())
            .map(|range| range.end().saturating_add(1))
            .max()
            .unwrap_or(0);
        [
            requested,
            self.room_ids.len(),
            self.total_count.unwrap_or(0),
            count.unwrap_or(0),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    fn apply_op_within(&mut self, op: &ListOp, limit: usize) -> bool {
        match op {
            ListOp::Sync { range, room_ids } => {
                let Some(range) = self.clamp_sync(*range, room_ids.len(), limit) else {
                    return false;
                };
                let changed = self.apply_sync(range, room_ids);
                self.loading_state =
                    compute_loading_state(&self.room_ids, self.total_count, self.mode);
                changed
            }
            ListOp::Insert { index, room_id } => {
                if *index > limit {
                    tracing::warn!(
                        list = %self.config.name,
                        index,
                        limit,
                        "Ignoring INSERT past the end of the list"
                    );
                    return false;
                }
                let changed = self.apply_insert(*index, room_id);
                self.recompute();
                changed
            }
            ListOp::Delete { index } => {
                let changed = self.apply_delete(*index);
                self.recompute();
                changed
            }
            ListOp::Invalidate { range } => {
                let changed = self.apply_invalidate(*range);
                self.loading_state = LoadingState::PartiallyLoaded;
                changed
            }
        }
    }

    /// Cut a SYNC window down to `limit`, or to the ids it carries if more.
    fn clamp_sync(&self, range: ListRange, incoming: usize, limit: usize) -> Option<ListRange> {
        if !range.is_valid() {
            return Some(range);
        }
        if range.start() >= limit {
            tracing::warn!(
                list = %self.config.name,
                ?range,
                limit,
                "Ignoring SYNC past the end of the list"
            );
            return None;
        }
        let reach = limit.max(range.start().saturating_add(incoming));
        if range.end() >= reach {
            tracing::warn!(
                list = %self.config.name,
                ?range,
                limit,
                "Truncating oversized SYNC range"
            );
            return Some(ListRange::new(range.start(), reach - 1));
        }
        Some(range)
    }

    fn apply_sync(&mut self, range: ListRange, incoming: &[String]) -> bool {
        if !range.is_valid() {
            tracing::warn!(list = %self.config.name, ?range, "Ignoring inverted SYNC range");
            return false;
        }
        let (start, end) = (range.start(), range.end());

        if self.loading_state == LoadingState::Preloaded && start == 0 {
            let held = self.loaded_count();
            let covered = self
                .room_ids
                .iter()
                .take(end.saturating_add(1))
                .flatten()
                .count();
            if covered < held {
                tracing::debug!(
                    list = %self.config.name,
                    held,
                    covered,
                    "Server restarted list; dropping cached rooms"
                );
                self.room_ids.clear();
                self.loading_state = LoadingState::NotLoaded;
            }
        }

        let before = self.room_ids.clone();
        let incoming_set: HashSet<&str> = incoming.iter().map(String::as_str).collect();
        let moved = |slot: &Option<String>| {
            slot.as_deref()
                .map_or(false, |id| incoming_set.contains(id))
        };

        let split_end = end.saturating_add(1).min(self.room_ids.len());
        let split_start = start.min(self.room_ids.len());
        let suffix: Vec<Option<String>> = self.room_ids.split_off(split_end);
        self.room_ids.truncate(split_start);
        self.room_ids.retain(|slot| !moved(slot));
        self.room_ids.resize(start, None);

        let mut written = HashSet::new();
        for offset in 0..range.len() {
            let slot = incoming
                .get(offset)
                .filter(|id| written.insert(id.as_str()))
                .cloned();
            self.room_ids.push(slot);
        }
        self.room_ids
            .extend(suffix.into_iter().filter(|slot| !moved(slot)));

        sequence_differs(&before, &self.room_ids)
    }

    fn apply_insert(&mut self, index: usize, room_id: &str) -> bool {
        let existing = self
            .room_ids
            .iter()
            .position(|slot| slot.as_deref() == Some(room_id));

        let target = match existing {
            Some(old) => {
                self.room_ids.remove(old);
                if old < index {
                    index - 1
                } else {
                    index
                }
            }
            None => {
                if let Some(total) = self.total_count.as_mut() {
                    *total = total.saturating_add(1);
                }
                index
            }
        };

        if target > self.room_ids.len() {
            self.room_ids.resize(target, None);
        }
        self.room_ids.insert(target, Some(room_id.to_string()));

        existing != Some(target)
    }

    fn apply_delete(&mut self, index: usize) -> bool {
        if let Some(total) = self.total_count.as_mut() {
            *total = total.saturating_sub(1);
        }
        if index < self.room_ids.len() {
            self.room_ids.remove(index);
            true
        } else {
            false
        }
    }

    fn apply_invalidate(&mut self, range: ListRange) -> bool {
        let mut changed = false;
        for slot in self
            .room_ids
            .iter_mut()
            .skip(range.start())
            .take(range.len())
        {
            changed |= slot.take().is_some();
        }
        changed
    }

    /// Recompute the loading state. `Preloaded` is only left by SYNC or reset.
    fn recompute(&mut self) {
        if self.loading_state != LoadingState::Preloaded {
            self.loading_state = compute_loading_state(&self.room_ids, self.total_count, self.mode);
        }
    }
}

/// Slot-wise comparison where missing trailing slots count as empty.
fn sequence_differs(a: &[Option<String>], b: &[Option<String>]) -> bool {
    let len = a.len().max(b.len());
    (0..len).any(|i| a.get(i).and_then(Option::as_ref) != b.get(i).and_then(Option::as_ref))
}
