//! # sync-core
//!
//! Pure logic for slidesync (no I/O, instant tests).
//!
//! This crate implements the range planner, room list state, and sync loop
//! state machine without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, disk) is performed by `sync-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod list;
pub mod range;
pub mod state;

pub use list::{
    compute_loading_state, validate_required_state, ListConfig, ListError, ListSnapshot,
    LoadingState, RoomList, DEFAULT_BATCH_SIZE, DEFAULT_TIMELINE_LIMIT, MAX_LIST_NAME_LEN,
    MAX_REQUIRED_STATE_ENTRIES,
};
pub use range::{plan, ranges_are_well_formed, SyncMode};
pub use state::{CyclePolicy, LoopAction, LoopEvent, LoopState, SyncStatus};
