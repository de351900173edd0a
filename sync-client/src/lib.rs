//! # sync-client
//!
//! Client engine for the slidesync sliding-window sync protocol.
//!
//! This is the main library that applications use to keep a local room
//! store in step with a server.
//!
//! ## Features
//!
//! - **Windowed Lists**: Named room lists that grow, page, or follow explicit ranges
//! - **Change Suppression**: Re-delivered rooms and events are absorbed silently
//! - **Cold-Start Recovery**: Position and list windows are cached per session
//! - **Transport Abstraction**: Pluggable transport layer (mock included)
//! - **Pure State Machine**: Uses sync-core for side-effect-free loop logic
//!
//! ## Example
//!
//! ```ignore
//! use slidesync_client::{EngineConfig, FileSessionStore, SyncEngine};
//! use slidesync_core::{ListConfig, SyncMode};
//!
//! let engine = SyncEngine::new(
//!     EngineConfig::new("laptop"),
//!     transport,
//!     room_store,
//!     Arc::new(FileSessionStore::new("/var/lib/app/sessions")),
//! );
//! engine.add_list(ListConfig::new("all_rooms", SyncMode::Growing)).await?;
//! engine.start().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod reconcile;
pub mod session;
pub mod store;
pub mod transport;

pub use cache::{CacheError, PositionCache, SessionSnapshot};
pub use config::{ConfigError, EngineConfig, ExtensionsConfig};
pub use engine::{ClientError, SyncEngine, MAX_LISTS};
pub use reconcile::{Reconciler, SyncUpdate};
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};
pub use store::{
    MemoryRoom, MemoryRoomStore, Membership, RoomRecord, RoomStore, StateEntry, StoreError,
};
pub use transport::{MockTransport, Transport, TransportError};
