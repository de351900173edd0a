//! Position cache for cold-start recovery.
//!
//! After every processed response the engine saves the continuation token
//! and each list's window through a [`SessionStore`]. On the next start the
//! snapshot is restored so the session resumes without a full re-fetch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use sync_core::{ListSnapshot, RoomList};
use thiserror::Error;

use crate::session::SessionStore;
use crate::store::StoreError;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Snapshot could not be encoded.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    /// Stored blob is not a valid snapshot.
    #[error("failed to decode snapshot: {0}")]
    Decode(#[source] serde_json::Error),

    /// Session store failed.
    #[error("session store error: {0}")]
    Store(#[from] StoreError),
}

/// Everything needed to resume a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Continuation token (`None` after a session reset).
    #[serde(default)]
    pub pos: Option<String>,
    /// To-device extension stream position.
    #[serde(default)]
    pub to_device_since: Option<String>,
    /// Per-list windows, keyed by list name.
    #[serde(default)]
    pub lists: BTreeMap<String, ListSnapshot>,
}

impl SessionSnapshot {
    /// Capture the current session.
    pub fn capture(
        pos: Option<String>,
        to_device_since: Option<String>,
        lists: &BTreeMap<String, RoomList>,
    ) -> Self {
        Self {
            pos,
            to_device_since,
            lists: lists
                .iter()
                .map(|(name, list)| (name.clone(), list.snapshot()))
                .collect(),
        }
    }

    /// Seed every matching list. Returns the names of lists that took data.
    pub fn restore_lists(&self, lists: &mut BTreeMap<String, RoomList>) -> Vec<String> {
        lists
            .iter_mut()
            .filter_map(|(name, list)| {
                let snapshot = self.lists.get(name)?;
                list.restore(snapshot).then(|| name.clone())
            })
            .collect()
    }
}

/// Saves and loads [`SessionSnapshot`]s under a per-engine key.
#[derive(Clone)]
pub struct PositionCache {
    store: Arc<dyn SessionStore>,
    key: String,
}

impl fmt::Debug for PositionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PositionCache")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl PositionCache {
    /// Create a cache for the engine instance `session_id`.
    pub fn new(store: Arc<dyn SessionStore>, session_id: &str) -> Self {
        Self {
            store,
            key: Self::key_for(session_id),
        }
    }

    /// Storage key used for `session_id`.
    pub fn key_for(session_id: &str) -> String {
        format!("slidesync.{session_id}.pos")
    }

    /// Storage key for this cache.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Persist a snapshot, replacing the previous one.
    pub async fn save(&self, snapshot: &SessionSnapshot) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(snapshot).map_err(CacheError::Encode)?;
        self.store.put(&self.key, bytes).await?;
        tracing::trace!(key = %self.key, pos = ?snapshot.pos, "Saved session snapshot");
        Ok(())
    }

    /// Load the last saved snapshot, if any.
    pub async fn load(&self) -> Result<Option<SessionSnapshot>, CacheError> {
        let Some(bytes) = self.store.get(&self.key).await? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_slice(&bytes).map_err(CacheError::Decode)?;
        Ok(Some(snapshot))
    }
}
