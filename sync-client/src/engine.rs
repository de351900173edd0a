//! SyncEngine - the main interface for slidesync.
//!
//! This module provides [`SyncEngine`], which runs the long-poll loop for a
//! set of room lists and room subscriptions and publishes what changed.
//!
//! # Architecture
//!
//! The loop is driven by the pure state machine from sync-core; the engine
//! interprets its actions to perform the actual I/O via the Transport trait.
//!
//! ```text
//! Application ──commands──▶ SyncEngine ──▶ Transport ──▶ Server
//!      ▲                        │
//!      └──updates / status──────┤
//!                               ▼
//!                 Reconciler ──▶ RoomStore, PositionCache
//! ```
//!
//! Commands may be issued while the loop runs. They lock the same state the
//! loop reads when it builds a request, so they take effect on the next one.
//!
//! # Example
//!
//! ```ignore
//! use slidesync_client::{EngineConfig, MemoryRoomStore, MemorySessionStore, MockTransport, SyncEngine};
//! use slidesync_core::{ListConfig, SyncMode};
//!
//! let engine = SyncEngine::new(
//!     EngineConfig::new("device-1"),
//!     MockTransport::new(),
//!     MemoryRoomStore::new(),
//!     Arc::new(MemorySessionStore::new()),
//! );
//! engine.add_list(ListConfig::new("all_rooms", SyncMode::Growing)).await?;
//!
//! let mut updates = engine.subscribe_updates();
//! engine.start().await?;
//! while let Ok(update) = updates.recv().await {
//!     println!("{} rooms changed", update.rooms.len());
//! }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sync_core::{
    validate_required_state, CyclePolicy, ListConfig, ListError, ListSnapshot, LoopAction,
    LoopEvent, LoopState, RoomList, SyncStatus,
};
use sync_types::{ListRange, RoomSubscription, SyncRequest, SyncResponse};
use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cache::{CacheError, PositionCache, SessionSnapshot};
use crate::config::EngineConfig;
use crate::reconcile::{Reconciler, SyncUpdate};
use crate::session::SessionStore;
use crate::store::{RoomStore, StoreError};
use crate::transport::{Transport, TransportError};

/// Most lists one engine accepts.
pub const MAX_LISTS: usize = 100;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid list or subscription parameters.
    #[error("invalid configuration: {0}")]
    Config(#[from] ListError),

    /// A list with this name is already registered.
    #[error("list {0:?} already exists")]
    DuplicateList(String),

    /// The engine already holds [`MAX_LISTS`] lists.
    #[error("too many lists (max {max})")]
    TooManyLists {
        /// Maximum allowed.
        max: usize,
    },

    /// No list with this name is registered.
    #[error("unknown list {0:?}")]
    UnknownList(String),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Position cache error.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Room store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// State shared between commands and the loop.
struct EngineState {
    lists: BTreeMap<String, RoomList>,
    subscriptions: BTreeMap<String, RoomSubscription>,
    pos: Option<String>,
    to_device_since: Option<String>,
    reconciler: Reconciler,
    first_cycle: bool,
    restored: bool,
    cached_lists: BTreeMap<String, ListSnapshot>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            lists: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            pos: None,
            to_device_since: None,
            reconciler: Reconciler::new(),
            first_cycle: true,
            restored: false,
            cached_lists: BTreeMap::new(),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::capture(
            self.pos.clone(),
            self.to_device_since.clone(),
            &self.lists,
        )
    }
}

struct Inner<T, S> {
    config: EngineConfig,
    policy: CyclePolicy,
    transport: T,
    rooms: S,
    cache: PositionCache,
    state: Mutex<EngineState>,
    updates: broadcast::Sender<SyncUpdate>,
    statuses: broadcast::Sender<SyncStatus>,
    current_status: watch::Sender<SyncStatus>,
    stop_requested: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// The sliding-sync engine.
///
/// Owns the room lists and subscriptions, runs one request at a time, and
/// publishes an update stream (material changes only) and a status stream
/// (every transition). Dropping the engine asks the loop to stop at its next
/// iteration boundary; [`SyncEngine::shutdown`] also waits for it.
pub struct SyncEngine<T, S>
where
    T: Transport + 'static,
    S: RoomStore + 'static,
{
    inner: Arc<Inner<T, S>>,
}

impl<T, S> SyncEngine<T, S>
where
    T: Transport + 'static,
    S: RoomStore + 'static,
{
    /// Create an engine. Nothing is sent until [`SyncEngine::start`].
    pub fn new(
        config: EngineConfig,
        transport: T,
        rooms: S,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (updates, _) = broadcast::channel(capacity);
        let (statuses, _) = broadcast::channel(capacity);
        let (current_status, _) = watch::channel(SyncStatus::Stopped);

        Self {
            inner: Arc::new(Inner {
                policy: config.cycle_policy(),
                cache: PositionCache::new(sessions, &config.session_id),
                config,
                transport,
                rooms,
                state: Mutex::new(EngineState::new()),
                updates,
                statuses,
                current_status,
                stop_requested: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the loop. No-op if it is already running.
    ///
    /// The first start restores the position cache before the first request.
    /// The first cycle of every run is published even if nothing changed.
    pub async fn start(&self) -> Result<(), ClientError> {
        let mut task = self.inner.task.lock().await;
        if task.as_ref().map_or(false, |handle| !handle.is_finished()) {
            tracing::debug!("Sync loop already running");
            return Ok(());
        }

        self.inner.restore_once().await;
        self.inner.state.lock().await.first_cycle = true;
        self.inner.stop_requested.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(inner.run()));
        tracing::info!(session = %self.inner.config.session_id, "Sync loop started");
        Ok(())
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// An in-flight request is not cancelled: it completes and is processed
    /// first. A backoff sleep already under way is also waited out. A `start`
    /// issued meanwhile waits until the old loop has exited.
    pub async fn stop(&self) {
        // Held until the loop exits so no second loop can start meanwhile
        let mut task = self.inner.task.lock().await;
        let Some(handle) = task.take() else {
            return;
        };

        self.inner.stop_requested.store(true, Ordering::SeqCst);
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Sync loop task failed");
            self.inner.publish_status(SyncStatus::Stopped);
        }
        tracing::info!(session = %self.inner.config.session_id, "Sync loop stopped");
    }

    /// Stop the loop and release the engine.
    ///
    /// Streams close once the last receiver has drained.
    pub async fn shutdown(self) {
        self.stop().await;
    }

    /// Whether the loop task is running.
    pub async fn is_running(&self) -> bool {
        self.inner
            .task
            .lock()
            .await
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Register a room list.
    ///
    /// If the cache held a window for this name, the list starts preloaded.
    pub async fn add_list(&self, config: ListConfig) -> Result<(), ClientError> {
        let mut list = RoomList::new(config)?;
        let mut state = self.inner.state.lock().await;

        if state.lists.contains_key(list.name()) {
            return Err(ClientError::DuplicateList(list.name().to_string()));
        }
        if state.lists.len() >= MAX_LISTS {
            return Err(ClientError::TooManyLists { max: MAX_LISTS });
        }
        if let Some(snapshot) = state.cached_lists.get(list.name()) {
            list.restore(snapshot);
        }

        tracing::debug!(list = %list.name(), mode = ?list.mode(), "Added list");
        state.lists.insert(list.name().to_string(), list);
        Ok(())
    }

    /// Subscribe to rooms independently of any list.
    ///
    /// Each room's next delivery is treated as initial.
    pub async fn subscribe_to_rooms<I>(
        &self,
        room_ids: I,
        subscription: RoomSubscription,
    ) -> Result<(), ClientError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        validate_required_state(&subscription.required_state)?;

        let mut state = self.inner.state.lock().await;
        for room_id in room_ids {
            let room_id = room_id.into();
            state.reconciler.forget_room(&room_id);
            state.subscriptions.insert(room_id, subscription.clone());
        }
        Ok(())
    }

    /// Drop room subscriptions.
    pub async fn unsubscribe_from_rooms<I>(&self, room_ids: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut state = self.inner.state.lock().await;
        for room_id in room_ids {
            state.subscriptions.remove(room_id.as_ref());
        }
    }

    /// Advance a list's window by one batch. Returns whether its ranges changed.
    pub async fn load_more(&self, list: &str) -> Result<bool, ClientError> {
        let mut state = self.inner.state.lock().await;
        let list = state
            .lists
            .get_mut(list)
            .ok_or_else(|| ClientError::UnknownList(list.to_string()))?;
        Ok(list.load_more())
    }

    /// Set a list's ranges explicitly, switching it to selective mode.
    pub async fn set_list_ranges(
        &self,
        list: &str,
        ranges: Vec<ListRange>,
    ) -> Result<(), ClientError> {
        let mut state = self.inner.state.lock().await;
        let list = state
            .lists
            .get_mut(list)
            .ok_or_else(|| ClientError::UnknownList(list.to_string()))?;
        list.set_ranges(ranges)?;
        Ok(())
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Copy of a list's current state.
    pub async fn room_list(&self, name: &str) -> Option<RoomList> {
        self.inner.state.lock().await.lists.get(name).cloned()
    }

    /// Names of all registered lists.
    pub async fn list_names(&self) -> Vec<String> {
        self.inner.state.lock().await.lists.keys().cloned().collect()
    }

    /// Active room subscriptions.
    pub async fn room_subscriptions(&self) -> BTreeMap<String, RoomSubscription> {
        self.inner.state.lock().await.subscriptions.clone()
    }

    /// Current continuation token.
    pub async fn pos(&self) -> Option<String> {
        self.inner.state.lock().await.pos.clone()
    }

    /// Most recent status.
    pub fn status(&self) -> SyncStatus {
        self.inner.current_status.borrow().clone()
    }

    /// Receive every update with material changes.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<SyncUpdate> {
        self.inner.updates.subscribe()
    }

    /// Receive every status transition.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SyncStatus> {
        self.inner.statuses.subscribe()
    }

    /// Get a reference to the transport (for testing).
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Get a reference to the room store.
    pub fn room_store(&self) -> &S {
        &self.inner.rooms
    }
}

impl<T, S> Drop for SyncEngine<T, S>
where
    T: Transport + 'static,
    S: RoomStore + 'static,
{
    fn drop(&mut self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
    }
}

impl<T, S> Inner<T, S>
where
    T: Transport + 'static,
    S: RoomStore + 'static,
{
    fn publish_status(&self, status: SyncStatus) {
        tracing::trace!(?status, "Status");
        // No receivers is fine
        let _ = self.statuses.send(status.clone());
        self.current_status.send_replace(status);
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    async fn restore_once(&self) {
        if self.state.lock().await.restored {
            return;
        }

        let snapshot = match self.cache.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, key = %self.cache.key(), "Ignoring unreadable session cache");
                None
            }
        };

        let mut state = self.state.lock().await;
        state.restored = true;
        if let Some(snapshot) = snapshot {
            let restored = snapshot.restore_lists(&mut state.lists);
            tracing::info!(
                pos = ?snapshot.pos,
                lists = ?restored,
                "Restored session from cache"
            );
            state.pos = snapshot.pos;
            state.to_device_since = snapshot.to_device_since;
            state.cached_lists = snapshot.lists;
        }
    }

    /// The loop: feed events to the state machine and execute its actions.
    async fn run(self: Arc<Self>) {
        let mut machine = LoopState::new();
        let mut events = VecDeque::from([LoopEvent::Start]);
        let mut received: Option<(SyncResponse, Instant)> = None;

        while let Some(event) = events.pop_front() {
            let (next, actions) = machine.on_event(event, &self.policy);
            machine = next;

            for action in actions {
                match action {
                    LoopAction::EmitStatus(status) => self.publish_status(status),
                    LoopAction::SendRequest => {
                        if self.stop_requested() {
                            events.push_back(LoopEvent::Stop);
                            break;
                        }
                        let started = Instant::now();
                        let event = match self.send_request().await {
                            Ok(response) => {
                                received = Some((response, started));
                                LoopEvent::ResponseReceived
                            }
                            Err(TransportError::PositionExpired) => LoopEvent::PositionExpired,
                            Err(e) => {
                                tracing::warn!(error = %e, "Sync request failed");
                                LoopEvent::CycleFailed {
                                    error: e.to_string(),
                                }
                            }
                        };
                        events.push_back(event);
                    }
                    LoopAction::ProcessResponse => {
                        let event = match received.take() {
                            Some((response, started)) => {
                                match self.process_response(response).await {
                                    Ok(meaningful) => LoopEvent::CycleCompleted {
                                        elapsed: started.elapsed(),
                                        meaningful,
                                    },
                                    Err(e) => {
                                        tracing::error!(error = %e, "Failed to process response");
                                        LoopEvent::CycleFailed {
                                            error: e.to_string(),
                                        }
                                    }
                                }
                            }
                            None => LoopEvent::CycleFailed {
                                error: "no response to process".into(),
                            },
                        };
                        events.push_back(event);
                    }
                    LoopAction::ResetSession => self.reset_session().await,
                    LoopAction::Sleep(delay) => {
                        if self.stop_requested() {
                            events.push_back(LoopEvent::Stop);
                            break;
                        }
                        tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                        tokio::time::sleep(delay).await;
                        events.push_back(LoopEvent::DelayElapsed);
                    }
                    LoopAction::Exit => return,
                }
            }
        }
    }

    async fn build_request(&self) -> SyncRequest {
        let state = self.state.lock().await;
        SyncRequest {
            pos: state.pos.clone(),
            timeout: self.config.long_poll_timeout_ms,
            set_presence: self.config.set_presence.clone(),
            lists: state
                .lists
                .iter()
                .map(|(name, list)| (name.clone(), list.request()))
                .collect(),
            room_subscriptions: state.subscriptions.clone(),
            extensions: self
                .config
                .extensions
                .request(state.to_device_since.clone()),
        }
    }

    async fn send_request(&self) -> Result<SyncResponse, TransportError> {
        let request = self.build_request().await;
        tracing::debug!(
            pos = ?request.pos,
            lists = request.lists.len(),
            subscriptions = request.room_subscriptions.len(),
            "Sending sync request"
        );
        self.transport
            .post(&request, self.config.long_poll_timeout())
            .await
    }

    /// Reconcile a response, persist the session, and publish if meaningful.
    ///
    /// List changes are committed only if the whole response was applied, so
    /// a failure leaves lists and position as they were for the retry.
    async fn process_response(&self, response: SyncResponse) -> Result<bool, StoreError> {
        let (update, meaningful, snapshot) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let mut lists = state.lists.clone();
            let update = state
                .reconciler
                .apply(&response, &mut lists, &self.rooms)?;

            state.lists = lists;
            state.pos = Some(response.pos.clone());
            if let Some(to_device) = &response.extensions.to_device {
                state.to_device_since = Some(to_device.next_batch.clone());
            }
            let first = std::mem::replace(&mut state.first_cycle, false);
            let meaningful = first || !update.is_empty();

            (update, meaningful, state.snapshot())
        };

        if let Err(e) = self.cache.save(&snapshot).await {
            tracing::warn!(error = %e, "Failed to persist session snapshot");
        }

        if meaningful {
            // No receivers is fine
            let _ = self.updates.send(update);
        }
        Ok(meaningful)
    }

    async fn reset_session(&self) {
        tracing::warn!(session = %self.config.session_id, "Position expired, resetting session");

        let snapshot = {
            let mut state = self.state.lock().await;
            state.pos = None;
            state.to_device_since = None;
            state.reconciler.clear();
            state.cached_lists.clear();
            state.first_cycle = true;
            for list in state.lists.values_mut() {
                list.reset();
            }
            state.snapshot()
        };

        if let Err(e) = self.cache.save(&snapshot).await {
            tracing::warn!(error = %e, "Failed to persist reset session");
        }
    }
}
