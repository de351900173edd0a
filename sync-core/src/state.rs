//! Sync loop state machine.
//!
//! This module provides a pure, side-effect-free state machine for the
//! request/response loop. The state machine takes events as input and
//! produces a new state plus a list of actions to execute.
//!
//! The loop has two suspension points, each a named state:
//! [`LoopState::AwaitingTransport`] (a request is in flight) and
//! [`LoopState::BackoffDelay`] (sleeping before the next request). The actual
//! I/O and sleeping is performed by sync-client, so tests can drive either
//! point with deterministic fakes.

use std::time::Duration;

/// Default threshold below which a response counts as "fast".
pub const DEFAULT_FAST_RESPONSE_THRESHOLD: Duration = Duration::from_secs(5);

/// Default minimum cycle time after a fast, empty response.
pub const DEFAULT_TARGET_INTERVAL: Duration = Duration::from_secs(3);

/// Default delay before retrying after a failed cycle.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Timing policy for the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePolicy {
    /// Cycles shorter than this may be followed by a delay.
    pub fast_response_threshold: Duration,
    /// Cumulative cycle time to pad fast, empty cycles up to.
    pub target_interval: Duration,
    /// Delay after a failed cycle.
    pub retry_delay: Duration,
}

impl Default for CyclePolicy {
    fn default() -> Self {
        Self {
            fast_response_threshold: DEFAULT_FAST_RESPONSE_THRESHOLD,
            target_interval: DEFAULT_TARGET_INTERVAL,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl CyclePolicy {
    /// Delay to insert before the next request, if any.
    ///
    /// A server that answers a long poll immediately with nothing new would
    /// otherwise be polled in a tight loop. Only cycles that were both fast
    /// and empty are padded, up to `target_interval`.
    pub fn backoff(&self, elapsed: Duration, meaningful: bool) -> Option<Duration> {
        if meaningful || elapsed >= self.fast_response_threshold {
            return None;
        }
        let remaining = self.target_interval.saturating_sub(elapsed);
        if remaining.is_zero() {
            None
        } else {
            Some(remaining)
        }
    }
}

/// Status published to observers on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// The loop is not running.
    Stopped,
    /// A request is in flight.
    WaitingForResponse,
    /// A response is being reconciled.
    Processing,
    /// A cycle completed successfully.
    Finished,
    /// A cycle failed; the loop will retry.
    Error {
        /// Error message describing the failure.
        message: String,
    },
    /// The server forgot our position; session state was cleared.
    SessionReset,
}

/// Sync loop state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    /// Not running.
    Stopped,
    /// Request in flight.
    AwaitingTransport,
    /// Reconciling a response.
    Processing,
    /// Sleeping before the next request.
    BackoffDelay {
        /// How long the sleep lasts.
        delay: Duration,
    },
}

impl LoopState {
    /// Create a new state machine in the Stopped state.
    pub fn new() -> Self {
        Self::Stopped
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: LoopEvent, policy: &CyclePolicy) -> (Self, Vec<LoopAction>) {
        match (self, event) {
            // From Stopped
            (Self::Stopped, LoopEvent::Start) => (Self::AwaitingTransport, send_request()),
            (Self::Stopped, LoopEvent::Stop) => (Self::Stopped, vec![]),

            // Stop is honoured from anywhere else
            (_, LoopEvent::Stop) => (
                Self::Stopped,
                vec![LoopAction::EmitStatus(SyncStatus::Stopped), LoopAction::Exit],
            ),

            // From AwaitingTransport
            (Self::AwaitingTransport, LoopEvent::ResponseReceived) => (
                Self::Processing,
                vec![
                    LoopAction::EmitStatus(SyncStatus::Processing),
                    LoopAction::ProcessResponse,
                ],
            ),
            (Self::AwaitingTransport, LoopEvent::PositionExpired) => {
                let mut actions = vec![
                    LoopAction::ResetSession,
                    LoopAction::EmitStatus(SyncStatus::SessionReset),
                ];
                actions.extend(send_request());
                (Self::AwaitingTransport, actions)
            }

            // Failure while waiting or processing
            (Self::AwaitingTransport | Self::Processing, LoopEvent::CycleFailed { error }) => {
                let delay = policy.retry_delay;
                (
                    Self::BackoffDelay { delay },
                    vec![
                        LoopAction::EmitStatus(SyncStatus::Error { message: error }),
                        LoopAction::Sleep(delay),
                    ],
                )
            }

            // From Processing
            (
                Self::Processing,
                LoopEvent::CycleCompleted {
                    elapsed,
                    meaningful,
                },
            ) => {
                let mut actions = vec![LoopAction::EmitStatus(SyncStatus::Finished)];
                match policy.backoff(elapsed, meaningful) {
                    Some(delay) => {
                        actions.push(LoopAction::Sleep(delay));
                        (Self::BackoffDelay { delay }, actions)
                    }
                    None => {
                        actions.extend(send_request());
                        (Self::AwaitingTransport, actions)
                    }
                }
            }

            // From BackoffDelay
            (Self::BackoffDelay { .. }, LoopEvent::DelayElapsed) => {
                (Self::AwaitingTransport, send_request())
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the loop is running.
    pub fn is_running(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

impl Default for LoopState {
    fn default() -> Self {
        Self::new()
    }
}

fn send_request() -> Vec<LoopAction> {
    vec![
        LoopAction::EmitStatus(SyncStatus::WaitingForResponse),
        LoopAction::SendRequest,
    ]
}

/// Events that can occur in the loop lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// Caller started the engine.
    Start,
    /// Transport returned a response.
    ResponseReceived,
    /// Response was reconciled.
    CycleCompleted {
        /// Time since the request was issued.
        elapsed: Duration,
        /// Whether the cycle surfaced anything to observers.
        meaningful: bool,
    },
    /// Transport or processing failed.
    CycleFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Server rejected our continuation token.
    PositionExpired,
    /// Backoff sleep finished.
    DelayElapsed,
    /// Caller asked the loop to stop.
    Stop,
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects. The sync-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopAction {
    /// Build a request from current state and send it.
    SendRequest,
    /// Reconcile the received response and persist the position.
    ProcessResponse,
    /// Drop the continuation token and all list windows, then persist.
    ResetSession,
    /// Sleep before continuing.
    Sleep(Duration),
    /// Publish a status to observers.
    EmitStatus(SyncStatus),
    /// Leave the loop.
    Exit,
}
