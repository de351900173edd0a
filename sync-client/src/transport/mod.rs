//! Transport abstraction for slidesync.
//!
//! This module provides a pluggable transport layer that abstracts the
//! underlying HTTP plumbing (and authentication) from the engine.
//!
//! # Design
//!
//! The transport is a single request/response operation:
//! - `post()` sends one [`SyncRequest`] and waits up to the long-poll
//!   timeout for the matching [`SyncResponse`]
//!
//! Errors distinguish an expired continuation token, which the engine
//! recovers from by resetting the session, from everything else, which it
//! retries.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.queue_response(SyncResponse::empty("1"));
//! let response = transport.post(&request, Duration::from_secs(30)).await?;
//! ```

mod mock;

pub use mock::MockTransport;

use async_trait::async_trait;
use std::time::Duration;
use sync_types::{SyncRequest, SyncResponse};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Server no longer recognises the continuation token.
    #[error("position unknown or expired")]
    PositionExpired,

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Server replied with something other than a valid response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No reply within the timeout.
    #[error("request timeout")]
    Timeout,
}

impl TransportError {
    /// Whether the engine must reset its session before continuing.
    pub fn is_position_expired(&self) -> bool {
        matches!(self, Self::PositionExpired)
    }
}

/// Transport trait for one sliding-sync round trip.
///
/// Implementations handle encoding, authentication, and the HTTP call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the server's response.
    ///
    /// `timeout` is the long-poll hint also carried in the request; the
    /// implementation should allow some slack on top of it.
    async fn post(
        &self,
        request: &SyncRequest,
        timeout: Duration,
    ) -> Result<SyncResponse, TransportError>;
}
