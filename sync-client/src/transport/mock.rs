//! Mock transport for testing.
//!
//! Allows queueing responses and capturing sent requests for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use sync_types::{SyncRequest, SyncResponse};

/// Mock transport for testing.
///
/// Replies are served in queue order. Once the queue is drained, every call
/// returns an empty response with a fresh position, like an idle server
/// that ignores the long-poll timeout. Clones share state.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    sent_requests: Vec<SyncRequest>,
    reply_queue: VecDeque<Result<SyncResponse, TransportError>>,
    latency: Duration,
    idle_counter: u64,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a response to be returned by a future `post()` call.
    pub fn queue_response(&self, response: SyncResponse) {
        self.lock().reply_queue.push_back(Ok(response));
    }

    /// Queue an error to be returned by a future `post()` call.
    pub fn queue_error(&self, error: TransportError) {
        self.lock().reply_queue.push_back(Err(error));
    }

    /// Delay every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Get all requests that were sent.
    pub fn sent_requests(&self) -> Vec<SyncRequest> {
        self.lock().sent_requests.clone()
    }

    /// Get the last request that was sent.
    pub fn last_sent(&self) -> Option<SyncRequest> {
        self.lock().sent_requests.last().cloned()
    }

    /// Number of requests sent so far.
    pub fn request_count(&self) -> usize {
        self.lock().sent_requests.len()
    }

    /// Number of queued replies not yet served.
    pub fn pending_replies(&self) -> usize {
        self.lock().reply_queue.len()
    }

    /// Clear all state (requests, queue, latency).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(
        &self,
        request: &SyncRequest,
        _timeout: Duration,
    ) -> Result<SyncResponse, TransportError> {
        let (reply, latency) = {
            let mut inner = self.lock();
            inner.sent_requests.push(request.clone());
            let reply = match inner.reply_queue.pop_front() {
                Some(reply) => reply,
                None => {
                    inner.idle_counter += 1;
                    Ok(SyncResponse::empty(format!("idle-{}", inner.idle_counter)))
                }
            };
            (reply, inner.latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn serves_queued_replies_in_order() {
        let transport = MockTransport::new();
        transport.queue_response(SyncResponse::empty("1"));
        transport.queue_error(TransportError::PositionExpired);

        let request = SyncRequest::default();
        let r1 = transport.post(&request, Duration::ZERO).await.unwrap();
        let r2 = transport.post(&request, Duration::ZERO).await;

        assert_eq!(r1.pos, "1");
        assert_eq!(r2, Err(TransportError::PositionExpired));
        assert_eq!(transport.pending_replies(), 0);
    }

    #[tokio::test]
    async fn drained_queue_returns_fresh_positions() {
        let transport = MockTransport::new();
        let request = SyncRequest::default();

        let a = transport.post(&request, Duration::ZERO).await.unwrap();
        let b = transport.post(&request, Duration::ZERO).await.unwrap();

        assert_ne!(a.pos, b.pos);
        assert!(a.lists.is_empty() && a.rooms.is_empty());
    }

    #[tokio::test]
    async fn captures_sent_requests() {
        let transport = MockTransport::new();
        let request = SyncRequest {
            pos: Some("p9".into()),
            timeout: 30_000,
            ..SyncRequest::default()
        };

        transport.post(&request, Duration::ZERO).await.unwrap();

        assert_eq!(transport.request_count(), 1);
        assert_eq!(transport.last_sent(), Some(request));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let transport = MockTransport::new();
        let clone = transport.clone();
        clone.queue_response(SyncResponse::empty("shared"));

        let response = transport
            .post(&SyncRequest::default(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(response.pos, "shared");
        assert_eq!(clone.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_reply() {
        let transport = MockTransport::new();
        transport.set_latency(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        transport
            .post(&SyncRequest::default(), Duration::ZERO)
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let transport = MockTransport::new();
        transport.queue_response(SyncResponse::empty("1"));
        transport
            .post(&SyncRequest::default(), Duration::ZERO)
            .await
            .unwrap();

        transport.reset();

        assert_eq!(transport.request_count(), 0);
        assert_eq!(transport.pending_replies(), 0);
    }
}
