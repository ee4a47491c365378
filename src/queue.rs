//! FIFO execution queue with per-item timeouts.
//!
//! Host command surfaces are single-threaded; concurrent tool calls
//! would interleave their document mutations. [`ExecutionQueue`]
//! serializes everything: requests enter in arrival order, the executor
//! drains one at a time, and each item carries a timer that rejects it
//! if it is still waiting when its deadline passes.
//!
//! Enqueueing hands back a [`oneshot::Receiver`] that eventually yields
//! the outcome, so the transport side can await a response without
//! knowing anything about execution.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::ToolResponse;
use crate::protocol::request::ToolRequest;

// ============================================================================
// Constants
// ============================================================================

/// How many completed durations the rolling average keeps.
const DURATION_WINDOW: usize = 100;

// ============================================================================
// QueuedToolRequest
// ============================================================================

/// A request waiting for (or undergoing) execution.
#[derive(Debug)]
pub struct QueuedToolRequest {
    /// The validated request.
    pub request: ToolRequest,
    /// When the request entered the queue.
    pub queued_at: Instant,
    responder: oneshot::Sender<Result<ToolResponse>>,
    // Unique per enqueue; request ids can legitimately recur once they
    // age out of the dedup window, so timers must not key on them.
    token: u64,
}

impl QueuedToolRequest {
    /// Delivers the outcome to whoever enqueued the request.
    ///
    /// A dropped receiver is not an error; the waiter gave up first.
    pub fn respond(self, outcome: Result<ToolResponse>) {
        if self.responder.send(outcome).is_err() {
            trace!(id = %self.request.id, "Response receiver dropped");
        }
    }
}

// ============================================================================
// QueueStats
// ============================================================================

/// Point-in-time queue statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueStats {
    /// Items currently waiting.
    pub queued: usize,
    /// Successfully executed requests.
    pub processed: u64,
    /// Requests that executed and failed.
    pub failed: u64,
    /// Requests rejected by their queue timer.
    pub timed_out: u64,
    /// Rolling average execution duration, milliseconds.
    pub avg_duration_ms: f64,
}

// ============================================================================
// ExecutionQueue
// ============================================================================

struct Inner {
    items: VecDeque<QueuedToolRequest>,
    next_token: u64,
    processed: u64,
    failed: u64,
    timed_out: u64,
    durations: VecDeque<u64>,
}

impl Inner {
    fn avg_duration_ms(&self) -> f64 {
        if self.durations.is_empty() {
            return 0.0;
        }
        self.durations.iter().sum::<u64>() as f64 / self.durations.len() as f64
    }
}

/// Bounded FIFO queue feeding the executor.
///
/// # Thread Safety
///
/// All operations lock a single mutex briefly; none block across an
/// await point.
pub struct ExecutionQueue {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    request_timeout: Duration,
}

impl ExecutionQueue {
    /// Creates a queue holding at most `capacity` pending requests.
    #[must_use]
    pub fn new(capacity: usize, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                items: VecDeque::new(),
                next_token: 0,
                processed: 0,
                failed: 0,
                timed_out: 0,
                durations: VecDeque::with_capacity(DURATION_WINDOW),
            })),
            capacity: capacity.max(1),
            request_timeout,
        }
    }

    /// Number of items currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Returns whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Enqueues a request and returns the channel its outcome will
    /// arrive on.
    ///
    /// A timer is armed per item; if the request is still queued when
    /// `request_timeout` elapses it is removed and rejected with
    /// [`Error::RequestTimeout`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueFull`] when the queue is at capacity. The
    /// caller reports that upstream immediately instead of letting the
    /// request silently age out.
    pub fn enqueue(
        &self,
        request: ToolRequest,
    ) -> Result<oneshot::Receiver<Result<ToolResponse>>> {
        let (tx, rx) = oneshot::channel();
        let id = request.id.clone();

        let token = {
            let mut inner = self.inner.lock();
            if inner.items.len() >= self.capacity {
                warn!(id = %id, capacity = self.capacity, "Queue full; rejecting");
                return Err(Error::queue_full(self.capacity));
            }

            let token = inner.next_token;
            inner.next_token += 1;
            inner.items.push_back(QueuedToolRequest {
                request,
                queued_at: Instant::now(),
                responder: tx,
                token,
            });
            trace!(id = %id, depth = inner.items.len(), "Enqueued");
            token
        };

        let inner = Arc::clone(&self.inner);
        let timeout = self.request_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            Self::expire(&inner, token, timeout);
        });

        Ok(rx)
    }

    /// Removes and rejects an item whose deadline passed while it was
    /// still queued. Items already handed to the executor are not
    /// touched, and a recycled request id never matches a stale timer.
    fn expire(inner: &Mutex<Inner>, token: u64, timeout: Duration) {
        let expired = {
            let mut inner = inner.lock();
            let position = inner.items.iter().position(|item| item.token == token);
            match position {
                Some(index) => {
                    inner.timed_out += 1;
                    inner.items.remove(index)
                }
                None => None,
            }
        };

        if let Some(item) = expired {
            debug!(id = %item.request.id, "Request timed out in queue");
            let id = item.request.id.clone();
            item.respond(Err(Error::request_timeout(
                id,
                timeout.as_millis() as u64,
            )));
        }
    }

    /// Takes the next item in arrival order.
    #[must_use]
    pub fn dequeue(&self) -> Option<QueuedToolRequest> {
        self.inner.lock().items.pop_front()
    }

    /// Rejects every pending item with [`Error::Cancelled`].
    ///
    /// Returns how many were dropped. Used on shutdown and on fatal
    /// session errors.
    pub fn clear(&self, reason: &str) -> usize {
        let drained: Vec<QueuedToolRequest> = {
            let mut inner = self.inner.lock();
            inner.items.drain(..).collect()
        };

        let count = drained.len();
        for item in drained {
            item.respond(Err(Error::cancelled(reason)));
        }

        if count > 0 {
            debug!(count, reason, "Queue cleared");
        }
        count
    }

    /// Records a successful execution.
    pub fn record_success(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.processed += 1;
        if inner.durations.len() >= DURATION_WINDOW {
            inner.durations.pop_front();
        }
        inner.durations.push_back(duration.as_millis() as u64);
    }

    /// Records a failed execution.
    pub fn record_failure(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.failed += 1;
        if inner.durations.len() >= DURATION_WINDOW {
            inner.durations.pop_front();
        }
        inner.durations.push_back(duration.as_millis() as u64);
    }

    /// Returns a snapshot of the queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            queued: inner.items.len(),
            processed: inner.processed,
            failed: inner.failed,
            timed_out: inner.timed_out,
            avg_duration_ms: inner.avg_duration_ms(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Map;

    use crate::identifiers::RequestId;

    fn request(id: &str) -> ToolRequest {
        ToolRequest::new(RequestId::new(id), "get_data_contexts", Map::new())
    }

    fn queue() -> ExecutionQueue {
        ExecutionQueue::new(4, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = queue();

        queue.enqueue(request("r1")).expect("enqueue");
        queue.enqueue(request("r2")).expect("enqueue");
        queue.enqueue(request("r3")).expect("enqueue");

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue().expect("item").request.id.as_str(), "r1");
        assert_eq!(queue.dequeue().expect("item").request.id.as_str(), "r2");
        assert_eq!(queue.dequeue().expect("item").request.id.as_str(), "r3");
        assert!(queue.dequeue().is_none());
    }

    #[tokio::test]
    async fn test_queue_full_fails_fast() {
        let queue = ExecutionQueue::new(2, Duration::from_secs(30));

        queue.enqueue(request("r1")).expect("enqueue");
        queue.enqueue(request("r2")).expect("enqueue");

        let result = queue.enqueue(request("r3"));
        assert!(matches!(result, Err(Error::QueueFull { capacity: 2 })));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_queued_item_times_out() {
        tokio::time::pause();
        let queue = ExecutionQueue::new(4, Duration::from_millis(50));

        let rx = queue.enqueue(request("r1")).expect("enqueue");
        tokio::time::advance(Duration::from_millis(60)).await;

        let outcome = rx.await.expect("channel open");
        assert!(matches!(
            outcome,
            Err(Error::RequestTimeout { timeout_ms: 50, .. })
        ));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_dequeued_item_not_expired() {
        tokio::time::pause();
        let queue = ExecutionQueue::new(4, Duration::from_millis(50));

        let rx = queue.enqueue(request("r1")).expect("enqueue");
        let item = queue.dequeue().expect("item");

        // Deadline passes while the item is executing.
        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(queue.stats().timed_out, 0);

        item.respond(Ok(ToolResponse::success(
            RequestId::new("r1"),
            serde_json::json!({}),
            12,
        )));

        let outcome = rx.await.expect("channel open").expect("success");
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_stale_timer_ignores_reenqueued_id() {
        tokio::time::pause();
        let queue = ExecutionQueue::new(4, Duration::from_millis(50));

        // First "r1" is executed and answered before its deadline.
        let rx1 = queue.enqueue(request("r1")).expect("enqueue");
        let item = queue.dequeue().expect("item");
        item.respond(Ok(ToolResponse::success(
            RequestId::new("r1"),
            serde_json::json!({}),
            1,
        )));
        assert!(rx1.await.expect("channel open").is_ok());

        // Same id arrives again while the first timer is still armed.
        tokio::time::advance(Duration::from_millis(40)).await;
        let rx2 = queue.enqueue(request("r1")).expect("enqueue");

        // First timer fires; the second item must survive it.
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().timed_out, 0);

        // The second item expires on its own deadline.
        tokio::time::advance(Duration::from_millis(40)).await;
        let outcome = rx2.await.expect("channel open");
        assert!(matches!(outcome, Err(Error::RequestTimeout { .. })));
        assert_eq!(queue.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_clear_rejects_all_pending() {
        let queue = queue();

        let rx1 = queue.enqueue(request("r1")).expect("enqueue");
        let rx2 = queue.enqueue(request("r2")).expect("enqueue");

        assert_eq!(queue.clear("shutting down"), 2);
        assert!(queue.is_empty());

        for rx in [rx1, rx2] {
            let outcome = rx.await.expect("channel open");
            assert!(matches!(outcome, Err(Error::Cancelled { .. })));
        }
    }

    #[tokio::test]
    async fn test_stats_rolling_average() {
        let queue = queue();

        queue.record_success(Duration::from_millis(10));
        queue.record_success(Duration::from_millis(20));
        queue.record_failure(Duration::from_millis(30));

        let stats = queue.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 1);
        assert!((stats.avg_duration_ms - 20.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_duration_window_bounded() {
        let queue = queue();

        for _ in 0..DURATION_WINDOW {
            queue.record_success(Duration::from_millis(100));
        }
        // Older samples fall out of the window.
        for _ in 0..DURATION_WINDOW {
            queue.record_success(Duration::from_millis(10));
        }

        let stats = queue.stats();
        assert!((stats.avg_duration_ms - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_respond_with_dropped_receiver_is_silent() {
        let queue = queue();

        let rx = queue.enqueue(request("r1")).expect("enqueue");
        drop(rx);

        let item = queue.dequeue().expect("item");
        item.respond(Err(Error::cancelled("gone")));
    }
}
