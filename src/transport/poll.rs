//! Polling loop with cursor tracking and deduplication.
//!
//! [`PollingManager`] is the pull fallback: while active it asks the
//! relay for new requests on a steady interval, advancing a cursor so
//! the relay only returns requests it has not already handed over.
//!
//! Poll failures are never fatal. The loop stretches its pacing with
//! the shared backoff schedule while the relay is unreachable and
//! snaps back to the steady interval on the first success. A worker
//! that gives up polling has no transport left at all.
//!
//! [`DedupWindow`] guards against replays: relay-side cursor resets and
//! push/poll overlap during transport switches can both resurface an
//! already-delivered request id.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::WorkerConfig;
use crate::relay::RelayClient;

use super::{Backoff, ConnectionState, ConnectionStatus, EventSink, TransportEvent, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Default capacity of the dedup window.
pub const DEDUP_CAPACITY: usize = 256;

// ============================================================================
// DedupWindow
// ============================================================================

/// Bounded set of recently seen request ids.
///
/// Oldest entries are evicted first once the capacity is reached, so
/// memory stays flat over a long-lived session.
#[derive(Debug)]
pub struct DedupWindow {
    seen: FxHashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupWindow {
    /// Creates a window holding at most `capacity` ids.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: FxHashSet::default(),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records an id; returns `true` if it was not already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }

        if self.order.len() >= self.capacity
            && let Some(evicted) = self.order.pop_front()
        {
            self.seen.remove(&evicted);
        }

        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    /// Returns whether an id has been seen within the window.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Number of ids currently tracked.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns whether the window is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::new(DEDUP_CAPACITY)
    }
}

// ============================================================================
// PollingManager
// ============================================================================

/// State shared between the manager handle and its polling task.
struct Shared {
    config: Arc<WorkerConfig>,
    relay: RelayClient,
    sink: EventSink,
    status: Mutex<ConnectionStatus>,
    dedup: Arc<Mutex<DedupWindow>>,
    interval: Mutex<Duration>,
    cursor: Mutex<Option<String>>,
    stopped: AtomicBool,
    backoff: Backoff,
}

impl Shared {
    fn set_state(&self, state: ConnectionState, error: Option<String>) {
        let snapshot = {
            let mut status = self.status.lock();
            if status.state == state && status.error == error {
                return;
            }
            status.state = state;
            status.error = error;
            if state == ConnectionState::Connected {
                status.last_connected = Some(crate::protocol::epoch_ms());
            }
            status.clone()
        };

        trace!(state = %snapshot.state, "Poll status change");
        let _ = self.sink.send(TransportEvent::StatusChange(snapshot));
    }
}

/// Pull-transport fallback driven by a background task.
///
/// Starting an already running manager is a no-op; stopping is
/// idempotent. The cursor survives stop/start so a restarted poller
/// does not replay the whole session history.
pub struct PollingManager {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingManager {
    /// Creates a manager; no polling happens until
    /// [`PollingManager::start`].
    ///
    /// The dedup window is shared with the rest of the engine so
    /// transport switches cannot re-deliver an id.
    #[must_use]
    pub fn new(
        config: Arc<WorkerConfig>,
        relay: RelayClient,
        sink: EventSink,
        dedup: Arc<Mutex<DedupWindow>>,
    ) -> Self {
        let interval = config.poll_interval;
        let backoff = Backoff::new(
            config.base_retry_delay,
            config.max_retry_delay,
            config.backoff_multiplier,
        );

        Self {
            shared: Arc::new(Shared {
                config,
                relay,
                sink,
                status: Mutex::new(ConnectionStatus::new(TransportKind::Poll)),
                dedup,
                interval: Mutex::new(interval),
                cursor: Mutex::new(None),
                stopped: AtomicBool::new(true),
                backoff,
            }),
            task: Mutex::new(None),
        }
    }

    /// Returns a snapshot of the current polling status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.lock().clone()
    }

    /// Returns whether the polling task is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Adjusts the steady interval; takes effect on the next cycle.
    pub fn set_interval(&self, interval: Duration) {
        *self.shared.interval.lock() = interval.max(Duration::from_millis(100));
    }

    /// Starts the polling loop. No-op if already running.
    pub fn start(&self) {
        if !self.shared.stopped.swap(false, Ordering::SeqCst) {
            return;
        }

        debug!(interval_ms = self.shared.interval.lock().as_millis() as u64, "Polling started");
        self.shared.set_state(ConnectionState::Connecting, None);

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            Self::run_loop(shared).await;
        });
        *self.task.lock() = Some(handle);
    }

    /// Stops the polling loop. Idempotent; the cursor is kept.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }

        {
            let mut status = self.shared.status.lock();
            status.reset();
        }
        self.shared.set_state(ConnectionState::Disconnected, None);

        debug!("Polling stopped");
    }

    /// The polling cycle: poll, pace, repeat. Failures stretch the
    /// pacing; they never terminate the loop.
    async fn run_loop(shared: Arc<Shared>) {
        let mut error_streak: u32 = 0;

        loop {
            if shared.stopped.load(Ordering::SeqCst) {
                return;
            }

            match Self::poll_once(&shared).await {
                Ok(delivered) => {
                    if error_streak > 0 {
                        debug!("Polling recovered");
                    }
                    error_streak = 0;
                    shared.set_state(ConnectionState::Connected, None);
                    if delivered > 0 {
                        debug!(delivered, "Poll batch delivered");
                    }
                }
                Err(e) => {
                    error_streak = error_streak.saturating_add(1);
                    warn!(error = %e, streak = error_streak, "Poll cycle failed");
                    shared.set_state(ConnectionState::Error, Some(e.to_string()));
                    let _ = shared.sink.send(TransportEvent::Error(e));
                }
            }

            // Errors stretch the pacing up to the retry ceiling; past
            // it the loop settles back on the steady interval rather
            // than giving up.
            let steady = *shared.interval.lock();
            let delay = if error_streak == 0 || error_streak > shared.config.max_retry_attempts {
                steady
            } else {
                shared.backoff.delay(error_streak).max(steady)
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// One poll cycle. Returns how many fresh requests were delivered.
    async fn poll_once(shared: &Arc<Shared>) -> crate::error::Result<usize> {
        let after = shared.cursor.lock().clone();
        let batch = shared
            .relay
            .poll(&shared.config.session_code, after.as_deref())
            .await?;

        if batch.is_empty() {
            return Ok(0);
        }

        // Advance the cursor before delivery; the relay has already
        // handed these over and will not resend them.
        let next_cursor = batch
            .last_request_id
            .clone()
            .or_else(|| batch.requests.last().map(|r| r.id.to_string()));
        if let Some(cursor) = next_cursor {
            *shared.cursor.lock() = Some(cursor);
        }

        let mut delivered = 0;
        for request in batch.requests {
            let fresh = shared.dedup.lock().insert(request.id.as_str());
            if !fresh {
                trace!(id = %request.id, "Duplicate request dropped");
                continue;
            }

            debug!(id = %request.id, tool = %request.tool, "Tool request via poll");
            let _ = shared
                .sink
                .send(TransportEvent::Request(request, TransportKind::Poll));
            delivered += 1;
        }

        Ok(delivered)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;
    use url::Url;

    fn manager() -> (PollingManager, mpsc::UnboundedReceiver<TransportEvent>) {
        let config = Arc::new(WorkerConfig::new("https://relay.example.com", "ABC123"));
        let relay =
            RelayClient::new(Url::parse("https://relay.example.com").expect("url")).expect("client");
        let (tx, rx) = mpsc::unbounded_channel();
        let dedup = Arc::new(Mutex::new(DedupWindow::default()));
        (PollingManager::new(config, relay, tx, dedup), rx)
    }

    #[test]
    fn test_dedup_insert_and_contains() {
        let mut window = DedupWindow::new(8);

        assert!(window.insert("r1"));
        assert!(!window.insert("r1"));
        assert!(window.contains("r1"));
        assert!(!window.contains("r2"));
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_dedup_evicts_oldest_first() {
        let mut window = DedupWindow::new(3);

        assert!(window.insert("a"));
        assert!(window.insert("b"));
        assert!(window.insert("c"));
        assert!(window.insert("d"));

        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
        assert!(window.contains("d"));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn test_dedup_evicted_id_accepted_again() {
        let mut window = DedupWindow::new(2);

        assert!(window.insert("a"));
        assert!(window.insert("b"));
        assert!(window.insert("c"));

        // "a" fell out of the window, so it reads as fresh.
        assert!(window.insert("a"));
    }

    #[test]
    fn test_dedup_zero_capacity_clamped() {
        let mut window = DedupWindow::new(0);
        assert!(window.insert("a"));
        assert!(!window.insert("a"));
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (manager, _rx) = manager();

        assert!(!manager.is_running());
        manager.start();
        assert!(manager.is_running());

        // Second start is a no-op.
        manager.start();
        assert!(manager.is_running());

        manager.stop();
        assert!(!manager.is_running());
        assert_eq!(manager.status().state, ConnectionState::Disconnected);

        // Second stop is a no-op.
        manager.stop();
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_cursor_survives_stop() {
        let (manager, _rx) = manager();

        *manager.shared.cursor.lock() = Some("r42".to_string());
        manager.start();
        manager.stop();

        assert_eq!(manager.shared.cursor.lock().as_deref(), Some("r42"));
    }

    #[tokio::test]
    async fn test_set_interval_floors_at_100ms() {
        let (manager, _rx) = manager();

        manager.set_interval(Duration::from_millis(1));
        assert_eq!(*manager.shared.interval.lock(), Duration::from_millis(100));

        manager.set_interval(Duration::from_secs(10));
        assert_eq!(*manager.shared.interval.lock(), Duration::from_secs(10));
    }
}
