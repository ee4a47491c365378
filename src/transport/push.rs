//! Push stream lifecycle and reconnection.
//!
//! [`ConnectionManager`] owns the primary transport: a long-lived SSE
//! stream from the relay. It spawns a reader task that assembles
//! frames, watches heartbeats, and reconnects with exponential backoff.
//!
//! # State Machine
//!
//! ```text
//! DISCONNECTED ─connect()─► CONNECTING ─"connected" event─► CONNECTED
//!       ▲                                                      │
//!       │ disconnect() (any state)      heartbeat timeout or   │
//!       │                               transport error        ▼
//!       └───────────── RECONNECTING ◄──schedule retry──────  ERROR
//!                            └──────successful re-open──► CONNECTED
//! ```
//!
//! `connect()` resolves only after the relay's explicit `connected`
//! event — an open socket is not application-level readiness.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::protocol::StreamEvent;
use crate::protocol::event::StreamEventKind;
use crate::relay::RelayClient;

use super::sse::{SseFrame, SseParser};
use super::{Backoff, ConnectionState, ConnectionStatus, EventSink, TransportEvent, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for the relay's `connected` confirmation after `connect()`.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

/// Why a stream session ended.
enum StreamExit {
    /// `disconnect()` was called.
    Shutdown,
    /// The stream failed and may be retried.
    Failed(Error),
}

/// What to do with the stream after a frame.
enum FrameOutcome {
    Continue,
    Stop(Error),
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the manager handle and its reader task.
struct Shared {
    config: Arc<WorkerConfig>,
    relay: RelayClient,
    status: Mutex<ConnectionStatus>,
    sink: EventSink,
    shutdown: AtomicBool,
    last_heartbeat: Mutex<Instant>,
    backoff: Backoff,
}

impl Shared {
    /// Applies a state transition and emits `status-change`.
    fn set_state(&self, state: ConnectionState, error: Option<String>) {
        let snapshot = {
            let mut status = self.status.lock();
            status.state = state;
            status.error = error;
            if state == ConnectionState::Connected {
                status.retry_count = 0;
                status.last_connected = Some(crate::protocol::epoch_ms());
            }
            status.clone()
        };

        trace!(state = %snapshot.state, "Push status change");
        let _ = self.sink.send(TransportEvent::StatusChange(snapshot));
    }

    /// Emits a transport error event.
    fn emit_error(&self, error: Error) {
        let _ = self.sink.send(TransportEvent::Error(error));
    }

    /// Handles one assembled SSE frame.
    ///
    /// `ready` is the pending `connect()` waiter; taken on the first
    /// `connected` event.
    fn process_frame(
        &self,
        frame: SseFrame,
        ready: &mut Option<oneshot::Sender<Result<()>>>,
    ) -> FrameOutcome {
        let data: Value = if frame.data.is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&frame.data) {
                Ok(value) => value,
                Err(e) => {
                    warn!(event = %frame.event, "Dropping frame with malformed payload");
                    self.emit_error(Error::parsing(format!(
                        "malformed {} payload: {e}",
                        frame.event
                    )));
                    return FrameOutcome::Continue;
                }
            }
        };

        let event = StreamEvent::new(frame.event, data);
        let kind = event.kind();

        match kind {
            StreamEventKind::Connected => {
                *self.last_heartbeat.lock() = Instant::now();
                self.set_state(ConnectionState::Connected, None);
                debug!(code = %event.get_string("code"), "Relay confirmed connection");

                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }

            StreamEventKind::Heartbeat => {
                *self.last_heartbeat.lock() = Instant::now();
                trace!("Heartbeat");
            }

            StreamEventKind::ToolRequest => match event.tool_request() {
                Ok(request) => {
                    debug!(id = %request.id, tool = %request.tool, "Tool request via push");
                    let envelope = event.clone().into_envelope();
                    let _ = self.sink.send(TransportEvent::Message(envelope));
                    let _ = self
                        .sink
                        .send(TransportEvent::Request(request, TransportKind::Push));
                    return FrameOutcome::Continue;
                }
                Err(e) => {
                    self.emit_error(e);
                    return FrameOutcome::Continue;
                }
            },

            StreamEventKind::Error => {
                let message = match event.get_string("message") {
                    m if m.is_empty() => event.get_string("error"),
                    m => m,
                };
                warn!(%message, "Relay reported stream error");
                self.emit_error(Error::connection(message));
            }

            StreamEventKind::Timeout => {
                let envelope = event.into_envelope();
                let _ = self.sink.send(TransportEvent::Message(envelope));
                return FrameOutcome::Stop(Error::connection("relay closed session for inactivity"));
            }

            StreamEventKind::Unknown => {
                debug!(name = %event.name, "Unrecognized stream event");
            }
        }

        let envelope = event.into_envelope();
        let _ = self.sink.send(TransportEvent::Message(envelope));
        FrameOutcome::Continue
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Owns the push transport lifecycle.
///
/// # Thread Safety
///
/// `ConnectionManager` is `Send + Sync`; the reader task runs
/// independently and communicates through the shared event sink.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Creates a manager; no connection is attempted until
    /// [`ConnectionManager::connect`].
    #[must_use]
    pub fn new(config: Arc<WorkerConfig>, relay: RelayClient, sink: EventSink) -> Self {
        let backoff = Backoff::new(
            config.base_retry_delay,
            config.max_retry_delay,
            config.backoff_multiplier,
        );

        Self {
            shared: Arc::new(Shared {
                config,
                relay,
                status: Mutex::new(ConnectionStatus::new(TransportKind::Push)),
                sink,
                shutdown: AtomicBool::new(false),
                last_heartbeat: Mutex::new(Instant::now()),
                backoff,
            }),
            task: Mutex::new(None),
        }
    }

    /// Returns a snapshot of the current connection status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.lock().clone()
    }

    /// Establishes the push stream.
    ///
    /// Resolves only after the relay emits its `connected` event; the
    /// reader task then keeps running (and reconnecting) until
    /// [`ConnectionManager::disconnect`].
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if already connected or retries give up
    /// - [`Error::ConnectionTimeout`] if no `connected` event arrives
    pub async fn connect(&self) -> Result<()> {
        {
            let task = self.task.lock();
            if task.as_ref().is_some_and(|t| !t.is_finished()) {
                return Err(Error::connection("push transport already active"));
            }
        }

        self.shared.shutdown.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting, None);

        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            Self::run_loop(shared, ready_tx).await;
        });
        *self.task.lock() = Some(handle);

        match timeout(READY_TIMEOUT, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::connection_timeout(READY_TIMEOUT.as_millis() as u64)),
        }
    }

    /// Tears down the stream and cancels all timers.
    ///
    /// Idempotent; forces any state to `Disconnected` and resets the
    /// retry counter.
    pub fn disconnect(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);

        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }

        {
            let mut status = self.shared.status.lock();
            status.reset();
        }
        self.shared
            .set_state(ConnectionState::Disconnected, None);

        debug!("Push transport disconnected");
    }

    /// Reconnect loop: one stream session per iteration, backoff in
    /// between.
    async fn run_loop(shared: Arc<Shared>, ready_tx: oneshot::Sender<Result<()>>) {
        let mut ready = Some(ready_tx);

        loop {
            match Self::run_stream(&shared, &mut ready).await {
                StreamExit::Shutdown => {
                    debug!("Push reader shut down");
                    return;
                }
                StreamExit::Failed(err) => {
                    error!(error = %err, "Push stream failed");
                    // Every failed session surfaces as an Error status;
                    // the worker counts these toward poll fallback.
                    shared.set_state(ConnectionState::Error, Some(err.to_string()));
                    shared.emit_error(err);
                }
            }

            if shared.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let retry = {
                let mut status = shared.status.lock();
                status.retry_count += 1;
                status.retry_count
            };

            if retry > shared.config.max_retry_attempts {
                warn!(retry, "Push retries exhausted; giving up");
                shared.set_state(
                    ConnectionState::Error,
                    Some("automatic retry exhausted".to_string()),
                );
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(Error::connection("push retries exhausted")));
                }
                return;
            }

            let delay = shared.backoff.delay(retry);
            shared.set_state(ConnectionState::Reconnecting, None);
            debug!(retry, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
            tokio::time::sleep(delay).await;
        }
    }

    /// Runs one stream session until it fails or shutdown is requested.
    async fn run_stream(
        shared: &Arc<Shared>,
        ready: &mut Option<oneshot::Sender<Result<()>>>,
    ) -> StreamExit {
        let response = match shared.relay.open_stream(&shared.config.session_code).await {
            Ok(response) => response,
            Err(e) => return StreamExit::Failed(e),
        };

        debug!("Push stream open; waiting for connected event");
        *shared.last_heartbeat.lock() = Instant::now();

        let mut bytes = response.bytes_stream();
        let mut parser = SseParser::new();
        let mut watchdog = tokio::time::interval(shared.config.heartbeat_check_interval);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        watchdog.tick().await;

        loop {
            if shared.shutdown.load(Ordering::SeqCst) {
                return StreamExit::Shutdown;
            }

            tokio::select! {
                chunk = bytes.next() => {
                    match chunk {
                        Some(Ok(chunk)) => {
                            for frame in parser.push(&chunk) {
                                match shared.process_frame(frame, ready) {
                                    FrameOutcome::Continue => {}
                                    FrameOutcome::Stop(err) => return StreamExit::Failed(err),
                                }
                            }
                        }
                        Some(Err(e)) => {
                            return StreamExit::Failed(Error::connection(format!(
                                "stream read failed: {e}"
                            )));
                        }
                        None => {
                            return StreamExit::Failed(Error::ConnectionClosed);
                        }
                    }
                }

                _ = watchdog.tick() => {
                    let elapsed = shared.last_heartbeat.lock().elapsed();
                    if elapsed > shared.config.heartbeat_timeout {
                        // The transport reported nothing; a stalled
                        // stream only shows up as silence.
                        let err = Error::heartbeat_timeout(elapsed.as_millis() as u64);
                        return StreamExit::Failed(err);
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio::sync::mpsc;
    use url::Url;

    fn manager_with_sink() -> (
        ConnectionManager,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let config = Arc::new(WorkerConfig::new("https://relay.example.com", "ABC123"));
        let relay =
            RelayClient::new(Url::parse("https://relay.example.com").expect("url")).expect("client");
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionManager::new(config, relay, tx), rx)
    }

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
            id: None,
        }
    }

    #[tokio::test]
    async fn test_initial_status() {
        let (manager, _rx) = manager_with_sink();
        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.transport, TransportKind::Push);
        assert_eq!(status.retry_count, 0);
    }

    #[tokio::test]
    async fn test_connected_event_resolves_ready_and_sets_state() {
        let (manager, mut rx) = manager_with_sink();
        let shared = Arc::clone(&manager.shared);

        let (tx, ready_rx) = oneshot::channel();
        let mut ready = Some(tx);

        let outcome = shared.process_frame(
            frame("connected", r#"{"code":"ABC123","message":"ready","timestamp":1}"#),
            &mut ready,
        );
        assert!(matches!(outcome, FrameOutcome::Continue));
        assert!(ready.is_none());
        assert!(ready_rx.await.expect("signalled").is_ok());

        assert_eq!(manager.status().state, ConnectionState::Connected);
        assert!(manager.status().last_connected.is_some());

        // Status change then message envelope.
        let first = rx.recv().await.expect("event");
        assert!(matches!(
            first,
            TransportEvent::StatusChange(ConnectionStatus {
                state: ConnectionState::Connected,
                ..
            })
        ));
        let second = rx.recv().await.expect("event");
        match second {
            TransportEvent::Message(envelope) => assert_eq!(envelope.kind, "connected"),
            other => panic!("expected message envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_request_frame_emits_request() {
        let (manager, mut rx) = manager_with_sink();
        let shared = Arc::clone(&manager.shared);
        let mut ready = None;

        let payload = json!({
            "id": "r1",
            "tool": "create_data_context",
            "args": { "name": "X" },
            "timestamp": 1i64
        })
        .to_string();

        let outcome = shared.process_frame(frame("tool-request", &payload), &mut ready);
        assert!(matches!(outcome, FrameOutcome::Continue));

        let first = rx.recv().await.expect("event");
        assert!(matches!(first, TransportEvent::Message(_)));

        let second = rx.recv().await.expect("event");
        match second {
            TransportEvent::Request(request, kind) => {
                assert_eq!(request.id.as_str(), "r1");
                assert_eq!(request.tool, "create_data_context");
                assert_eq!(kind, TransportKind::Push);
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_payload_emits_error_only() {
        let (manager, mut rx) = manager_with_sink();
        let shared = Arc::clone(&manager.shared);
        let mut ready = None;

        let outcome = shared.process_frame(frame("tool-request", "{broken"), &mut ready);
        assert!(matches!(outcome, FrameOutcome::Continue));

        let event = rx.recv().await.expect("event");
        assert!(matches!(event, TransportEvent::Error(Error::Parsing { .. })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_updates_watchdog_clock() {
        let (manager, _rx) = manager_with_sink();
        let shared = Arc::clone(&manager.shared);
        let mut ready = None;

        *shared.last_heartbeat.lock() = Instant::now() - Duration::from_secs(600);
        shared.process_frame(frame("heartbeat", r#"{"timestamp":5}"#), &mut ready);

        assert!(shared.last_heartbeat.lock().elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_timeout_event_stops_stream() {
        let (manager, _rx) = manager_with_sink();
        let shared = Arc::clone(&manager.shared);
        let mut ready = None;

        let outcome = shared.process_frame(frame("timeout", "{}"), &mut ready);
        assert!(matches!(outcome, FrameOutcome::Stop(_)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_resets() {
        let (manager, mut rx) = manager_with_sink();

        {
            let mut status = manager.shared.status.lock();
            status.state = ConnectionState::Error;
            status.retry_count = 3;
        }

        manager.disconnect();
        manager.disconnect();

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.retry_count, 0);

        // At least one status-change event was emitted.
        let event = rx.recv().await.expect("event");
        assert!(matches!(event, TransportEvent::StatusChange(_)));
    }

    #[tokio::test]
    async fn test_failed_sessions_emit_error_status_each_cycle() {
        let config = Arc::new(
            WorkerConfig::new("http://127.0.0.1:1", "ABC123")
                .with_max_retry_attempts(1)
                .with_base_retry_delay(Duration::from_millis(10))
                .with_max_retry_delay(Duration::from_millis(20)),
        );
        let relay =
            RelayClient::new(Url::parse("http://127.0.0.1:1").expect("url")).expect("client");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(config, relay, tx);

        // Nothing listens on port 1; every session fails immediately.
        let result = manager.connect().await;
        assert!(matches!(result, Err(Error::Connection { .. })));

        let mut error_states = 0;
        while let Ok(event) = rx.try_recv() {
            if let TransportEvent::StatusChange(status) = event
                && status.state == ConnectionState::Error
            {
                error_states += 1;
            }
        }
        // One per failed session plus the terminal give-up.
        assert!(error_states >= 2, "saw {error_states} error statuses");
    }

    #[tokio::test]
    async fn test_connect_rejected_when_active() {
        let (manager, _rx) = manager_with_sink();

        // Fake an active reader task.
        *manager.task.lock() = Some(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));

        let result = manager.connect().await;
        assert!(matches!(result, Err(Error::Connection { .. })));

        manager.disconnect();
    }
}
