//! Worker orchestration: transports in, responses out.
//!
//! [`BrowserWorker`] wires every component together and runs the event
//! pump that moves requests from transport to queue to relay response.
//!
//! # Transport policy
//!
//! The transports are exclusive. Push is preferred; polling starts
//! after the push stream has failed `push_failure_threshold` times in a
//! row, or immediately once push exhausts its reconnect attempts, and
//! stops again the moment push recovers. The shared dedup window
//! absorbs any request the relay delivers through both paths during a
//! switch.
//!
//! # Delivery guarantee
//!
//! Every request that reaches the pump produces exactly one response
//! posted to the relay: success, structured failure, timeout, or
//! cancellation. Nothing is dropped silently.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::executor::{CommandPort, ToolExecutor};
use crate::handler::{BrowserWorkerError, ErrorAction, ErrorCategory, ErrorHandlerChain};
use crate::parser::ToolRequestParser;
use crate::protocol::{ResponseError, ToolRequest, ToolResponse};
use crate::queue::{ExecutionQueue, QueueStats};
use crate::relay::RelayClient;
use crate::schema::SchemaRegistry;
use crate::transport::{
    Backoff, ConnectionManager, ConnectionState, ConnectionStatus, DedupWindow, PollingManager,
    TransportEvent, TransportKind,
};

// ============================================================================
// WorkerStatus
// ============================================================================

/// Snapshot of the whole engine for host introspection.
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    /// Whether the worker has been started and not shut down.
    pub running: bool,
    /// Push transport status.
    pub push: ConnectionStatus,
    /// Poll transport status.
    pub poll: ConnectionStatus,
    /// Queue statistics.
    pub queue: QueueStats,
    /// Breaker statistics for the host port.
    pub breaker: CircuitBreakerStats,
}

// ============================================================================
// BrowserWorker
// ============================================================================

struct Inner {
    config: Arc<WorkerConfig>,
    relay: RelayClient,
    parser: ToolRequestParser,
    queue: Arc<ExecutionQueue>,
    executor: ToolExecutor,
    breaker: Arc<CircuitBreaker>,
    chain: ErrorHandlerChain,
    push: ConnectionManager,
    poll: PollingManager,
    dedup: Arc<Mutex<DedupWindow>>,
    running: AtomicBool,
    push_failures: AtomicU32,
}

/// The browser-resident worker engine.
pub struct BrowserWorker {
    inner: Arc<Inner>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BrowserWorker {
    /// Builds a worker from a validated configuration and a host port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] or [`Error::InvalidBaseUrl`] when the
    /// configuration is unusable.
    pub fn new(config: WorkerConfig, port: Arc<dyn CommandPort>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let relay = RelayClient::new(config.base_url()?)?;
        let (sink, events) = mpsc::unbounded_channel();
        let dedup = Arc::new(Mutex::new(DedupWindow::default()));

        let push = ConnectionManager::new(Arc::clone(&config), relay.clone(), sink.clone());
        let poll = PollingManager::new(
            Arc::clone(&config),
            relay.clone(),
            sink,
            Arc::clone(&dedup),
        );

        let queue = Arc::new(ExecutionQueue::new(
            config.max_queue_size,
            config.request_timeout,
        ));
        let breaker = Arc::new(CircuitBreaker::new("host", CircuitBreakerConfig::default()));
        let executor = ToolExecutor::new(
            Arc::clone(&config),
            Arc::clone(&queue),
            port,
            Arc::clone(&breaker),
        );

        let backoff = Backoff::new(
            config.base_retry_delay,
            config.max_retry_delay,
            config.backoff_multiplier,
        );
        let chain = ErrorHandlerChain::new(backoff);

        let parser = ToolRequestParser::new(
            Arc::new(SchemaRegistry::builtin()),
            config.allow_unknown_tools,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                relay,
                parser,
                queue,
                executor,
                breaker,
                chain,
                push,
                poll,
                dedup,
                running: AtomicBool::new(false),
                push_failures: AtomicU32::new(0),
            }),
            events: Mutex::new(Some(events)),
            pump: Mutex::new(None),
        })
    }

    /// Returns a status snapshot.
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            push: self.inner.push.status(),
            poll: self.inner.poll.status(),
            queue: self.inner.queue.stats(),
            breaker: self.inner.breaker.stats(),
        }
    }

    /// Starts the engine: executor, event pump, then the push stream.
    ///
    /// A push connection failure is not fatal; the push transport is
    /// torn down and the worker falls back to polling. Authentication
    /// rejection is fatal.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if already running
    /// - [`Error::Authentication`] when the relay rejects the session
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(Error::connection("worker already running"));
        }

        let Some(events) = self.events.lock().take() else {
            self.inner.running.store(false, Ordering::SeqCst);
            return Err(Error::connection("worker cannot be restarted"));
        };

        info!(
            session = self.inner.config.session_code.as_str(),
            "Starting worker"
        );

        self.inner.executor.start();

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            Self::pump(inner, events).await;
        });
        *self.pump.lock() = Some(handle);

        match self.inner.push.connect().await {
            Ok(()) => {
                info!("Push transport established");
                Ok(())
            }
            Err(e) if matches!(e, Error::Authentication { .. }) => {
                error!(error = %e, "Session rejected");
                self.shutdown();
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Push unavailable; falling back to polling");
                // The reader task may still be alive after a ready
                // timeout; the transports are exclusive, so stop it
                // before the poller takes over.
                self.inner.push.disconnect();
                self.inner.poll.start();
                Ok(())
            }
        }
    }

    /// Stops transports, rejects pending work, and halts the pump.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down worker");

        self.inner.push.disconnect();
        self.inner.poll.stop();
        self.inner.executor.stop();

        let cleared = self.inner.queue.clear("worker shutdown");
        if cleared > 0 {
            debug!(cleared, "Pending requests cancelled");
        }

        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
    }

    /// The event pump: one task consuming both transports.
    async fn pump(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Request(request, origin) => {
                    Self::handle_request(&inner, request, origin);
                }
                TransportEvent::StatusChange(status) => {
                    Self::handle_status(&inner, &status);
                }
                TransportEvent::Error(err) => {
                    Self::handle_transport_error(&inner, &err);
                }
                TransportEvent::Message(envelope) => {
                    // Envelopes are informational; requests arrive as
                    // their own events.
                    if inner.config.debug {
                        debug!(kind = %envelope.kind, "Stream message");
                    }
                }
            }
        }
    }

    /// Validates, enqueues, and arranges the response for one request.
    fn handle_request(inner: &Arc<Inner>, request: ToolRequest, origin: TransportKind) {
        // The poller inserts ids into the shared window before emitting,
        // so only push-origin requests are checked here. The window
        // catches replays across transport switches either way.
        if origin == TransportKind::Push {
            let fresh = inner.dedup.lock().insert(request.id.as_str());
            if !fresh {
                debug!(id = %request.id, "Duplicate request dropped");
                return;
            }
        }

        let raw = match serde_json::to_value(&request) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id = %request.id, error = %e, "Request not serializable");
                return;
            }
        };

        let validated = match inner.parser.parse_value(&raw) {
            Ok(validated) => validated,
            Err(parse_err) => {
                warn!(id = %request.id, error = %parse_err, "Request rejected by parser");
                let response = ToolResponse::failure(
                    request.id.clone(),
                    ResponseError::new(parse_err.code.to_string(), parse_err.message.clone()),
                    0,
                );
                Self::spawn_post(inner, response);
                return;
            }
        };

        let receiver = match inner.queue.enqueue(validated) {
            Ok(receiver) => receiver,
            Err(e) => {
                let response = ToolResponse::from_error(request.id.clone(), &e, 0);
                Self::spawn_post(inner, response);
                return;
            }
        };

        let inner = Arc::clone(inner);
        let request_id = request.id;
        tokio::spawn(async move {
            let response = match receiver.await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => ToolResponse::from_error(request_id, &e, 0),
                Err(_) => ToolResponse::from_error(
                    request_id,
                    &Error::cancelled("executor dropped the request"),
                    0,
                ),
            };
            Self::post(&inner, response).await;
        });
    }

    /// Reacts to transport status transitions (failover policy).
    fn handle_status(inner: &Arc<Inner>, status: &ConnectionStatus) {
        if status.transport != TransportKind::Push {
            return;
        }

        match status.state {
            ConnectionState::Connected => {
                inner.push_failures.store(0, Ordering::SeqCst);
                inner.chain.reset("push");
                if inner.poll.is_running() {
                    info!("Push recovered; stopping polling fallback");
                    inner.poll.stop();
                }
            }
            ConnectionState::Error => {
                let failures = inner.push_failures.fetch_add(1, Ordering::SeqCst) + 1;
                // A retry count past the ceiling means the reader task
                // has given up for good; waiting out the threshold
                // would leave the worker with no transport at all.
                let exhausted = status.retry_count > inner.config.max_retry_attempts;
                if (exhausted || failures >= inner.config.push_failure_threshold)
                    && !inner.poll.is_running()
                {
                    warn!(failures, exhausted, "Push failing; starting polling fallback");
                    inner.poll.start();
                }
            }
            _ => {}
        }
    }

    /// Routes a transport error through the handler chain.
    fn handle_transport_error(inner: &Arc<Inner>, err: &Error) {
        let component = if inner.poll.is_running() { "poll" } else { "push" };
        let classified = BrowserWorkerError::classify(err, component);
        let outcome = inner.chain.handle(&classified);

        match outcome.action {
            ErrorAction::Shutdown => {
                error!(id = %classified.id, "Fatal error; stopping transports");
                inner.push.disconnect();
                inner.poll.stop();
                inner.executor.stop();
                inner.queue.clear("fatal error");
                inner.running.store(false, Ordering::SeqCst);
            }
            ErrorAction::Failover => {
                if !inner.poll.is_running() {
                    warn!(id = %classified.id, "Failing over to polling");
                    inner.poll.start();
                }
            }
            ErrorAction::Escalate => {
                error!(id = %classified.id, category = %classified.category,
                    message = %classified.message, "Error escalated");
                // A rejected session never becomes valid again; keep
                // the relay from hammering it with doomed reconnects.
                if classified.category == ErrorCategory::Authentication {
                    inner.push.disconnect();
                    inner.poll.stop();
                }
            }
            ErrorAction::Retry | ErrorAction::Ignore => {
                // Transports retry on their own schedule; nothing to do
                // beyond the classification record.
            }
        }
    }

    /// Posts one response, folding post failures into the chain.
    async fn post(inner: &Arc<Inner>, response: ToolResponse) {
        if let Err(e) = inner
            .relay
            .post_response(&inner.config.session_code, &response)
            .await
        {
            warn!(request_id = %response.request_id, error = %e, "Failed to post response");
            let classified =
                BrowserWorkerError::classify(&e, "relay").with_request_id(response.request_id);
            inner.chain.handle(&classified);
        }
    }

    fn spawn_post(inner: &Arc<Inner>, response: ToolResponse) {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            Self::post(&inner, response).await;
        });
    }
}

impl Drop for BrowserWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;

    use crate::executor::port::MockPort;
    use crate::identifiers::RequestId;

    fn config() -> WorkerConfig {
        WorkerConfig::new("https://relay.example.com", "ABC123")
    }

    fn worker() -> BrowserWorker {
        BrowserWorker::new(config(), Arc::new(MockPort::new())).expect("worker")
    }

    fn request(id: &str, tool: &str, args: serde_json::Value) -> ToolRequest {
        let serde_json::Value::Object(map) = args else {
            panic!("args must be an object");
        };
        ToolRequest::new(RequestId::new(id), tool, map)
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let bad = WorkerConfig::new("not a url", "ABC123");
        let result = BrowserWorker::new(bad, Arc::new(MockPort::new()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_initial_status() {
        let worker = worker();
        let status = worker.status();

        assert!(!status.running);
        assert_eq!(status.push.state, ConnectionState::Disconnected);
        assert_eq!(status.poll.state, ConnectionState::Disconnected);
        assert_eq!(status.queue.queued, 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_dropped_before_queue() {
        let worker = worker();
        let inner = &worker.inner;

        let first = request("r1", "get_data_contexts", json!({}));
        let second = request("r1", "get_data_contexts", json!({}));

        BrowserWorker::handle_request(inner, first, TransportKind::Push);
        assert_eq!(inner.queue.len(), 1);

        BrowserWorker::handle_request(inner, second, TransportKind::Push);
        assert_eq!(inner.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_valid_request_enqueued() {
        let worker = worker();
        let inner = &worker.inner;

        let req = request("r1", "create_data_context", json!({"name": "Tasks"}));
        BrowserWorker::handle_request(inner, req, TransportKind::Push);

        assert_eq!(inner.queue.len(), 1);
        let item = inner.queue.dequeue().expect("item");
        assert_eq!(item.request.tool, "create_data_context");
    }

    #[tokio::test]
    async fn test_invalid_request_not_enqueued() {
        let worker = worker();
        let inner = &worker.inner;

        // Missing required "name" argument.
        let req = request("r1", "create_data_context", json!({}));
        BrowserWorker::handle_request(inner, req, TransportKind::Push);

        assert_eq!(inner.queue.len(), 0);
    }

    #[tokio::test]
    async fn test_push_failures_trigger_poll_fallback() {
        let worker = worker();
        let inner = &worker.inner;

        let mut status = ConnectionStatus::new(TransportKind::Push);
        status.state = ConnectionState::Error;

        for _ in 0..inner.config.push_failure_threshold {
            BrowserWorker::handle_status(inner, &status);
        }

        assert!(inner.poll.is_running());
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_push_retry_exhaustion_fails_over_immediately() {
        let worker = worker();
        let inner = &worker.inner;

        // The reader task's terminal status: retries exhausted, task
        // gone. A single such event must start the poller.
        let mut status = ConnectionStatus::new(TransportKind::Push);
        status.state = ConnectionState::Error;
        status.retry_count = inner.config.max_retry_attempts + 1;
        status.error = Some("automatic retry exhausted".to_string());

        BrowserWorker::handle_status(inner, &status);

        assert!(inner.poll.is_running());
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_start_falls_back_to_polling_when_push_unreachable() {
        let config = WorkerConfig::new("http://127.0.0.1:1", "ABC123")
            .with_max_retry_attempts(1)
            .with_base_retry_delay(Duration::from_millis(10))
            .with_max_retry_delay(Duration::from_millis(20))
            .with_poll_interval(Duration::from_secs(30));
        let worker = BrowserWorker::new(config, Arc::new(MockPort::new())).expect("worker");

        worker.start().await.expect("fallback start");

        // Exactly one transport is active: polling.
        assert!(worker.inner.poll.is_running());
        assert_eq!(worker.status().push.state, ConnectionState::Disconnected);
        worker.shutdown();
    }

    #[tokio::test]
    async fn test_push_recovery_stops_polling() {
        let worker = worker();
        let inner = &worker.inner;

        inner.poll.start();
        assert!(inner.poll.is_running());

        let mut status = ConnectionStatus::new(TransportKind::Push);
        status.state = ConnectionState::Connected;
        BrowserWorker::handle_status(inner, &status);

        assert!(!inner.poll.is_running());
        assert_eq!(inner.push_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_poll_status_does_not_drive_failover() {
        let worker = worker();
        let inner = &worker.inner;

        let mut status = ConnectionStatus::new(TransportKind::Poll);
        status.state = ConnectionState::Error;

        for _ in 0..10 {
            BrowserWorker::handle_status(inner, &status);
        }

        assert!(!inner.poll.is_running());
        assert_eq!(inner.push_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fatal_transport_error_stops_engine() {
        let worker = worker();
        let inner = &worker.inner;
        inner.running.store(true, Ordering::SeqCst);
        inner.executor.start();

        BrowserWorker::handle_transport_error(inner, &Error::config("broken"));

        assert!(!inner.running.load(Ordering::SeqCst));
        assert!(!inner.executor.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_idempotent_and_clears_queue() {
        let worker = worker();
        let inner = &worker.inner;
        inner.running.store(true, Ordering::SeqCst);

        let req = request("r1", "get_data_contexts", json!({}));
        BrowserWorker::handle_request(inner, req, TransportKind::Push);
        assert_eq!(inner.queue.len(), 1);

        worker.shutdown();
        worker.shutdown();

        assert!(!worker.status().running);
        assert_eq!(inner.queue.len(), 0);
    }
}
