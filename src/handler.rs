//! Centralized error classification and handling policy.
//!
//! Transport, queue, and executor failures all funnel through one
//! chain so recovery policy lives in a single place instead of being
//! scattered across call sites. A raw [`Error`] is first classified
//! into a [`BrowserWorkerError`] (category, severity, retryability),
//! then offered to handlers in descending priority order; the first
//! one that accepts it decides the [`ErrorAction`]. A fallback handler
//! accepts everything, so no error ever goes unhandled.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::identifiers::RequestId;
use crate::transport::Backoff;

// ============================================================================
// Constants
// ============================================================================

/// How many classified errors the history retains.
const HISTORY_CAPACITY: usize = 100;

/// Bound on the per-component retry streak map.
const STREAK_CAPACITY: usize = 64;

// ============================================================================
// Classification
// ============================================================================

/// Broad failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Network,
    Timeout,
    Authentication,
    Validation,
    Execution,
    Configuration,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::Timeout => f.write_str("timeout"),
            Self::Authentication => f.write_str("authentication"),
            Self::Validation => f.write_str("validation"),
            Self::Execution => f.write_str("execution"),
            Self::Configuration => f.write_str("configuration"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// How bad it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl Error {
    /// Broad category of this error for the policy table.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } | Self::InvalidBaseUrl { .. } => ErrorCategory::Configuration,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::ConnectionTimeout { .. }
            | Self::HeartbeatTimeout { .. }
            | Self::RequestTimeout { .. } => ErrorCategory::Timeout,
            Self::Connection { .. }
            | Self::ConnectionClosed
            | Self::ServerError { .. }
            | Self::Http(_)
            | Self::Io(_) => ErrorCategory::Network,
            Self::Parsing { .. } | Self::Json(_) | Self::ToolNotFound { .. } => {
                ErrorCategory::Validation
            }
            Self::Execution { .. }
            | Self::Port { .. }
            | Self::Routing { .. }
            | Self::QueueFull { .. }
            | Self::CircuitOpen { .. }
            | Self::Cancelled { .. } => ErrorCategory::Execution,
            Self::ChannelClosed(_) => ErrorCategory::Unknown,
        }
    }

    /// How severely this error should be treated.
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Config { .. } | Self::InvalidBaseUrl { .. } => ErrorSeverity::Critical,
            Self::Authentication { .. } | Self::ChannelClosed(_) => ErrorSeverity::High,
            Self::Parsing { .. }
            | Self::Json(_)
            | Self::ToolNotFound { .. }
            | Self::Cancelled { .. } => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }
}

/// A classified error ready for policy decisions.
#[derive(Debug, Clone)]
pub struct BrowserWorkerError {
    /// Unique id for correlation in logs.
    pub id: Uuid,
    /// Broad category driving the policy table.
    pub category: ErrorCategory,
    /// Severity; `Critical` overrides retry policies.
    pub severity: ErrorSeverity,
    /// Human-readable description.
    pub message: String,
    /// Component that raised the error, e.g. `push`, `executor`.
    pub component: String,
    /// Whether retrying could plausibly succeed.
    pub retryable: bool,
    /// The tool request involved, if any.
    pub request_id: Option<RequestId>,
}

impl BrowserWorkerError {
    /// Classifies a raw error raised by the named component.
    #[must_use]
    pub fn classify(error: &Error, component: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: error.category(),
            severity: error.severity(),
            message: error.to_string(),
            component: component.into(),
            retryable: error.is_retryable(),
            request_id: None,
        }
    }

    /// Attaches the tool request this error belongs to.
    #[must_use]
    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }
}

// ============================================================================
// Handling Policy
// ============================================================================

/// What the worker should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry the failed operation after `retry_delay`.
    Retry,
    /// Surface to the session owner; the worker keeps running.
    Escalate,
    /// The session cannot continue.
    Shutdown,
    /// Log and move on.
    Ignore,
    /// Switch to the fallback transport.
    Failover,
}

/// Outcome of running an error through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorHandlingResult {
    /// Whether a non-fallback handler accepted the error.
    pub handled: bool,
    /// Whether the error should also be reported upstream.
    pub propagate: bool,
    /// Recovery action.
    pub action: ErrorAction,
    /// Delay before retrying, when `action` is `Retry`.
    pub retry_delay: Option<Duration>,
}

/// One policy in the chain.
pub trait ErrorHandler: Send + Sync {
    /// Higher priority handlers are consulted first.
    fn priority(&self) -> i32;

    /// Whether this handler wants the error.
    fn can_handle(&self, error: &BrowserWorkerError) -> bool;

    /// Decides the action. `retry_delay` is filled in by the chain.
    fn handle(&self, error: &BrowserWorkerError) -> ErrorHandlingResult;
}

// ============================================================================
// Builtin Handlers
// ============================================================================

fn result(action: ErrorAction, propagate: bool) -> ErrorHandlingResult {
    ErrorHandlingResult {
        handled: true,
        propagate,
        action,
        retry_delay: None,
    }
}

/// Configuration errors end the session; restarting with the same
/// config would fail identically.
struct ConfigurationHandler;

impl ErrorHandler for ConfigurationHandler {
    fn priority(&self) -> i32 {
        100
    }

    fn can_handle(&self, error: &BrowserWorkerError) -> bool {
        error.category == ErrorCategory::Configuration
    }

    fn handle(&self, error: &BrowserWorkerError) -> ErrorHandlingResult {
        error!(id = %error.id, component = %error.component, message = %error.message,
            "Configuration error; shutting down");
        result(ErrorAction::Shutdown, true)
    }
}

/// Authentication failures are never retried; a rejected session code
/// stays rejected.
struct AuthenticationHandler;

impl ErrorHandler for AuthenticationHandler {
    fn priority(&self) -> i32 {
        90
    }

    fn can_handle(&self, error: &BrowserWorkerError) -> bool {
        error.category == ErrorCategory::Authentication
    }

    fn handle(&self, error: &BrowserWorkerError) -> ErrorHandlingResult {
        error!(id = %error.id, message = %error.message, "Authentication failed");
        result(ErrorAction::Escalate, true)
    }
}

/// Network and timeout errors retry while retryable.
struct NetworkHandler;

impl ErrorHandler for NetworkHandler {
    fn priority(&self) -> i32 {
        80
    }

    fn can_handle(&self, error: &BrowserWorkerError) -> bool {
        matches!(
            error.category,
            ErrorCategory::Network | ErrorCategory::Timeout
        )
    }

    fn handle(&self, error: &BrowserWorkerError) -> ErrorHandlingResult {
        if error.retryable {
            debug!(id = %error.id, component = %error.component, "Transient; will retry");
            result(ErrorAction::Retry, false)
        } else {
            warn!(id = %error.id, message = %error.message, "Non-retryable network error");
            result(ErrorAction::Escalate, true)
        }
    }
}

/// Validation errors are per-request; the offender already got a
/// structured error response.
struct ValidationHandler;

impl ErrorHandler for ValidationHandler {
    fn priority(&self) -> i32 {
        70
    }

    fn can_handle(&self, error: &BrowserWorkerError) -> bool {
        error.category == ErrorCategory::Validation
    }

    fn handle(&self, error: &BrowserWorkerError) -> ErrorHandlingResult {
        debug!(id = %error.id, message = %error.message, "Validation error ignored");
        result(ErrorAction::Ignore, false)
    }
}

/// Execution errors retry unless critical.
struct ExecutionHandler;

impl ErrorHandler for ExecutionHandler {
    fn priority(&self) -> i32 {
        60
    }

    fn can_handle(&self, error: &BrowserWorkerError) -> bool {
        error.category == ErrorCategory::Execution
    }

    fn handle(&self, error: &BrowserWorkerError) -> ErrorHandlingResult {
        if error.severity >= ErrorSeverity::Critical {
            error!(id = %error.id, message = %error.message, "Critical execution error");
            result(ErrorAction::Escalate, true)
        } else if error.retryable {
            result(ErrorAction::Retry, false)
        } else {
            result(ErrorAction::Escalate, true)
        }
    }
}

/// Catches whatever nothing else claimed.
struct FallbackHandler;

impl ErrorHandler for FallbackHandler {
    fn priority(&self) -> i32 {
        i32::MIN
    }

    fn can_handle(&self, _error: &BrowserWorkerError) -> bool {
        true
    }

    fn handle(&self, error: &BrowserWorkerError) -> ErrorHandlingResult {
        warn!(id = %error.id, category = %error.category, message = %error.message,
            "Unclassified error escalated");
        ErrorHandlingResult {
            handled: false,
            propagate: true,
            action: ErrorAction::Escalate,
            retry_delay: None,
        }
    }
}

// ============================================================================
// ErrorHandlerChain
// ============================================================================

/// Priority-ordered handler chain with retry pacing and history.
pub struct ErrorHandlerChain {
    handlers: Vec<Box<dyn ErrorHandler>>,
    backoff: Backoff,
    state: Mutex<ChainState>,
}

struct ChainState {
    history: VecDeque<BrowserWorkerError>,
    category_counts: FxHashMap<ErrorCategory, u64>,
    retry_streaks: FxHashMap<String, u32>,
}

impl ErrorHandlerChain {
    /// Creates a chain with the standard policy handlers.
    #[must_use]
    pub fn new(backoff: Backoff) -> Self {
        let mut chain = Self {
            handlers: Vec::new(),
            backoff,
            state: Mutex::new(ChainState {
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
                category_counts: FxHashMap::default(),
                retry_streaks: FxHashMap::default(),
            }),
        };

        chain.register(Box::new(ConfigurationHandler));
        chain.register(Box::new(AuthenticationHandler));
        chain.register(Box::new(NetworkHandler));
        chain.register(Box::new(ValidationHandler));
        chain.register(Box::new(ExecutionHandler));
        chain.register(Box::new(FallbackHandler));
        chain
    }

    /// Adds a handler, keeping descending priority order.
    pub fn register(&mut self, handler: Box<dyn ErrorHandler>) {
        self.handlers.push(handler);
        self.handlers.sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    /// Runs an error through the chain.
    ///
    /// Retry results get their delay from the per-component streak;
    /// consecutive retries back off exponentially until
    /// [`ErrorHandlerChain::reset`] is called for the component.
    pub fn handle(&self, error: &BrowserWorkerError) -> ErrorHandlingResult {
        self.record(error);

        let handler = self
            .handlers
            .iter()
            .find(|h| h.can_handle(error))
            .unwrap_or_else(|| {
                // The fallback accepts everything; this is unreachable
                // unless the chain was built without it.
                self.handlers.last().expect("chain is never empty")
            });

        let mut outcome = handler.handle(error);

        if outcome.action == ErrorAction::Retry {
            let streak = {
                let mut state = self.state.lock();
                if state.retry_streaks.len() >= STREAK_CAPACITY
                    && !state.retry_streaks.contains_key(&error.component)
                {
                    state.retry_streaks.clear();
                }
                let streak = state.retry_streaks.entry(error.component.clone()).or_insert(0);
                *streak = streak.saturating_add(1);
                *streak
            };
            outcome.retry_delay = Some(self.backoff.delay(streak));
        }

        outcome
    }

    /// Clears a component's retry streak after it recovers.
    pub fn reset(&self, component: &str) {
        self.state.lock().retry_streaks.remove(component);
    }

    /// Number of errors seen in the given category.
    #[must_use]
    pub fn category_count(&self, category: ErrorCategory) -> u64 {
        self.state
            .lock()
            .category_counts
            .get(&category)
            .copied()
            .unwrap_or(0)
    }

    /// Most recent classified errors, oldest first.
    #[must_use]
    pub fn recent_errors(&self) -> Vec<BrowserWorkerError> {
        self.state.lock().history.iter().cloned().collect()
    }

    fn record(&self, error: &BrowserWorkerError) {
        let mut state = self.state.lock();
        if state.history.len() >= HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back(error.clone());
        *state.category_counts.entry(error.category).or_insert(0) += 1;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ErrorHandlerChain {
        ErrorHandlerChain::new(Backoff::new(
            Duration::from_millis(1000),
            Duration::from_secs(30),
            2.0,
        ))
    }

    #[test]
    fn test_classify_categories() {
        let cases = [
            (Error::config("bad url"), ErrorCategory::Configuration),
            (Error::authentication("rejected"), ErrorCategory::Authentication),
            (Error::connection("refused"), ErrorCategory::Network),
            (Error::server_error(502), ErrorCategory::Network),
            (Error::heartbeat_timeout(31_000), ErrorCategory::Timeout),
            (
                Error::request_timeout(RequestId::new("r1"), 30_000),
                ErrorCategory::Timeout,
            ),
            (Error::parsing("bad json"), ErrorCategory::Validation),
            (Error::tool_not_found("nope"), ErrorCategory::Validation),
            (Error::execution("host died"), ErrorCategory::Execution),
            (Error::port("notFound", "missing"), ErrorCategory::Execution),
            (Error::queue_full(100), ErrorCategory::Execution),
        ];

        for (error, expected) in cases {
            let classified = BrowserWorkerError::classify(&error, "test");
            assert_eq!(classified.category, expected, "misclassified: {error}");
        }
    }

    #[test]
    fn test_configuration_shuts_down() {
        let chain = chain();
        let error = BrowserWorkerError::classify(&Error::config("bad"), "config");

        let outcome = chain.handle(&error);
        assert!(outcome.handled);
        assert!(outcome.propagate);
        assert_eq!(outcome.action, ErrorAction::Shutdown);
    }

    #[test]
    fn test_authentication_never_retries() {
        let chain = chain();
        let error = BrowserWorkerError::classify(&Error::authentication("denied"), "push");

        let outcome = chain.handle(&error);
        assert_eq!(outcome.action, ErrorAction::Escalate);
        assert!(outcome.retry_delay.is_none());
    }

    #[test]
    fn test_network_retries_with_growing_delay() {
        let chain = chain();
        let error = BrowserWorkerError::classify(&Error::connection("refused"), "push");

        let first = chain.handle(&error);
        assert_eq!(first.action, ErrorAction::Retry);
        assert_eq!(first.retry_delay, Some(Duration::from_millis(1000)));

        let second = chain.handle(&error);
        assert_eq!(second.retry_delay, Some(Duration::from_millis(2000)));

        let third = chain.handle(&error);
        assert_eq!(third.retry_delay, Some(Duration::from_millis(4000)));
    }

    #[test]
    fn test_reset_clears_retry_streak() {
        let chain = chain();
        let error = BrowserWorkerError::classify(&Error::connection("refused"), "push");

        chain.handle(&error);
        chain.handle(&error);
        chain.reset("push");

        let outcome = chain.handle(&error);
        assert_eq!(outcome.retry_delay, Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_streaks_independent_per_component() {
        let chain = chain();
        let push = BrowserWorkerError::classify(&Error::connection("refused"), "push");
        let poll = BrowserWorkerError::classify(&Error::connection("refused"), "poll");

        chain.handle(&push);
        chain.handle(&push);
        let outcome = chain.handle(&poll);

        assert_eq!(outcome.retry_delay, Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_validation_ignored() {
        let chain = chain();
        let error = BrowserWorkerError::classify(&Error::parsing("junk"), "parser");

        let outcome = chain.handle(&error);
        assert_eq!(outcome.action, ErrorAction::Ignore);
        assert!(!outcome.propagate);
    }

    #[test]
    fn test_fallback_escalates_unknown() {
        let chain = chain();
        let mut error = BrowserWorkerError::classify(&Error::execution("x"), "executor");
        error.category = ErrorCategory::Unknown;

        let outcome = chain.handle(&error);
        assert!(!outcome.handled);
        assert_eq!(outcome.action, ErrorAction::Escalate);
    }

    #[test]
    fn test_history_bounded_and_counted() {
        let chain = chain();
        let error = BrowserWorkerError::classify(&Error::parsing("junk"), "parser");

        for _ in 0..(HISTORY_CAPACITY + 10) {
            chain.handle(&error);
        }

        assert_eq!(chain.recent_errors().len(), HISTORY_CAPACITY);
        assert_eq!(
            chain.category_count(ErrorCategory::Validation),
            (HISTORY_CAPACITY + 10) as u64
        );
    }

    #[test]
    fn test_custom_handler_priority_wins() {
        struct Everything;
        impl ErrorHandler for Everything {
            fn priority(&self) -> i32 {
                1000
            }
            fn can_handle(&self, _: &BrowserWorkerError) -> bool {
                true
            }
            fn handle(&self, _: &BrowserWorkerError) -> ErrorHandlingResult {
                result(ErrorAction::Failover, false)
            }
        }

        let mut chain = chain();
        chain.register(Box::new(Everything));

        let error = BrowserWorkerError::classify(&Error::connection("refused"), "push");
        let outcome = chain.handle(&error);
        assert_eq!(outcome.action, ErrorAction::Failover);
    }
}
