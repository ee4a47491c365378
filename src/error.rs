//! Error types for the browser worker engine.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use browser_worker::{Result, Error};
//!
//! async fn example(queue: &ExecutionQueue) -> Result<()> {
//!     let rx = queue.enqueue(request)?;
//!     let response = rx.await??;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidBaseUrl`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::HeartbeatTimeout`] |
//! | Relay | [`Error::Authentication`], [`Error::ServerError`], [`Error::Parsing`] |
//! | Queue | [`Error::QueueFull`], [`Error::RequestTimeout`], [`Error::Cancelled`] |
//! | Execution | [`Error::ToolNotFound`], [`Error::Execution`], [`Error::Port`], [`Error::CircuitOpen`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Http`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

use crate::identifiers::RequestId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when worker configuration is invalid. Treated as
    /// unrecoverable by the error handler chain.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Relay base URL failed to parse.
    #[error("Invalid relay base URL: {url}")]
    InvalidBaseUrl {
        /// The rejected URL string.
        url: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timed out waiting for the relay's `connected` confirmation.
    ///
    /// A stream that is open at the HTTP level but never confirms is
    /// treated the same as one that failed to open.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Stream closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No heartbeat within the configured window.
    ///
    /// Synthesized by the heartbeat watchdog; the transport itself
    /// reported no error, but a silently stalled stream is otherwise
    /// undetectable.
    #[error("Heartbeat timeout: no heartbeat for {elapsed_ms}ms")]
    HeartbeatTimeout {
        /// Milliseconds since the last heartbeat.
        elapsed_ms: u64,
    },

    // ========================================================================
    // Relay Errors
    // ========================================================================
    /// Relay rejected the session code or credentials.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Description of the authentication failure.
        message: String,
    },

    /// Relay returned a server-side error status.
    #[error("Relay server error: HTTP {status}")]
    ServerError {
        /// HTTP status code returned by the relay.
        status: u16,
    },

    /// Wire frame could not be parsed.
    #[error("Parsing error: {message}")]
    Parsing {
        /// Description of the malformed frame.
        message: String,
    },

    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// Queue is at capacity; request rejected on arrival.
    #[error("Queue full: capacity {capacity}")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// Queued request timed out before execution started.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Pending request cancelled by queue clear or shutdown.
    #[error("Request cancelled: {reason}")]
    Cancelled {
        /// Why the request was cancelled.
        reason: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// Tool is not present in the routing table or its capability is
    /// not enabled for this session.
    #[error("Tool not found: {tool}")]
    ToolNotFound {
        /// The unrecognized or disabled tool name.
        tool: String,
    },

    /// Tool invocation failed inside the executor.
    #[error("Execution error: {message}")]
    Execution {
        /// Description of the execution failure.
        message: String,
    },

    /// Downstream command port returned an error.
    #[error("Port error [{code}]: {message}")]
    Port {
        /// Downstream error code.
        code: String,
        /// Downstream error message.
        message: String,
    },

    /// Routing table and schema registry disagree about a tool.
    #[error("Routing error: {message}")]
    Routing {
        /// Description of the routing inconsistency.
        message: String,
    },

    /// Circuit breaker is open; the guarded call was not attempted.
    #[error("Circuit open: {component}")]
    CircuitOpen {
        /// The guarded call site.
        component: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid base URL error.
    #[inline]
    pub fn invalid_base_url(url: impl Into<String>) -> Self {
        Self::InvalidBaseUrl { url: url.into() }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a heartbeat timeout error.
    #[inline]
    pub fn heartbeat_timeout(elapsed_ms: u64) -> Self {
        Self::HeartbeatTimeout { elapsed_ms }
    }

    /// Creates an authentication error.
    #[inline]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a server error from an HTTP status code.
    #[inline]
    pub fn server_error(status: u16) -> Self {
        Self::ServerError { status }
    }

    /// Creates a parsing error.
    #[inline]
    pub fn parsing(message: impl Into<String>) -> Self {
        Self::Parsing {
            message: message.into(),
        }
    }

    /// Creates a queue full error.
    #[inline]
    pub fn queue_full(capacity: usize) -> Self {
        Self::QueueFull { capacity }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a cancellation error.
    #[inline]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates a tool not found error.
    #[inline]
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Self::ToolNotFound { tool: tool.into() }
    }

    /// Creates an execution error.
    #[inline]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Creates a downstream port error.
    #[inline]
    pub fn port(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Port {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a routing error.
    #[inline]
    pub fn routing(message: impl Into<String>) -> Self {
        Self::Routing {
            message: message.into(),
        }
    }

    /// Creates a circuit open error.
    #[inline]
    pub fn circuit_open(component: impl Into<String>) -> Self {
        Self::CircuitOpen {
            component: component.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::HeartbeatTimeout { .. }
                | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::HeartbeatTimeout { .. }
                | Self::Http(_)
        )
    }

    /// Returns `true` if this error may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::HeartbeatTimeout { .. }
                | Self::ServerError { .. }
                | Self::RequestTimeout { .. }
                | Self::Http(_)
                | Self::CircuitOpen { .. }
        )
    }

    /// Returns `true` if this error should stop the worker.
    ///
    /// Only misconfiguration is unconditionally fatal; everything else
    /// is contained by the error handler chain.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::InvalidBaseUrl { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
