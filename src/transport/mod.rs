//! Dual-transport delivery layer.
//!
//! This module owns both paths by which tool requests reach the worker:
//! the push stream (primary) and the polling loop (fallback). Both emit
//! the same normalized [`TransportEvent`] into a single sink, so the
//! rest of the engine never knows which transport delivered a request.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   SSE stream    ┌──────────────────┐
//! │                  │◄────────────────│                  │
//! │ ConnectionManager│                 │                  │
//! │  (push, primary) │                 │                  │
//! └────────┬─────────┘                 │      Relay       │
//!          │ TransportEvent            │                  │
//!          ▼                           │                  │
//!     event sink                       │                  │
//!          ▲                           │                  │
//! ┌────────┴─────────┐   GET /poll     │                  │
//! │  PollingManager  │◄────────────────│                  │
//! │ (pull, fallback) │                 └──────────────────┘
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `push` | Push stream lifecycle, heartbeat watchdog, reconnection |
//! | `poll` | Polling loop with cursor and deduplication |
//! | `sse` | Incremental SSE frame parser |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::Error;
use crate::protocol::{MessageEnvelope, ToolRequest};

// ============================================================================
// Submodules
// ============================================================================

/// Push stream lifecycle and reconnection.
pub mod push;

/// Polling loop with deduplication.
pub mod poll;

/// Incremental SSE frame parser.
pub mod sse;

// ============================================================================
// Re-exports
// ============================================================================

pub use poll::{DedupWindow, PollingManager};
pub use push::ConnectionManager;
pub use sse::{SseFrame, SseParser};

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; no activity scheduled.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Application-level readiness confirmed.
    Connected,
    /// Retry scheduled after a failure.
    Reconnecting,
    /// Failed; automatic retry exhausted or pending.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting => f.write_str("reconnecting"),
            Self::Error => f.write_str("error"),
        }
    }
}

// ============================================================================
// TransportKind
// ============================================================================

/// Which delivery channel a status belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Server-initiated push stream.
    Push,
    /// Client-initiated polling.
    Poll,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

// ============================================================================
// ConnectionStatus
// ============================================================================

/// Live status of one transport.
///
/// One instance per manager, mutated on every transition, reset (not
/// destroyed) on disconnect.
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Which transport this status describes.
    pub transport: TransportKind,
    /// Reconnection attempts since the last successful connection.
    pub retry_count: u32,
    /// Last successful connection time, epoch milliseconds.
    pub last_connected: Option<i64>,
    /// Last error message, if any.
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// Creates a disconnected status for the given transport.
    #[must_use]
    pub fn new(transport: TransportKind) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            transport,
            retry_count: 0,
            last_connected: None,
            error: None,
        }
    }

    /// Resets to the disconnected state, clearing retries and errors.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.retry_count = 0;
        self.error = None;
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Normalized event emitted by either transport into the shared sink.
#[derive(Debug)]
pub enum TransportEvent {
    /// Validated inbound frame, normalized.
    Message(MessageEnvelope),
    /// A tool request ready for parsing/enqueueing, tagged with the
    /// transport that delivered it.
    Request(ToolRequest, TransportKind),
    /// Transport status transition.
    StatusChange(ConnectionStatus),
    /// Transport-level failure (recoverable unless the worker says
    /// otherwise).
    Error(Error),
}

/// Shared sink both transports emit into.
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff schedule with a cap.
///
/// Delay for 1-based attempt `n` is `base * multiplier^(n-1)`, capped
/// at `max`. Both transports share this schedule.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
}

impl Backoff {
    /// Creates a backoff schedule.
    #[must_use]
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            base,
            max,
            multiplier,
        }
    }

    /// Returns the delay before the given 1-based attempt.
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = self.multiplier.powi(exponent as i32);
        let millis = (self.base.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

// ============================================================================
// Tests
// ============================================================================
