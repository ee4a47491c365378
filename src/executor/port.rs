//! Command port: the seam between the executor and the host surface.
//!
//! [`CommandPort`] abstracts over how a command actually reaches the
//! host app. [`FrameChannelPort`] is the production implementation: a
//! cross-frame message channel where each outbound command carries a
//! correlation id and replies arrive asynchronously, in any order.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;

// ============================================================================
// Constants
// ============================================================================

/// Cap on concurrently awaited host calls. The executor serializes
/// execution, so hitting this means listeners are leaking.
const MAX_PENDING_CALLS: usize = 64;

// ============================================================================
// PortReply
// ============================================================================

/// Outcome of one host command.
#[derive(Debug, Clone, PartialEq)]
pub struct PortReply {
    /// Whether the host accepted and executed the command.
    pub success: bool,
    /// Host-provided result values; `Null` when absent.
    pub values: Value,
    /// Host error message when `success` is false.
    pub error: Option<String>,
    /// Host error code when `success` is false.
    pub code: Option<String>,
}

impl PortReply {
    /// Successful reply carrying result values.
    #[must_use]
    pub fn ok(values: Value) -> Self {
        Self {
            success: true,
            values,
            error: None,
            code: None,
        }
    }

    /// Failed reply with a host error.
    #[must_use]
    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            values: Value::Null,
            error: Some(message.into()),
            code: Some(code.into()),
        }
    }

    /// Converts the reply into a crate result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Port`] when the host rejected the command.
    pub fn into_result(self) -> Result<Value> {
        if self.success {
            return Ok(self.values);
        }

        Err(Error::port(
            self.code.unwrap_or_else(|| "error".to_string()),
            self.error.unwrap_or_else(|| "host rejected command".to_string()),
        ))
    }
}

// ============================================================================
// CommandPort
// ============================================================================

/// Transport-agnostic host command channel.
#[async_trait]
pub trait CommandPort: Send + Sync {
    /// Sends one command and awaits the host's reply.
    ///
    /// # Errors
    ///
    /// Implementations return [`Error::Port`] for host-side failures
    /// and timeouts, [`Error::Connection`] when the channel is gone.
    async fn call(&self, action: &str, resource: &str, values: Value) -> Result<PortReply>;
}

// ============================================================================
// Wire Frames
// ============================================================================

/// Outbound command frame posted to the host.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommandFrame {
    /// Id the host must echo in its reply.
    #[serde(rename = "correlationId")]
    pub correlation_id: CorrelationId,
    /// Verb, e.g. `create`, `get`, `update`.
    pub action: String,
    /// Addressed resource, e.g. `dataContext[Tasks].item`.
    pub resource: String,
    /// Command payload.
    pub values: Value,
}

/// Inbound reply frame from the host.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyFrame {
    /// Echoed correlation id.
    #[serde(rename = "correlationId")]
    pub correlation_id: CorrelationId,
    /// Whether the command succeeded.
    pub success: bool,
    /// Result values on success.
    #[serde(default)]
    pub values: Value,
    /// Error message on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Error code on failure.
    #[serde(default)]
    pub code: Option<String>,
}

// ============================================================================
// FrameChannelPort
// ============================================================================

type PendingMap = Arc<Mutex<FxHashMap<CorrelationId, oneshot::Sender<PortReply>>>>;

/// Correlation-id RPC over a pair of frame channels.
///
/// Replies arrive out of order; each in-flight call parks a oneshot
/// sender under its correlation id and a router task resolves them as
/// reply frames come in. A call that times out unregisters itself so
/// the map cannot grow with abandoned entries.
pub struct FrameChannelPort {
    outbound: mpsc::UnboundedSender<CommandFrame>,
    pending: PendingMap,
    call_timeout: Duration,
}

impl FrameChannelPort {
    /// Creates a port over the given outbound channel.
    ///
    /// Returns the port plus the sender the host glue feeds reply
    /// frames into.
    #[must_use]
    pub fn new(
        outbound: mpsc::UnboundedSender<CommandFrame>,
        call_timeout: Duration,
    ) -> (Self, mpsc::UnboundedSender<ReplyFrame>) {
        let pending: PendingMap = Arc::new(Mutex::new(FxHashMap::default()));
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        let router_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            Self::route_replies(reply_rx, router_pending).await;
        });

        (
            Self {
                outbound,
                pending,
                call_timeout,
            },
            reply_tx,
        )
    }

    /// Number of calls currently awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolves parked calls as reply frames arrive.
    async fn route_replies(
        mut replies: mpsc::UnboundedReceiver<ReplyFrame>,
        pending: PendingMap,
    ) {
        while let Some(frame) = replies.recv().await {
            let waiter = pending.lock().remove(&frame.correlation_id);
            match waiter {
                Some(tx) => {
                    let reply = PortReply {
                        success: frame.success,
                        values: frame.values,
                        error: frame.error,
                        code: frame.code,
                    };
                    let _ = tx.send(reply);
                }
                None => {
                    // Late reply for a call that already timed out.
                    trace!(correlation_id = %frame.correlation_id, "Unmatched reply dropped");
                }
            }
        }
    }
}

#[async_trait]
impl CommandPort for FrameChannelPort {
    async fn call(&self, action: &str, resource: &str, values: Value) -> Result<PortReply> {
        let correlation_id = CorrelationId::generate();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.len() >= MAX_PENDING_CALLS {
                return Err(Error::port(
                    "overloaded",
                    format!("{MAX_PENDING_CALLS} host calls already awaiting replies"),
                ));
            }
            pending.insert(correlation_id, tx);
        }

        let frame = CommandFrame {
            correlation_id,
            action: action.to_string(),
            resource: resource.to_string(),
            values,
        };

        trace!(%correlation_id, action, resource, "Posting command frame");

        if self.outbound.send(frame).is_err() {
            self.pending.lock().remove(&correlation_id);
            return Err(Error::connection("host frame channel closed"));
        }

        match timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().remove(&correlation_id);
                Err(Error::connection("reply router stopped"))
            }
            Err(_) => {
                self.pending.lock().remove(&correlation_id);
                warn!(%correlation_id, action, resource, "Host reply timed out");
                Err(Error::port(
                    "timeout",
                    format!(
                        "host did not reply to {action} {resource} within {}ms",
                        self.call_timeout.as_millis()
                    ),
                ))
            }
        }
    }
}

// ============================================================================
// MockPort
// ============================================================================

/// Scripted port for tests: records calls, replays queued replies.
#[cfg(test)]
pub struct MockPort {
    pub calls: Mutex<Vec<(String, String, Value)>>,
    replies: Mutex<std::collections::VecDeque<Result<PortReply>>>,
}

#[cfg(test)]
impl MockPort {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            replies: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn push_reply(&self, reply: Result<PortReply>) {
        self.replies.lock().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
#[async_trait]
impl CommandPort for MockPort {
    async fn call(&self, action: &str, resource: &str, values: Value) -> Result<PortReply> {
        self.calls
            .lock()
            .push((action.to_string(), resource.to_string(), values));

        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(PortReply::ok(Value::Null)))
    }
}

// ============================================================================
// Tests
// ============================================================================
