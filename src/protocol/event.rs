//! Stream event, envelope, and poll batch types.
//!
//! Events are named frames delivered on the push stream. Whatever the
//! transport-specific wire shape, validated frames are normalized into
//! a [`MessageEnvelope`] before leaving the transport layer.
//!
//! # Event Names
//!
//! | Event | Payload |
//! |-------|---------|
//! | `connected` | `{ code, message, timestamp }` |
//! | `tool-request` | `{ id, tool, args, timestamp, sessionCode }` |
//! | `heartbeat` | `{ timestamp }` |
//! | `error` | `{ error, message, timestamp }` |
//! | `timeout` | `{}` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::ToolRequest;
use super::epoch_ms;

// ============================================================================
// StreamEventKind
// ============================================================================

/// Recognized push-stream event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventKind {
    /// Application-level readiness confirmation.
    Connected,
    /// A tool invocation to execute.
    ToolRequest,
    /// Liveness signal.
    Heartbeat,
    /// Relay-reported error.
    Error,
    /// Relay closed the session for inactivity.
    Timeout,
    /// Unrecognized event name.
    Unknown,
}

impl StreamEventKind {
    /// Maps a wire event name to its kind.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "connected" => Self::Connected,
            "tool-request" => Self::ToolRequest,
            "heartbeat" => Self::Heartbeat,
            "error" => Self::Error,
            "timeout" => Self::Timeout,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// StreamEvent
// ============================================================================

/// One named event from the push stream.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Wire event name.
    pub name: String,

    /// Event payload.
    pub data: Value,
}

impl StreamEvent {
    /// Creates a stream event.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Returns the recognized kind of this event.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> StreamEventKind {
        StreamEventKind::from_name(&self.name)
    }

    /// Extracts the tool request from a `tool-request` event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parsing`] if this is not a `tool-request` event
    /// or the payload does not match the request shape.
    pub fn tool_request(&self) -> Result<ToolRequest> {
        if self.kind() != StreamEventKind::ToolRequest {
            return Err(Error::parsing(format!(
                "expected tool-request event, got {}",
                self.name
            )));
        }

        serde_json::from_value(self.data.clone())
            .map_err(|e| Error::parsing(format!("malformed tool-request payload: {e}")))
    }

    /// Gets a string field from the payload.
    ///
    /// Returns empty string if absent or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.data
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Gets an i64 field from the payload.
    ///
    /// Returns 0 if absent or not a number.
    #[inline]
    #[must_use]
    pub fn get_i64(&self, key: &str) -> i64 {
        self.data
            .get(key)
            .and_then(|v| v.as_i64())
            .unwrap_or_default()
    }

    /// Converts the event into a normalized envelope.
    #[must_use]
    pub fn into_envelope(self) -> MessageEnvelope {
        let timestamp = match self.get_i64("timestamp") {
            0 => epoch_ms(),
            ts => ts,
        };
        MessageEnvelope {
            kind: self.name,
            data: self.data,
            timestamp,
        }
    }
}

// ============================================================================
// MessageEnvelope
// ============================================================================

/// Normalized message emitted for every validated inbound frame,
/// regardless of the transport-specific wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Event kind name.
    #[serde(rename = "type")]
    pub kind: String,

    /// Raw payload.
    pub data: Value,

    /// Delivery time, epoch milliseconds.
    pub timestamp: i64,
}

// ============================================================================
// PollBatch
// ============================================================================

/// Response of one pull-endpoint fetch.
///
/// # Format
///
/// ```json
/// {
///   "requests": [ { "id": "r1", "tool": "...", "args": {} } ],
///   "lastRequestId": "r1",
///   "timestamp": 1700000000000
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollBatch {
    /// New requests since the cursor.
    #[serde(default)]
    pub requests: Vec<ToolRequest>,

    /// Cursor to pass as `after` on the next cycle.
    #[serde(rename = "lastRequestId", default, skip_serializing_if = "Option::is_none")]
    pub last_request_id: Option<String>,

    /// Relay-side batch time, epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,
}

impl PollBatch {
    /// Returns `true` if the batch carries no requests.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(
            StreamEventKind::from_name("connected"),
            StreamEventKind::Connected
        );
        assert_eq!(
            StreamEventKind::from_name("tool-request"),
            StreamEventKind::ToolRequest
        );
        assert_eq!(
            StreamEventKind::from_name("heartbeat"),
            StreamEventKind::Heartbeat
        );
        assert_eq!(StreamEventKind::from_name("timeout"), StreamEventKind::Timeout);
        assert_eq!(
            StreamEventKind::from_name("something-new"),
            StreamEventKind::Unknown
        );
    }

    #[test]
    fn test_tool_request_extraction() {
        let event = StreamEvent::new(
            "tool-request",
            json!({
                "id": "r1",
                "tool": "create_data_context",
                "args": { "name": "X" },
                "timestamp": 1700000000000i64
            }),
        );

        let request = event.tool_request().expect("extract");
        assert_eq!(request.id.as_str(), "r1");
        assert_eq!(request.tool, "create_data_context");
    }

    #[test]
    fn test_tool_request_from_wrong_event() {
        let event = StreamEvent::new("heartbeat", json!({ "timestamp": 1 }));
        assert!(matches!(
            event.tool_request(),
            Err(Error::Parsing { .. })
        ));
    }

    #[test]
    fn test_tool_request_malformed_payload() {
        let event = StreamEvent::new("tool-request", json!({ "tool": 42 }));
        assert!(event.tool_request().is_err());
    }

    #[test]
    fn test_envelope_normalization() {
        let event = StreamEvent::new(
            "connected",
            json!({ "code": "ABC123", "message": "ready", "timestamp": 1700000000000i64 }),
        );

        let envelope = event.into_envelope();
        assert_eq!(envelope.kind, "connected");
        assert_eq!(envelope.timestamp, 1_700_000_000_000);
        assert_eq!(envelope.data["code"], "ABC123");
    }

    #[test]
    fn test_envelope_stamps_missing_timestamp() {
        let event = StreamEvent::new("timeout", json!({}));
        let envelope = event.into_envelope();
        assert!(envelope.timestamp > 0);
    }

    #[test]
    fn test_poll_batch_deserialization() {
        let json_str = r#"{
            "requests": [
                { "id": "r1", "tool": "get_data_contexts", "args": {} }
            ],
            "lastRequestId": "r1",
            "timestamp": 1700000000000
        }"#;

        let batch: PollBatch = serde_json::from_str(json_str).expect("parse");
        assert!(!batch.is_empty());
        assert_eq!(batch.requests.len(), 1);
        assert_eq!(batch.last_request_id.as_deref(), Some("r1"));
    }

    #[test]
    fn test_poll_batch_empty() {
        let batch: PollBatch = serde_json::from_str("{}").expect("parse");
        assert!(batch.is_empty());
        assert!(batch.last_request_id.is_none());
    }
}
