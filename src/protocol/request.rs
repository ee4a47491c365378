//! ToolRequest and ToolResponse message types.
//!
//! Defines the message format for tool invocations arriving from the
//! relay and execution outcomes posted back to it.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::identifiers::{RequestId, SessionCode};

use super::epoch_ms;

// ============================================================================
// ToolRequest
// ============================================================================

/// A tool invocation received from the relay.
///
/// Immutable once created; consumed exactly once by the queue.
///
/// # Format
///
/// ```json
/// {
///   "id": "r1",
///   "tool": "create_data_context",
///   "args": { "name": "X" },
///   "timestamp": 1700000000000,
///   "sessionCode": "ABC123"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Unique identifier within the session.
    pub id: RequestId,

    /// Tool name.
    pub tool: String,

    /// Tool arguments.
    #[serde(default)]
    pub args: Map<String, Value>,

    /// Creation time, epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,

    /// Session code the request belongs to.
    #[serde(rename = "sessionCode", default, skip_serializing_if = "Option::is_none")]
    pub session_code: Option<SessionCode>,
}

impl ToolRequest {
    /// Creates a request with a stamped arrival time.
    #[must_use]
    pub fn new(id: RequestId, tool: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id,
            tool: tool.into(),
            args,
            timestamp: epoch_ms(),
            session_code: None,
        }
    }

    /// Attaches the session code.
    #[inline]
    #[must_use]
    pub fn with_session_code(mut self, code: SessionCode) -> Self {
        self.session_code = Some(code);
        self
    }

    /// Gets a string argument.
    ///
    /// Returns `None` if absent or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    /// Gets a numeric argument as f64.
    #[inline]
    #[must_use]
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.args.get(key).and_then(|v| v.as_f64())
    }

    /// Gets an array argument.
    #[inline]
    #[must_use]
    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.args.get(key).and_then(|v| v.as_array())
    }
}

// ============================================================================
// ResponseError
// ============================================================================

/// Structured error carried by a failed [`ToolResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    /// Stable error kind (e.g. `tool_not_found`, `execution_error`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Human-readable message.
    pub message: String,

    /// Optional extra context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ResponseError {
    /// Creates a response error.
    #[inline]
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attaches extra context.
    #[inline]
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Classifies a crate error into a stable wire error kind.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        let kind = match error {
            Error::ToolNotFound { .. } => "tool_not_found",
            Error::Port { .. } => "port_error",
            Error::Routing { .. } => "routing_error",
            Error::RequestTimeout { .. } => "timeout",
            Error::Cancelled { .. } => "cancelled",
            Error::QueueFull { .. } => "queue_full",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::Parsing { .. } | Error::Json(_) => "parsing",
            e if e.is_connection_error() => "network",
            _ => "execution_error",
        };
        Self::new(kind, error.to_string())
    }
}

// ============================================================================
// ToolResponse
// ============================================================================

/// Execution outcome for one [`ToolRequest`].
///
/// Terminal: never mutated after creation and not retained once posted
/// to the relay.
///
/// # Format
///
/// Success:
/// ```json
/// { "requestId": "r1", "success": true, "result": { ... },
///   "timestamp": 1700000000000, "duration": 42 }
/// ```
///
/// Error:
/// ```json
/// { "requestId": "r1", "success": false,
///   "error": { "type": "tool_not_found", "message": "..." },
///   "timestamp": 1700000000000, "duration": 1 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// The request this responds to.
    #[serde(rename = "requestId")]
    pub request_id: RequestId,

    /// Whether execution succeeded.
    pub success: bool,

    /// Result payload (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Structured error (if failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,

    /// Completion time, epoch milliseconds.
    pub timestamp: i64,

    /// Execution duration in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl ToolResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(request_id: RequestId, result: Value, duration_ms: u64) -> Self {
        Self {
            request_id,
            success: true,
            result: Some(result),
            error: None,
            timestamp: epoch_ms(),
            duration_ms,
        }
    }

    /// Creates a failure response.
    #[must_use]
    pub fn failure(request_id: RequestId, error: ResponseError, duration_ms: u64) -> Self {
        Self {
            request_id,
            success: false,
            result: None,
            error: Some(error),
            timestamp: epoch_ms(),
            duration_ms,
        }
    }

    /// Creates a failure response from a crate error.
    #[inline]
    #[must_use]
    pub fn from_error(request_id: RequestId, error: &Error, duration_ms: u64) -> Self {
        Self::failure(request_id, ResponseError::from_error(error), duration_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_request_deserialization() {
        let json_str = r#"{
            "id": "r1",
            "tool": "create_data_context",
            "args": { "name": "X" },
            "timestamp": 1700000000000,
            "sessionCode": "ABC123"
        }"#;

        let request: ToolRequest = serde_json::from_str(json_str).expect("parse");
        assert_eq!(request.id.as_str(), "r1");
        assert_eq!(request.tool, "create_data_context");
        assert_eq!(request.get_string("name"), Some("X"));
        assert_eq!(
            request.session_code,
            Some(SessionCode::new("ABC123"))
        );
    }

    #[test]
    fn test_request_missing_optionals() {
        let json_str = r#"{ "id": "r2", "tool": "get_data_contexts" }"#;
        let request: ToolRequest = serde_json::from_str(json_str).expect("parse");
        assert!(request.args.is_empty());
        assert!(request.session_code.is_none());
    }

    #[test]
    fn test_request_arg_accessors() {
        let request = ToolRequest::new(
            RequestId::new("r3"),
            "get_items",
            args(&[
                ("data_context", json!("ctx")),
                ("limit", json!(25)),
                ("ids", json!([1, 2])),
            ]),
        );

        assert_eq!(request.get_string("data_context"), Some("ctx"));
        assert_eq!(request.get_number("limit"), Some(25.0));
        assert_eq!(request.get_array("ids").map(Vec::len), Some(2));
        assert_eq!(request.get_string("limit"), None);
        assert_eq!(request.get_number("missing"), None);
    }

    #[test]
    fn test_success_response_serialization() {
        let response = ToolResponse::success(RequestId::new("r1"), json!({"ok": true}), 42);
        let json = serde_json::to_value(&response).expect("serialize");

        assert_eq!(json["requestId"], "r1");
        assert_eq!(json["success"], true);
        assert_eq!(json["duration"], 42);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_response_serialization() {
        let response = ToolResponse::failure(
            RequestId::new("r1"),
            ResponseError::new("tool_not_found", "no such tool").with_details(json!({"tool": "x"})),
            1,
        );
        let json = serde_json::to_value(&response).expect("serialize");

        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["type"], "tool_not_found");
        assert_eq!(json["error"]["details"]["tool"], "x");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_response_error_classification() {
        let err = ResponseError::from_error(&Error::tool_not_found("x"));
        assert_eq!(err.kind, "tool_not_found");

        let err = ResponseError::from_error(&Error::ConnectionClosed);
        assert_eq!(err.kind, "network");

        let err = ResponseError::from_error(&Error::request_timeout(RequestId::new("r"), 100));
        assert_eq!(err.kind, "timeout");

        let err = ResponseError::from_error(&Error::execution("boom"));
        assert_eq!(err.kind, "execution_error");
    }
}
