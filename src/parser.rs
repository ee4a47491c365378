//! Inbound request validation and sanitization.
//!
//! [`ToolRequestParser`] turns a payload of unknown shape into a
//! canonical [`ToolRequest`], or a typed [`ParseError`]. It never
//! panics; every failure path is a value.
//!
//! # Pipeline
//!
//! Checks run in a fixed order:
//!
//! 1. Payload size bound
//! 2. Nested depth bound
//! 3. Envelope recognition (canonical, event-wrapped, or generic)
//! 4. Tool existence against the schema registry
//! 5. Per-parameter required/type/enum validation
//! 6. Sanitization (string/array/depth trimming), after validation only
//!
//! The size and depth bounds run first so a malformed or adversarial
//! payload is rejected before any full walk of its structure.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::identifiers::RequestId;
use crate::protocol::ToolRequest;
use crate::schema::{ParamKind, SchemaRegistry, ToolSchema};

// ============================================================================
// Limits
// ============================================================================

/// Maximum accepted payload size in bytes (serialized).
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Maximum accepted nesting depth.
pub const MAX_DEPTH: usize = 10;

/// Maximum string length retained after sanitization.
pub const MAX_STRING_LEN: usize = 10_000;

/// Maximum array length retained after sanitization.
pub const MAX_ARRAY_LEN: usize = 1_000;

// ============================================================================
// ParseError
// ============================================================================

/// Stable parser error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorCode {
    /// Serialized payload exceeds [`MAX_PAYLOAD_BYTES`].
    PayloadTooLarge,
    /// Nesting exceeds [`MAX_DEPTH`].
    TooDeep,
    /// Payload matches none of the accepted envelope shapes.
    InvalidShape,
    /// Tool is not in the schema registry.
    UnknownTool,
    /// Arguments violate the tool's declared schema.
    InvalidArgs,
}

impl fmt::Display for ParseErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadTooLarge => f.write_str("payload_too_large"),
            Self::TooDeep => f.write_str("too_deep"),
            Self::InvalidShape => f.write_str("invalid_shape"),
            Self::UnknownTool => f.write_str("unknown_tool"),
            Self::InvalidArgs => f.write_str("invalid_args"),
        }
    }
}

/// Typed parser failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Stable error code.
    pub code: ParseErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Offending field, when one can be named.
    pub field: Option<String>,
}

impl ParseError {
    fn new(code: ParseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{} ({}): {}", self.code, field, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ParseError {}

/// Result of one parse attempt.
pub type ParseResult = std::result::Result<ToolRequest, ParseError>;

// ============================================================================
// ToolRequestParser
// ============================================================================

/// Validates and sanitizes inbound requests of unknown shape.
///
/// Accepted envelope shapes:
///
/// - canonical: `{ id, tool, args, ... }`
/// - event-wrapped: `{ type: "tool-request", data: { id, tool, ... } }`
/// - generic: `{ tool, args | parameters }` (id generated)
#[derive(Debug, Clone)]
pub struct ToolRequestParser {
    registry: Arc<SchemaRegistry>,
    allow_unknown_tools: bool,
}

impl ToolRequestParser {
    /// Creates a parser over the given registry.
    #[must_use]
    pub fn new(registry: Arc<SchemaRegistry>, allow_unknown_tools: bool) -> Self {
        Self {
            registry,
            allow_unknown_tools,
        }
    }

    /// Parses a raw JSON string.
    ///
    /// Never panics; all failures come back as [`ParseError`].
    pub fn parse_str(&self, raw: &str) -> ParseResult {
        if raw.len() > MAX_PAYLOAD_BYTES {
            return Err(ParseError::new(
                ParseErrorCode::PayloadTooLarge,
                format!("payload is {} bytes, limit {MAX_PAYLOAD_BYTES}", raw.len()),
            ));
        }

        let value: Value = serde_json::from_str(raw).map_err(|e| {
            ParseError::new(ParseErrorCode::InvalidShape, format!("not valid JSON: {e}"))
        })?;

        self.parse_value(&value)
    }

    /// Parses an already-deserialized JSON value.
    pub fn parse_value(&self, raw: &Value) -> ParseResult {
        // Size bound. Serialization length mirrors what a relay would
        // have put on the wire for this value.
        let serialized_len = serde_json::to_string(raw).map(|s| s.len()).unwrap_or(0);
        if serialized_len > MAX_PAYLOAD_BYTES {
            return Err(ParseError::new(
                ParseErrorCode::PayloadTooLarge,
                format!("payload is {serialized_len} bytes, limit {MAX_PAYLOAD_BYTES}"),
            ));
        }

        // Depth bound, before any structural walk.
        if exceeds_depth(raw, MAX_DEPTH) {
            return Err(ParseError::new(
                ParseErrorCode::TooDeep,
                format!("nesting exceeds {MAX_DEPTH} levels"),
            ));
        }

        let mut request = self.recognize(raw)?;

        match self.registry.get(&request.tool) {
            Some(schema) => {
                self.validate_args(schema, &request.args)?;
            }
            None if self.allow_unknown_tools => {
                debug!(tool = %request.tool, "Unknown tool passed through unvalidated");
            }
            None => {
                warn!(tool = %request.tool, "Rejected unknown tool");
                return Err(ParseError::new(
                    ParseErrorCode::UnknownTool,
                    format!("tool '{}' is not registered", request.tool),
                )
                .with_field("tool"));
            }
        }

        // Sanitize only after validation succeeded.
        request.args = sanitize_map(request.args, MAX_DEPTH);

        Ok(request)
    }

    /// Recognizes one of the accepted envelope shapes.
    fn recognize(&self, raw: &Value) -> ParseResult {
        let obj = raw.as_object().ok_or_else(|| {
            ParseError::new(ParseErrorCode::InvalidShape, "payload is not an object")
        })?;

        // Event-wrapped shape: unwrap and recurse into the data field.
        if obj.get("type").and_then(Value::as_str) == Some("tool-request") {
            let data = obj.get("data").ok_or_else(|| {
                ParseError::new(
                    ParseErrorCode::InvalidShape,
                    "tool-request envelope missing data",
                )
                .with_field("data")
            })?;
            return self.recognize(data);
        }

        let tool = obj
            .get("tool")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ParseError::new(
                    ParseErrorCode::InvalidShape,
                    "missing or non-string 'tool' field",
                )
                .with_field("tool")
            })?
            .to_string();

        // Canonical shape carries its own id; the generic shape may not.
        let id = match obj.get("id") {
            Some(Value::String(id)) if !id.is_empty() => RequestId::new(id.clone()),
            Some(Value::String(_)) | None => RequestId::generate(),
            Some(_) => {
                return Err(ParseError::new(
                    ParseErrorCode::InvalidShape,
                    "'id' must be a string",
                )
                .with_field("id"));
            }
        };

        let args = match obj.get("args").or_else(|| obj.get("parameters")) {
            Some(Value::Object(map)) => map.clone(),
            None => Map::new(),
            Some(_) => {
                return Err(ParseError::new(
                    ParseErrorCode::InvalidShape,
                    "'args' must be an object",
                )
                .with_field("args"));
            }
        };

        let mut request = ToolRequest::new(id, tool, args);
        if let Some(ts) = obj.get("timestamp").and_then(Value::as_i64) {
            request.timestamp = ts;
        }
        if let Some(code) = obj.get("sessionCode").and_then(Value::as_str) {
            request.session_code = Some(code.into());
        }

        Ok(request)
    }

    /// Validates arguments against the tool's declared schema.
    fn validate_args(
        &self,
        schema: &ToolSchema,
        args: &Map<String, Value>,
    ) -> std::result::Result<(), ParseError> {
        for param in &schema.params {
            let value = match args.get(param.name) {
                Some(v) => v,
                None if param.required => {
                    return Err(ParseError::new(
                        ParseErrorCode::InvalidArgs,
                        format!("missing required parameter '{}'", param.name),
                    )
                    .with_field(param.name));
                }
                None => continue,
            };

            if !kind_matches(param.kind, value) {
                return Err(ParseError::new(
                    ParseErrorCode::InvalidArgs,
                    format!("parameter '{}' must be a {}", param.name, param.kind),
                )
                .with_field(param.name));
            }

            if let (Some(allowed), Some(s)) = (param.allowed, value.as_str())
                && !allowed.contains(&s)
            {
                return Err(ParseError::new(
                    ParseErrorCode::InvalidArgs,
                    format!(
                        "parameter '{}' must be one of {:?}, got '{s}'",
                        param.name, allowed
                    ),
                )
                .with_field(param.name));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Depth Check
// ============================================================================

/// Returns `true` if `value` nests deeper than `limit` levels.
///
/// Short-circuits on the first violation; never walks past the limit.
fn exceeds_depth(value: &Value, limit: usize) -> bool {
    match value {
        Value::Object(map) => {
            limit == 0 || map.values().any(|v| exceeds_depth(v, limit - 1))
        }
        Value::Array(items) => {
            limit == 0 || items.iter().any(|v| exceeds_depth(v, limit - 1))
        }
        _ => false,
    }
}

// ============================================================================
// Sanitization
// ============================================================================

/// Trims an argument map: string length, array length, nesting depth.
fn sanitize_map(map: Map<String, Value>, depth: usize) -> Map<String, Value> {
    map.into_iter()
        .map(|(k, v)| (k, sanitize_value(v, depth)))
        .collect()
}

/// Trims a single value. Values nested past the depth limit are
/// replaced with null rather than walked.
fn sanitize_value(value: Value, depth: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > MAX_STRING_LEN => {
            Value::String(s.chars().take(MAX_STRING_LEN).collect())
        }
        Value::Array(items) => {
            if depth == 0 {
                return Value::Null;
            }
            Value::Array(
                items
                    .into_iter()
                    .take(MAX_ARRAY_LEN)
                    .map(|v| sanitize_value(v, depth - 1))
                    .collect(),
            )
        }
        Value::Object(map) => {
            if depth == 0 {
                return Value::Null;
            }
            Value::Object(sanitize_map(map, depth - 1))
        }
        other => other,
    }
}

// ============================================================================
// Type Matching
// ============================================================================

/// Returns `true` if the value matches the declared parameter kind.
fn kind_matches(kind: ParamKind, value: &Value) -> bool {
    match kind {
        ParamKind::String => value.is_string(),
        ParamKind::Number => value.is_number(),
        ParamKind::Boolean => value.is_boolean(),
        ParamKind::Object => value.is_object(),
        ParamKind::Array => value.is_array(),
    }
}

// ============================================================================
// Tests
// ============================================================================
