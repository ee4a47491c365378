//! Relay protocol message types.
//!
//! This module defines the wire format spoken with the relay: tool
//! requests and responses, named stream events, and poll batches.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`ToolRequest`] | Relay → Worker | Tool invocation to execute |
//! | [`ToolResponse`] | Worker → Relay | Execution outcome |
//! | [`StreamEvent`] | Relay → Worker | Named push-stream event |
//! | [`PollBatch`] | Relay → Worker | New requests since a cursor |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | Stream events, normalized envelopes, poll batches |
//! | `request` | ToolRequest and ToolResponse types |

// ============================================================================
// Submodules
// ============================================================================

/// Stream event, envelope, and poll batch types.
pub mod event;

/// ToolRequest and ToolResponse message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{MessageEnvelope, PollBatch, StreamEvent, StreamEventKind};
pub use request::{ResponseError, ToolRequest, ToolResponse};

// ============================================================================
// Time Helpers
// ============================================================================

/// Returns the current time as epoch milliseconds.
///
/// All wire timestamps use this representation.
#[inline]
#[must_use]
pub fn epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Tests
// ============================================================================
