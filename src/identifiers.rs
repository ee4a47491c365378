//! Type-safe identifiers for worker entities.
//!
//! Newtype wrappers prevent mixing incompatible identifiers at compile
//! time. All identifiers are cheap to clone and usable as map keys.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`RequestId`] | Tool request identity (dedup, correlation, responses) |
//! | [`SessionCode`] | Relay session code issued out-of-band |
//! | [`CorrelationId`] | Call-scoped id for cross-frame RPC replies |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// RequestId
// ============================================================================

/// Unique identifier of a tool request.
///
/// Assigned by the relay; unique per session. The worker generates one
/// only for loosely-shaped inbound payloads that omit it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wraps an identifier received from the relay.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ============================================================================
// SessionCode
// ============================================================================

/// Relay session code.
///
/// Issued by the relay when the session is created; identifies this
/// worker on every transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    /// Wraps a session code.
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the code as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the code is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl From<String> for SessionCode {
    fn from(code: String) -> Self {
        Self(code)
    }
}

// ============================================================================
// CorrelationId
// ============================================================================

/// Call-scoped correlation identifier for the cross-frame RPC port.
///
/// Generated per call; keys the one-shot reply listener so the reply for
/// one call can never settle another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh correlation id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_roundtrip() {
        let id = RequestId::new("r1");
        assert_eq!(id.as_str(), "r1");
        assert_eq!(id.to_string(), "r1");

        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"r1\"");

        let back: RequestId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn test_request_id_generate_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_session_code() {
        let code = SessionCode::new("ABC123");
        assert_eq!(code.as_str(), "ABC123");
        assert!(!code.is_empty());
        assert!(SessionCode::new("").is_empty());
    }

    #[test]
    fn test_correlation_id_unique() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
    }
}
