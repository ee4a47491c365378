//! Browser worker engine: relay tool requests in, host commands out.
//!
//! This library runs inside a browser-hosted plugin and bridges two
//! worlds: a relay server that forwards LLM tool-invocation requests,
//! and the host application's command surface that actually mutates
//! documents. Requests arrive over a push stream (primary) or a polling
//! loop (fallback), are validated and queued, then executed strictly
//! one at a time against the host.
//!
//! # Architecture
//!
//! ```text
//! Relay ──SSE /stream──► ConnectionManager ─┐
//!                                           ├─► event pump ─► parser
//! Relay ◄──GET /poll──── PollingManager ────┘                  │
//!   ▲                                                          ▼
//!   │                                                   ExecutionQueue
//!   │                                                          │
//!   └──POST /response── BrowserWorker ◄── ToolExecutor ◄───────┘
//!                                              │
//!                                       CommandPort ──► host app
//! ```
//!
//! Key design principles:
//!
//! - Exactly one response per delivered request, success or structured
//!   failure
//! - Transports are exclusive; a shared dedup window covers switches
//! - Execution is serialized; host surfaces are single-threaded
//! - Failures flow through one handler chain and one circuit breaker
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use browser_worker::{BrowserWorker, FrameChannelPort, Result, WorkerConfig};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = WorkerConfig::new("https://relay.example.com", "ABC123");
//!
//!     // The host glue forwards command frames to the app and feeds
//!     // reply frames back.
//!     let (outbound, _to_host) = mpsc::unbounded_channel();
//!     let (port, _replies) = FrameChannelPort::new(outbound, Duration::from_secs(10));
//!
//!     let worker = BrowserWorker::new(config, Arc::new(port))?;
//!     worker.start().await?;
//!
//!     // ... requests now flow until shutdown.
//!     worker.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`breaker`] | Circuit breaker for the host port |
//! | [`config`] | [`WorkerConfig`] and validation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`executor`] | Routing and host invocation |
//! | [`handler`] | Error classification and policy chain |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`parser`] | Inbound request validation |
//! | [`protocol`] | Wire message types |
//! | [`queue`] | Serialized execution queue |
//! | [`relay`] | HTTP client for the relay endpoints |
//! | [`schema`] | Tool schema registry |
//! | [`transport`] | Push stream and polling fallback |
//! | [`worker`] | [`BrowserWorker`] orchestrator |

// ============================================================================
// Modules
// ============================================================================

/// Circuit breaker guarding host calls.
pub mod breaker;

/// Worker configuration and validation.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Tool routing and host invocation.
pub mod executor;

/// Error classification and the handler chain.
pub mod handler;

/// Type-safe identifiers for requests and sessions.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Inbound request parsing and sanitization.
pub mod parser;

/// Wire message types shared by both transports.
pub mod protocol;

/// Serialized execution queue.
pub mod queue;

/// HTTP client for the relay's endpoints.
pub mod relay;

/// Tool schema registry.
pub mod schema;

/// Dual-transport delivery layer.
pub mod transport;

/// Worker orchestration.
pub mod worker;

// ============================================================================
// Re-exports
// ============================================================================

// Core engine
pub use config::WorkerConfig;
pub use worker::{BrowserWorker, WorkerStatus};

// Execution
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use executor::{CommandPort, FrameChannelPort, PortReply, RoutingTable, ToolExecutor};
pub use queue::{ExecutionQueue, QueueStats};

// Requests and schema
pub use parser::{ParseError, ParseErrorCode, ToolRequestParser};
pub use protocol::{ToolRequest, ToolResponse};
pub use schema::{Capability, SchemaRegistry, ToolSchema};

// Error types
pub use error::{Error, Result};

// Handler chain
pub use handler::{
    BrowserWorkerError, ErrorAction, ErrorCategory, ErrorHandler, ErrorHandlerChain,
    ErrorHandlingResult, ErrorSeverity,
};

// Identifier types
pub use identifiers::{CorrelationId, RequestId, SessionCode};

// Transport surface
pub use transport::{ConnectionManager, ConnectionState, ConnectionStatus, PollingManager};
