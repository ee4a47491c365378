//! Worker configuration.
//!
//! Provides a type-safe builder for every option the engine recognizes:
//! relay endpoints, heartbeat and polling cadence, retry/backoff limits,
//! queue bounds, and the enabled capability set.
//!
//! # Example
//!
//! ```ignore
//! use browser_worker::WorkerConfig;
//!
//! let config = WorkerConfig::new("https://relay.example.com", "ABC123")
//!     .with_debug()
//!     .with_poll_interval(Duration::from_secs(2))
//!     .with_max_queue_size(50);
//!
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionCode;
use crate::schema::Capability;

// ============================================================================
// Defaults
// ============================================================================

/// Default heartbeat timeout (relay emits heartbeats well inside this).
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default heartbeat check interval (must be shorter than the timeout).
pub const DEFAULT_HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Default polling interval in pull mode.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default maximum automatic reconnect attempts for the push transport.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// Default base reconnect delay.
pub const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Default reconnect delay cap.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Default exponential backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default queue capacity.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;

/// Default per-request timeout while queued.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default executor dequeue cadence.
pub const DEFAULT_EXECUTOR_TICK: Duration = Duration::from_millis(50);

/// Default consecutive push failures before falling back to polling.
pub const DEFAULT_PUSH_FAILURE_THRESHOLD: u32 = 3;

// ============================================================================
// WorkerConfig
// ============================================================================

/// Complete worker configuration.
///
/// Constructed with [`WorkerConfig::new`] and refined with `with_*`
/// builder methods; call [`WorkerConfig::validate`] before starting the
/// worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Relay base URL, e.g. `https://relay.example.com`.
    pub relay_base_url: String,

    /// Session code issued by the relay.
    pub session_code: SessionCode,

    /// Verbose tracing output.
    pub debug: bool,

    /// Heartbeat silence tolerated before the stream is declared stalled.
    pub heartbeat_timeout: Duration,

    /// How often the heartbeat watchdog checks.
    pub heartbeat_check_interval: Duration,

    /// Steady-state polling interval in pull mode.
    pub poll_interval: Duration,

    /// Maximum automatic reconnect attempts for the push transport.
    pub max_retry_attempts: u32,

    /// Base delay for exponential backoff.
    pub base_retry_delay: Duration,

    /// Backoff delay cap.
    pub max_retry_delay: Duration,

    /// Exponential backoff multiplier.
    pub backoff_multiplier: f64,

    /// Queue capacity; requests beyond it are rejected on arrival.
    pub max_queue_size: usize,

    /// How long a request may wait in the queue before timing out.
    pub request_timeout: Duration,

    /// Executor dequeue cadence.
    pub executor_tick: Duration,

    /// Consecutive push failures before falling back to polling.
    pub push_failure_threshold: u32,

    /// Capabilities enabled for this session.
    pub enabled_capabilities: Vec<Capability>,

    /// Pass through tools absent from the schema registry unvalidated.
    ///
    /// Supports forward-compatible rollout of new tools on the relay
    /// side before this worker's registry is updated.
    pub allow_unknown_tools: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            relay_base_url: String::new(),
            session_code: SessionCode::new(""),
            debug: false,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            heartbeat_check_interval: DEFAULT_HEARTBEAT_CHECK_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            base_retry_delay: DEFAULT_BASE_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            executor_tick: DEFAULT_EXECUTOR_TICK,
            push_failure_threshold: DEFAULT_PUSH_FAILURE_THRESHOLD,
            enabled_capabilities: vec![Capability::Data, Capability::Interactive],
            allow_unknown_tools: false,
        }
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl WorkerConfig {
    /// Creates a configuration with the required relay URL and session
    /// code; every other option starts at its default.
    #[must_use]
    pub fn new(relay_base_url: impl Into<String>, session_code: impl Into<SessionCode>) -> Self {
        Self {
            relay_base_url: relay_base_url.into(),
            session_code: session_code.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl WorkerConfig {
    /// Enables verbose tracing output.
    #[inline]
    #[must_use]
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Sets the heartbeat timeout.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the heartbeat check interval.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_check_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_check_interval = interval;
        self
    }

    /// Sets the steady-state polling interval.
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum reconnect attempts for the push transport.
    #[inline]
    #[must_use]
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Sets the base backoff delay.
    #[inline]
    #[must_use]
    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    /// Sets the backoff delay cap.
    #[inline]
    #[must_use]
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[inline]
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the queue capacity.
    #[inline]
    #[must_use]
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Sets the per-request queue timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the executor dequeue cadence.
    #[inline]
    #[must_use]
    pub fn with_executor_tick(mut self, tick: Duration) -> Self {
        self.executor_tick = tick;
        self
    }

    /// Sets the push failure threshold for poll fallback.
    #[inline]
    #[must_use]
    pub fn with_push_failure_threshold(mut self, threshold: u32) -> Self {
        self.push_failure_threshold = threshold;
        self
    }

    /// Replaces the enabled capability set.
    #[inline]
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.enabled_capabilities = capabilities.into_iter().collect();
        self
    }

    /// Allows tools absent from the schema registry to pass through
    /// unvalidated.
    #[inline]
    #[must_use]
    pub fn with_allow_unknown_tools(mut self) -> Self {
        self.allow_unknown_tools = true;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl WorkerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if the relay URL does not parse
    /// - [`Error::Config`] for empty session codes, zero bounds, or a
    ///   heartbeat check interval that is not shorter than the timeout
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.relay_base_url)
            .map_err(|_| Error::invalid_base_url(&self.relay_base_url))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid_base_url(&self.relay_base_url));
        }

        if self.session_code.is_empty() {
            return Err(Error::config("session code must not be empty"));
        }

        if self.heartbeat_check_interval >= self.heartbeat_timeout {
            return Err(Error::config(
                "heartbeat check interval must be shorter than heartbeat timeout",
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be non-zero"));
        }

        if self.backoff_multiplier < 1.0 {
            return Err(Error::config("backoff multiplier must be >= 1.0"));
        }

        if self.base_retry_delay > self.max_retry_delay {
            return Err(Error::config(
                "base retry delay must not exceed max retry delay",
            ));
        }

        if self.max_queue_size == 0 {
            return Err(Error::config("queue size must be non-zero"));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::config("request timeout must be non-zero"));
        }

        if self.enabled_capabilities.is_empty() {
            return Err(Error::config("at least one capability must be enabled"));
        }

        Ok(())
    }

    /// Parses and returns the relay base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBaseUrl`] if the URL does not parse.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.relay_base_url)
            .map_err(|_| Error::invalid_base_url(&self.relay_base_url))
    }

    /// Returns `true` if the given capability is enabled.
    #[inline]
    #[must_use]
    pub fn capability_enabled(&self, capability: Capability) -> bool {
        self.enabled_capabilities.contains(&capability)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> WorkerConfig {
        WorkerConfig::new("https://relay.example.com", "ABC123")
    }

    #[test]
    fn test_defaults() {
        let config = valid_config();
        assert_eq!(config.max_retry_attempts, DEFAULT_MAX_RETRY_ATTEMPTS);
        assert_eq!(config.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(!config.debug);
        assert!(!config.allow_unknown_tools);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = valid_config()
            .with_debug()
            .with_poll_interval(Duration::from_secs(2))
            .with_max_queue_size(10)
            .with_allow_unknown_tools()
            .with_capabilities([Capability::Data]);

        assert!(config.debug);
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.max_queue_size, 10);
        assert!(config.allow_unknown_tools);
        assert!(config.capability_enabled(Capability::Data));
        assert!(!config.capability_enabled(Capability::Interactive));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = WorkerConfig::new("not a url", "ABC123");
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidBaseUrl { .. })
        ));

        let config = WorkerConfig::new("ftp://relay.example.com", "ABC123");
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_empty_session_code_rejected() {
        let config = WorkerConfig::new("https://relay.example.com", "");
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_heartbeat_interval_must_undercut_timeout() {
        let config = valid_config()
            .with_heartbeat_timeout(Duration::from_secs(5))
            .with_heartbeat_check_interval(Duration::from_secs(5));
        assert!(matches!(config.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_backoff_bounds_validated() {
        let config = valid_config().with_backoff_multiplier(0.5);
        assert!(config.validate().is_err());

        let config = valid_config()
            .with_base_retry_delay(Duration::from_secs(60))
            .with_max_retry_delay(Duration::from_secs(30));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_bounds_rejected() {
        assert!(valid_config().with_max_queue_size(0).validate().is_err());
        assert!(
            valid_config()
                .with_request_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            valid_config()
                .with_capabilities(std::iter::empty())
                .validate()
                .is_err()
        );
    }
}
