//! Circuit breaker guarding calls into the host surface.
//!
//! A wedged host frame fails every call it receives, and each failure
//! costs a full request timeout. The breaker watches for failure bursts
//! and, once tripped, rejects calls immediately until a cooldown ends
//! and a probe succeeds.
//!
//! # States
//!
//! ```text
//! CLOSED ──failures >= threshold within window──► OPEN
//!   ▲                                              │
//!   │ successes >= success_threshold     cooldown elapsed
//!   │                                              ▼
//!   └──────────────── HALF-OPEN ◄──────────────────┘
//!            (probe failure reopens immediately)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// CircuitState
// ============================================================================

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// Probing; limited calls pass through to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half-open"),
        }
    }
}

// ============================================================================
// CircuitBreakerConfig
// ============================================================================

/// Tuning knobs for one breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Failures within `time_window` that trip the breaker.
    pub failure_threshold: usize,
    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,
    /// Sliding window over which failures are counted.
    pub time_window: Duration,
    /// How long the breaker stays open before probing.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            time_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// CircuitBreakerStats
// ============================================================================

/// Point-in-time breaker statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Failures currently inside the sliding window.
    pub failure_count: usize,
    /// Consecutive half-open successes so far.
    pub success_count: u32,
    /// Calls attempted through this breaker, rejected ones included.
    pub total_requests: u64,
    /// Calls rejected while open.
    pub rejected: u64,
    /// When the breaker last tripped, if it ever has.
    pub last_open: Option<Instant>,
}

// ============================================================================
// CircuitBreaker
// ============================================================================

struct Inner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    success_count: u32,
    total_requests: u64,
    rejected: u64,
    opened_at: Option<Instant>,
}

/// Failure-rate breaker for a named downstream component.
pub struct CircuitBreaker {
    component: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the named component.
    #[must_use]
    pub fn new(component: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            component: component.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                success_count: 0,
                total_requests: 0,
                rejected: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state, resolving an elapsed cooldown to half-open.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.resolve_cooldown(&mut inner);
        inner.state
    }

    /// Runs an operation through the breaker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] without invoking the operation
    /// when the breaker is open; otherwise returns the operation's own
    /// outcome, recording it.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Admission check; counts the request either way.
    fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.total_requests += 1;
        self.resolve_cooldown(&mut inner);

        if inner.state == CircuitState::Open {
            inner.rejected += 1;
            return Err(Error::circuit_open(self.component.clone()));
        }
        Ok(())
    }

    /// Moves open to half-open once the cooldown has elapsed.
    fn resolve_cooldown(&self, inner: &mut Inner) {
        if inner.state == CircuitState::Open
            && let Some(opened_at) = inner.opened_at
            && opened_at.elapsed() >= self.config.cooldown
        {
            debug!(component = %self.component, "Circuit half-open; probing");
            inner.state = CircuitState::HalfOpen;
            inner.success_count = 0;
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    debug!(component = %self.component, "Circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => {
                // Success does not erase window history; a flapping
                // component still trips.
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::HalfOpen => {
                warn!(component = %self.component, "Probe failed; circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.success_count = 0;
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                let window = self.config.time_window;
                while inner
                    .failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > window)
                {
                    inner.failures.pop_front();
                }

                if inner.failures.len() >= self.config.failure_threshold {
                    warn!(
                        component = %self.component,
                        failures = inner.failures.len(),
                        "Circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Returns a snapshot of the breaker statistics.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.inner.lock();
        self.resolve_cooldown(&mut inner);
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failures.len(),
            success_count: inner.success_count,
            total_requests: inner.total_requests,
            rejected: inner.rejected,
            last_open: inner.opened_at,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "host",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                time_window: Duration::from_secs(60),
                cooldown: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn test_closed_passes_through() {
        let breaker = breaker();

        let result = breaker.execute(|| async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.expect("passes"), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_at_failure_threshold() {
        let breaker = breaker();

        for _ in 0..3 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(Error::execution("boom")) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Open breaker rejects without invoking the operation.
        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .execute(|| async {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<(), Error>(())
            })
            .await;
        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(breaker.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_half_open_after_cooldown_then_closes() {
        let breaker = breaker();

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let breaker = breaker();

        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_old_failures_age_out_of_window() {
        let breaker = CircuitBreaker::new(
            "host",
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                time_window: Duration::from_millis(30),
                cooldown: Duration::from_secs(30),
            },
        );

        breaker.record_failure();
        breaker.record_failure();
        tokio::time::sleep(Duration::from_millis(40)).await;
        breaker.record_failure();

        // Only one failure is inside the window now.
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failure_count, 1);
    }

    #[tokio::test]
    async fn test_stats_counts_totals() {
        let breaker = breaker();

        let _ = breaker.execute(|| async { Ok::<_, Error>(()) }).await;
        let _ = breaker
            .execute(|| async { Err::<(), _>(Error::execution("boom")) })
            .await;

        let stats = breaker.stats();
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.state, CircuitState::Closed);
    }
}
