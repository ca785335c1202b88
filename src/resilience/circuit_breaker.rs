//! Circuit breaker for control-plane protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: control plane assumed down, calls fail fast
//! - Half-Open: probing whether the control plane recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures / (failures + successes) >= threshold, checked after a failure
//! Open → Half-Open: first call after open_duration has elapsed since the last failure
//! Half-Open → Closed: half_open_max_probes successes (counters reset)
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - One breaker per watcher, never shared across watchers
//! - Calls are serialized by an async gate held for the whole call
//! - Counters live behind a separate short-lived lock, so state reads never wait on a call
//! - Rejections while open leave the counters untouched

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a breaker-guarded call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// Rejected without running the operation.
    Open,
    /// The operation ran and failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open => write!(f, "circuit breaker is open"),
            BreakerError::Inner(e) => e.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Open => None,
            BreakerError::Inner(e) => e.source(),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    half_open_successes: u32,
    last_failure: Option<Instant>,
}

impl BreakerState {
    fn failure_rate(&self) -> f64 {
        let total = self.failure_count + self.success_count;
        if total == 0 {
            return 0.0;
        }
        self.failure_count as f64 / total as f64
    }

    fn reset_counters(&mut self) {
        self.failure_count = 0;
        self.success_count = 0;
        self.half_open_successes = 0;
    }
}

/// Failure-rate circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: f64,
    open_duration: Duration,
    half_open_max_probes: u32,
    /// Serializes `call` end to end.
    gate: tokio::sync::Mutex<()>,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker. `name` labels logs and metrics.
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            threshold: config.threshold,
            open_duration: Duration::from_secs(config.open_duration_secs),
            half_open_max_probes: config.half_open_max_probes.max(1),
            gate: tokio::sync::Mutex::new(()),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_successes: 0,
                last_failure: None,
            }),
        }
    }

    /// Override the open duration (sub-second values are useful in tests).
    pub fn with_open_duration(mut self, open_duration: Duration) -> Self {
        self.open_duration = open_duration;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` under breaker protection; every error counts as a failure.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(op, |_| true).await
    }

    /// Run `op` under breaker protection; only errors for which `is_failure`
    /// returns true are recorded as failures.
    pub async fn call_classified<T, E, F, Fut, C>(&self, op: F, is_failure: C) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let _permit = self.gate.lock().await;

        if !self.try_admit() {
            metrics::record_breaker_rejection(&self.name);
            return Err(BreakerError::Open);
        }

        let result = op().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) if is_failure(e) => self.record_failure(),
            Err(_) => {}
        }
        result.map_err(BreakerError::Inner)
    }

    /// Current state. Does not wait for an in-flight call.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// `failures / (failures + successes)`, 0 when nothing was recorded.
    pub fn failure_rate(&self) -> f64 {
        self.lock().failure_rate()
    }

    /// Open the breaker now; it stays open for `open_duration`.
    pub fn force_open(&self) {
        let mut inner = self.lock();
        inner.last_failure = Some(Instant::now());
        inner.half_open_successes = 0;
        self.transition(&mut inner, CircuitState::Open);
        tracing::warn!(breaker = %self.name, "Circuit breaker forced open");
    }

    /// Close the breaker now and reset its counters.
    pub fn force_close(&self) {
        let mut inner = self.lock();
        inner.reset_counters();
        self.transition(&mut inner, CircuitState::Closed);
        tracing::info!(breaker = %self.name, "Circuit breaker forced closed");
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().expect("circuit breaker mutex poisoned")
    }

    fn try_admit(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(self.open_duration, |at| at.elapsed());
                if elapsed < self.open_duration {
                    return false;
                }
                inner.half_open_successes = 0;
                self.transition(&mut inner, CircuitState::HalfOpen);
                tracing::info!(breaker = %self.name, "Circuit breaker half-open, probing");
                true
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.success_count += 1;

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.half_open_max_probes {
                inner.reset_counters();
                self.transition(&mut inner, CircuitState::Closed);
                tracing::info!(breaker = %self.name, "Circuit breaker closed after successful probes");
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                let rate = inner.failure_rate();
                if rate >= self.threshold {
                    self.transition(&mut inner, CircuitState::Open);
                    tracing::warn!(
                        breaker = %self.name,
                        failure_rate = rate,
                        threshold = self.threshold,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes = 0;
                self.transition(&mut inner, CircuitState::Open);
                tracing::warn!(breaker = %self.name, "Circuit breaker reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        if inner.state != to {
            inner.state = to;
            metrics::record_breaker_transition(&self.name, to.as_str());
        }
    }
}
