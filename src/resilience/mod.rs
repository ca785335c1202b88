//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Control-plane fetch:
//!     → circuit_breaker.rs (admit or reject; record the outcome of the whole retried call)
//!     → retries.rs (re-run transient failures)
//!     → backoff.rs (capped exponential delay between attempts)
//! ```
//!
//! # Design Decisions
//! - The breaker wraps the retry loop, so one exhausted retry run is one breaker failure
//! - Every watcher owns its own breaker and retry manager
//! - Cancellation is propagated, never counted as a failure

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use backoff::{BackoffPolicy, InvalidBackoff};
pub use circuit_breaker::{BreakerError, CircuitBreaker, CircuitState};
pub use retries::{RetryError, RetryManager};
