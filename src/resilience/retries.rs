//! Retry logic.
//!
//! # Responsibilities
//! - Re-run a failed async operation up to `max_attempts` extra times
//! - Wait `BackoffPolicy::delay(attempt)` between attempts
//! - Stop immediately on cancellation: before an attempt, during it, or during the wait
//!
//! # Design Decisions
//! - Success returns at once, even after earlier failures
//! - One wrapped error at the end carrying the last cause and attempt count
//! - Callers classify errors; unclassified errors are all retryable
//! - The wait selects on the token, so cancellation never sleeps out the backoff

use std::fmt;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed; `last` is the final error.
    Exhausted { attempts: u32, last: E },
    /// The classifier marked the error as not worth retrying.
    Aborted { attempts: u32, last: E },
    /// The cancellation token fired.
    Cancelled,
}

impl<E> RetryError<E> {
    /// Calls made before giving up; `None` when cancelled.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Aborted { attempts, .. } => Some(*attempts),
            RetryError::Cancelled => None,
        }
    }

    /// The last underlying error, if an attempt ran.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::Aborted { last, .. } => Some(last),
            RetryError::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "operation failed after {} attempts, last error: {}", attempts, last)
            }
            RetryError::Aborted { attempts, last } => {
                write!(f, "operation failed with non-retryable error on attempt {}: {}", attempts, last)
            }
            RetryError::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Runs operations with bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: BackoffPolicy,
}

impl RetryManager {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Run `op`, retrying every error.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(None, |_: &E| true, op).await
    }

    /// Run `op`, retrying every error, until `cancel` fires.
    pub async fn run_cancellable<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(Some(cancel), |_: &E| true, op).await
    }

    /// Run `op` until `cancel` fires, retrying only errors accepted by `should_retry`.
    pub async fn run_cancellable_if<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        should_retry: P,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        self.execute(Some(cancel), should_retry, op).await
    }

    async fn execute<T, E, F, Fut, P>(
        &self,
        cancel: Option<&CancellationToken>,
        should_retry: P,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(RetryError::Cancelled);
            }

            let outcome = match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(RetryError::Cancelled),
                        outcome = op() => outcome,
                    }
                }
                None => op().await,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(retries = attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !should_retry(&err) {
                tracing::warn!(attempt = attempt + 1, error = %err, "Operation failed with non-retryable error");
                return Err(RetryError::Aborted { attempts: attempt + 1, last: err });
            }

            if attempt >= max_attempts {
                return Err(RetryError::Exhausted { attempts: attempt + 1, last: err });
            }

            let delay = self.policy.delay(attempt);
            tracing::warn!(
                attempt = attempt + 1,
                max_attempts = max_attempts + 1,
                error = %err,
                backoff = ?delay,
                "Operation failed, retrying"
            );
            metrics::record_retry();

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }
}
