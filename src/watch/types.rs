//! Watch error and callback types.

use std::sync::Arc;
use thiserror::Error;

use crate::control_plane::FetchError;
use crate::resilience::{BreakerError, RetryError};

/// Error delivered to `on_error` callbacks and returned by one-shot queries.
#[derive(Debug, Clone, Error)]
pub enum WatchError {
    /// The watcher's circuit breaker refused the call.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// Every retry failed with a transient error.
    #[error("fetch failed after {attempts} attempts: {source}")]
    RetryExhausted { attempts: u32, source: FetchError },

    /// The control plane returned an error that is not worth retrying.
    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    /// The watch or query was cancelled.
    #[error("watch cancelled")]
    Cancelled,
}

impl WatchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WatchError::Cancelled)
    }
}

impl From<BreakerError<RetryError<FetchError>>> for WatchError {
    fn from(err: BreakerError<RetryError<FetchError>>) -> Self {
        match err {
            BreakerError::Open => WatchError::CircuitOpen,
            BreakerError::Inner(RetryError::Exhausted { attempts, last }) => {
                WatchError::RetryExhausted { attempts, source: last }
            }
            BreakerError::Inner(RetryError::Aborted { last, .. }) => WatchError::Fetch(last),
            BreakerError::Inner(RetryError::Cancelled) => WatchError::Cancelled,
        }
    }
}

/// Called with the new snapshot after a change.
pub type ChangeCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Called with the error of a failed tick.
pub type ErrorCallback = Arc<dyn Fn(&WatchError) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_conversion() {
        let err = WatchError::from(BreakerError::Open);
        assert!(matches!(err, WatchError::CircuitOpen));

        let err = WatchError::from(BreakerError::Inner(RetryError::Exhausted {
            attempts: 4,
            last: FetchError::Unavailable("refused".into()),
        }));
        assert_eq!(
            err.to_string(),
            "fetch failed after 4 attempts: control plane unavailable: refused"
        );
        assert!(err.source().is_some());

        let err = WatchError::from(BreakerError::Inner(RetryError::Aborted {
            attempts: 1,
            last: FetchError::Rejected("no such namespace".into()),
        }));
        assert!(matches!(err, WatchError::Fetch(FetchError::Rejected(_))));

        assert!(WatchError::from(BreakerError::Inner(RetryError::Cancelled)).is_cancelled());
    }
}
