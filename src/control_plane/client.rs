//! Control-plane client capabilities.
//!
//! # Responsibilities
//! - Define the two fetch operations the watch core consumes
//! - Keep transport concerns (protocol, TLS, per-call timeout) on the implementor's side
//!
//! # Design Decisions
//! - One small trait per capability, injected as `Arc<dyn …>` at construction
//! - Any returned error is treated as retryable unless `FetchError::is_retryable` says otherwise

use async_trait::async_trait;

use crate::control_plane::types::{ConfigSnapshot, FetchError, Instance};

/// Fetches the current instance set of a service.
#[async_trait]
pub trait InstanceFetcher: Send + Sync {
    async fn fetch_instances(&self, service: &str, namespace: &str) -> Result<Vec<Instance>, FetchError>;
}

/// Fetches the current content of a configuration file.
///
/// A missing file should be reported as `Ok(ConfigSnapshot::absent(..))`,
/// not as an error.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch_config(
        &self,
        namespace: &str,
        group: &str,
        file_name: &str,
    ) -> Result<ConfigSnapshot, FetchError>;
}
