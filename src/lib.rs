//! Control-plane watch library: resilient polling of a service registry and
//! configuration store with change detection.

pub mod config;
pub mod control_plane;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod watch;

pub use config::schema::WatchConfig;
pub use control_plane::{ConfigFetcher, ConfigSnapshot, FetchError, Instance, InstanceFetcher};
pub use lifecycle::{ControlPlaneWatch, PluginError};
pub use resilience::{CircuitBreaker, CircuitState, RetryManager};
pub use watch::{ConfigWatcher, ServiceWatcher, WatchError, WatcherRegistry};
