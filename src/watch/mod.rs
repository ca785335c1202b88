//! Change detection subsystem.
//!
//! # Data Flow
//! ```text
//! ticker (every interval)
//!     → watcher.rs (breaker → retry → fetch)
//!     → diff.rs (changed against the last snapshot?)
//!     → on_change callbacks        (changed)
//!     → on_error callbacks         (breaker open, retries exhausted, rejected)
//!
//! registry.rs
//!     key → single Arc<Watcher>, created and started on first request
//! ```
//!
//! # Design Decisions
//! - Polling, not push: snapshots are compared, never streamed
//! - Callbacks run on the watcher's own task and must not panic
//! - Callbacks may read the watcher (`last_snapshot`) but must not await `stop_and_wait` on it

pub mod diff;
pub mod registry;
pub mod types;
pub mod watcher;

pub use diff::{config_changed, instances_changed};
pub use registry::WatcherRegistry;
pub use types::{ChangeCallback, ErrorCallback, WatchError};
pub use watcher::{
    ConfigSource, ConfigWatcher, ServiceSource, ServiceWatcher, WatchSource, Watcher, WatcherSettings,
};
