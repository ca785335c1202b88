//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! ControlPlaneWatch::new(config, fetchers)
//!     → validate config → build registries and the query breaker (NotStarted)
//! start()
//!     → Running: watch_* and get_* requests accepted
//! stop()
//!     → cancel in-flight queries → stop every watcher → Stopped
//! ```
//!
//! # Design Decisions
//! - Requests outside the running state fail fast with a typed error
//! - Dropping the plugin stops it

pub mod plugin;

pub use plugin::{ControlPlaneWatch, PluginError};
