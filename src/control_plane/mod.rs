//! Control-plane boundary.
//!
//! # Data Flow
//! ```text
//! Watcher tick / one-shot query
//!     → client.rs (InstanceFetcher / ConfigFetcher, implemented by the application)
//!     → types.rs (Instance, ConfigSnapshot, FetchError)
//! ```

pub mod client;
pub mod types;

pub use client::{ConfigFetcher, InstanceFetcher};
pub use types::{ConfigKey, ConfigSnapshot, FetchError, Instance, InstanceSummary, ServiceKey};
