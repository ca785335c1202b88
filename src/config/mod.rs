//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → WatchConfig (validated, immutable)
//!     → handed to ControlPlaneWatch, which builds breakers, retry managers and registries
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; running watchers keep the settings they were built with
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{CircuitBreakerConfig, ObservabilityConfig, PollConfig, RetryConfig, WatchConfig};
pub use validation::{validate_config, ValidationError};
