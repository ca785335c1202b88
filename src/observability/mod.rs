//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! resilience, watch and lifecycle produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//!
//! Consumers (installed by the host application):
//!     → Log aggregation (stdout, file, remote)
//!     → Metrics exporter (e.g. Prometheus)
//! ```
//!
//! # Design Decisions
//! - Structured logging with watcher key and breaker name as fields
//! - Metrics are cheap (no-ops until a recorder is installed)

pub mod logging;
pub mod metrics;
