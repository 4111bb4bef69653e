//! # Keystone Telemetry
//!
//! Observability for the dispatch layer:
//!
//! - [`ErrorAggregator`] - in-memory counts of structured errors by `(code, message)`
//! - [`logging`] - `tracing-subscriber` setup and shared field names
//! - [`metrics`] - counters recorded through the `metrics` facade

pub mod aggregator;
mod error;
pub mod logging;
pub mod metrics;

pub use aggregator::{AggregateEntry, ErrorAggregator, ErrorStats, DEFAULT_MAX_AGE, DEFAULT_TOP_N};
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat};

/// Result type for telemetry setup.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
