//! Typed configuration for Keystone.
//!
//! Layering: defaults → TOML/JSON file → `.env` → `KEYSTONE__SECTION__KEY`
//! environment variables. Unknown fields are errors, and
//! [`KeystoneConfig::validate`] rejects zero durations and budgets.
//!
//! # Configuration File Format
//!
//! ```toml
//! [logging]
//! level = "info,keystone_middleware=debug"
//! format = "json"
//!
//! [server]
//! http_addr = "0.0.0.0:8080"
//! shutdown_timeout_secs = 30
//! request_timeout_ms = 30000
//!
//! [errors]
//! expose_internal_errors = false
//! aggregator_max_age_ms = 86400000
//! top_n = 10
//!
//! [rate_limits]
//! enabled = true
//!
//! [rate_limits.login]
//! window_ms = 900000
//! max_attempts = 5
//! block_duration_ms = 1800000
//! ```

#![doc(html_root_url = "https://docs.rs/keystone-config/0.1.0")]

mod config;
mod error;
mod loader;
mod schema;

pub use config::KeystoneConfig;
pub use error::ConfigError;
pub use keystone_telemetry::LogFormat;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{ErrorsConfig, LimiterConfig, LoggingConfig, RateLimitsConfig, ServerConfig};
