//! Structured logging setup.
//!
//! JSON lines in production, pretty multi-line output in development, both
//! filtered through an `EnvFilter` directive string such as
//! `"info,keystone_middleware=debug"`.
//!
//! # Example
//!
//! ```rust,ignore
//! use keystone_telemetry::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(http.method = "GET", http.path = "/jobs", "Dispatching");
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable, multi-line.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to install a subscriber at all.
    pub enabled: bool,
    /// `EnvFilter` directives.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Include file and line of the call site.
    pub include_location: bool,
    /// Include the module path target.
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Pretty output at `debug` with call-site locations.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            include_location: true,
            include_target: true,
        }
    }

    /// JSON output at `info`.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            format: LogFormat::Json,
            include_location: false,
            include_target: true,
        }
    }
}

/// Installs the global subscriber.
///
/// Fails if the level directives do not parse or a global subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = create_env_filter(&config.level)?;

    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Parses `EnvFilter` directives.
pub fn create_env_filter(directives: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level '{directives}': {e}")))
}

/// Field names shared by every log site.
pub mod fields {
    /// Request correlation id.
    pub const REQUEST_ID: &str = "request_id";
    /// HTTP method.
    pub const HTTP_METHOD: &str = "http.method";
    /// Request path.
    pub const HTTP_PATH: &str = "http.path";
    /// Response status.
    pub const HTTP_STATUS: &str = "http.status_code";
    /// Client address.
    pub const CLIENT_IP: &str = "client.ip";
    /// Error code.
    pub const ERROR_CODE: &str = "error.code";
    /// Error category.
    pub const ERROR_CATEGORY: &str = "error.category";
    /// Error severity.
    pub const ERROR_SEVERITY: &str = "error.severity";
    /// Rate limiter name.
    pub const RATE_LIMITER: &str = "rate_limit.limiter";
    /// Rate limit key.
    pub const RATE_LIMIT_KEY: &str = "rate_limit.key";
    /// Elapsed milliseconds.
    pub const DURATION_MS: &str = "duration_ms";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let dev = LogConfig::development();
        assert_eq!(dev.format, LogFormat::Pretty);
        assert!(dev.include_location);
        assert_eq!(dev.level, "debug");

        let prod = LogConfig::production();
        assert_eq!(prod.format, LogFormat::Json);
        assert!(!prod.include_location);
        assert_eq!(prod.level, "info");
    }

    #[test]
    fn test_format_serde() {
        let format: LogFormat = serde_json::from_str("\"pretty\"").unwrap();
        assert_eq!(format, LogFormat::Pretty);
        assert_eq!(serde_json::to_string(&LogFormat::Json).unwrap(), "\"json\"");
    }

    #[test]
    fn test_env_filter() {
        assert!(create_env_filter("info,keystone_router=trace").is_ok());
        assert!(create_env_filter("warn").is_ok());
    }

    #[test]
    fn test_disabled_is_noop() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_field_names() {
        assert_eq!(fields::REQUEST_ID, "request_id");
        assert_eq!(fields::ERROR_CATEGORY, "error.category");
    }
}
