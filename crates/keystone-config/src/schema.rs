//! Configuration sections.

use std::time::Duration;

use keystone_telemetry::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Install a subscriber at startup.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `EnvFilter` directives, e.g. `"info,keystone_middleware=debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`.
    #[serde(default)]
    pub format: LogFormat,

    /// Include file and line in log records.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// The telemetry crate's view of this section.
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            format: self.format,
            include_location: self.include_location,
            include_target: true,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP server section.
///
/// ```
/// use keystone_config::ServerConfig;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.request_timeout_ms, 30_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    /// Grace period for in-flight connections on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Per-request deadline enforced by the timeout stage.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Request deadline.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

const fn default_shutdown_timeout() -> u64 {
    30
}

const fn default_request_timeout() -> u64 {
    30_000
}

/// Error reporting section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ErrorsConfig {
    /// Show `system` error messages to clients.
    #[serde(default)]
    pub expose_internal_errors: bool,

    /// Age after which aggregate entries are evicted by cleanup.
    #[serde(default = "default_aggregator_max_age")]
    pub aggregator_max_age_ms: u64,

    /// Entries returned in the stats top list.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            expose_internal_errors: false,
            aggregator_max_age_ms: default_aggregator_max_age(),
            top_n: default_top_n(),
        }
    }
}

impl ErrorsConfig {
    /// Aggregator max age.
    #[must_use]
    pub const fn aggregator_max_age(&self) -> Duration {
        Duration::from_millis(self.aggregator_max_age_ms)
    }
}

const fn default_aggregator_max_age() -> u64 {
    86_400_000
}

const fn default_top_n() -> usize {
    10
}

/// One limiter's window, budget and penalty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LimiterConfig {
    /// Counting window.
    pub window_ms: u64,
    /// Attempts allowed per window.
    pub max_attempts: u32,
    /// Block after exceeding the budget.
    pub block_duration_ms: u64,
}

const MINUTE_MS: u64 = 60_000;

impl LimiterConfig {
    /// 5 attempts per 15 minutes, 30 minute block.
    #[must_use]
    pub const fn login() -> Self {
        Self {
            window_ms: 15 * MINUTE_MS,
            max_attempts: 5,
            block_duration_ms: 30 * MINUTE_MS,
        }
    }

    /// 3 attempts per hour, 1 hour block.
    #[must_use]
    pub const fn register() -> Self {
        Self {
            window_ms: 60 * MINUTE_MS,
            max_attempts: 3,
            block_duration_ms: 60 * MINUTE_MS,
        }
    }

    /// 3 attempts per hour, 1 hour block.
    #[must_use]
    pub const fn password_reset() -> Self {
        Self::register()
    }

    /// 1000 requests per 15 minutes, 5 minute block.
    #[must_use]
    pub const fn api() -> Self {
        Self {
            window_ms: 15 * MINUTE_MS,
            max_attempts: 1_000,
            block_duration_ms: 5 * MINUTE_MS,
        }
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Block length.
    #[must_use]
    pub const fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_duration_ms)
    }
}

/// Rate limit section.
///
/// ```toml
/// [rate_limits]
/// enabled = true
///
/// [rate_limits.login]
/// window_ms = 900000
/// max_attempts = 5
/// block_duration_ms = 1800000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitsConfig {
    /// Install limiters at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Checks between access-triggered sweeps. Zero disables sweeping.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Login attempts.
    #[serde(default = "LimiterConfig::login")]
    pub login: LimiterConfig,

    /// Account registration.
    #[serde(default = "LimiterConfig::register")]
    pub register: LimiterConfig,

    /// Password reset requests.
    #[serde(default = "LimiterConfig::password_reset")]
    pub password_reset: LimiterConfig,

    /// General API traffic.
    #[serde(default = "LimiterConfig::api")]
    pub api: LimiterConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cleanup_interval: default_cleanup_interval(),
            login: LimiterConfig::login(),
            register: LimiterConfig::register(),
            password_reset: LimiterConfig::password_reset(),
            api: LimiterConfig::api(),
        }
    }
}

impl RateLimitsConfig {
    /// Named limiters in a fixed order.
    #[must_use]
    pub fn named(&self) -> [(&'static str, &LimiterConfig); 4] {
        [
            ("login", &self.login),
            ("register", &self.register),
            ("password_reset", &self.password_reset),
            ("api", &self.api),
        ]
    }

    /// Mutable access by section name (`login`, `register`, `password_reset`, `api`).
    pub fn get_mut(&mut self, name: &str) -> Option<&mut LimiterConfig> {
        match name {
            "login" => Some(&mut self.login),
            "register" => Some(&mut self.register),
            "password_reset" => Some(&mut self.password_reset),
            "api" => Some(&mut self.api),
            _ => None,
        }
    }
}

const fn default_cleanup_interval() -> u64 {
    1_000
}

const fn default_true() -> bool {
    true
}
