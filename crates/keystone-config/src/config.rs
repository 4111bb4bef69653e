//! The root configuration type.

use std::net::SocketAddr;

use keystone_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ErrorsConfig, LoggingConfig, RateLimitsConfig, ServerConfig};

/// Complete Keystone configuration.
///
/// Load it with [`ConfigLoader`](crate::ConfigLoader); every section and
/// field has a default, and unknown fields are rejected.
///
/// ```
/// use keystone_config::KeystoneConfig;
///
/// let config = KeystoneConfig::default();
/// assert_eq!(config.server.http_addr, "0.0.0.0:8080");
/// assert_eq!(config.rate_limits.login.max_attempts, 5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct KeystoneConfig {
    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Error rendering and aggregation.
    #[serde(default)]
    pub errors: ErrorsConfig,

    /// Rate limiters.
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
}

impl KeystoneConfig {
    /// Checks addresses parse and every duration and budget is positive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid(
                "server.http_addr",
                format!("invalid socket address: {}", self.server.http_addr),
            ));
        }
        positive("server.shutdown_timeout_secs", self.server.shutdown_timeout_secs)?;
        positive("server.request_timeout_ms", self.server.request_timeout_ms)?;
        positive("errors.aggregator_max_age_ms", self.errors.aggregator_max_age_ms)?;
        positive("errors.top_n", u64::try_from(self.errors.top_n).unwrap_or(u64::MAX))?;

        for (name, limiter) in self.rate_limits.named() {
            positive(&format!("rate_limits.{name}.window_ms"), limiter.window_ms)?;
            positive(
                &format!("rate_limits.{name}.max_attempts"),
                u64::from(limiter.max_attempts),
            )?;
            positive(
                &format!("rate_limits.{name}.block_duration_ms"),
                limiter.block_duration_ms,
            )?;
        }
        Ok(())
    }

    /// Pretty `debug` logs and internal error messages shown to clients.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.include_location = true;
        config.errors.expose_internal_errors = true;
        config
    }

    /// JSON `info` logs and masked internal errors.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.errors.expose_internal_errors = false;
        config
    }
}

fn positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be greater than 0"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(KeystoneConfig::default().validate().is_ok());
        assert!(KeystoneConfig::development().validate().is_ok());
        assert!(KeystoneConfig::production().validate().is_ok());
    }

    #[test]
    fn test_presets_differ() {
        let dev = KeystoneConfig::development();
        assert_eq!(dev.logging.format, LogFormat::Pretty);
        assert!(dev.errors.expose_internal_errors);

        let prod = KeystoneConfig::production();
        assert_eq!(prod.logging.format, LogFormat::Json);
        assert!(!prod.errors.expose_internal_errors);
    }

    #[test]
    fn test_bad_address_rejected() {
        let mut config = KeystoneConfig::default();
        config.server.http_addr = "localhost".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.http_addr"));
    }

    #[test]
    fn test_zero_limiter_values_rejected() {
        let mut config = KeystoneConfig::default();
        config.rate_limits.register.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rate_limits.register.max_attempts"));

        let mut config = KeystoneConfig::default();
        config.rate_limits.api.block_duration_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<KeystoneConfig, _> = toml::from_str("[server]\nport = 80\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = KeystoneConfig::development();
        let json = serde_json::to_string(&config).unwrap();
        let back: KeystoneConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
