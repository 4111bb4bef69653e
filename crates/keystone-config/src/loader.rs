//! Layered configuration loading.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use keystone_telemetry::LogFormat;

use crate::{ConfigError, KeystoneConfig};

/// Default prefix for environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "KEYSTONE";

/// Builds a [`KeystoneConfig`] from layers, later layers winning:
///
/// 1. defaults (or a preset)
/// 2. a TOML or JSON file
/// 3. `.env` entries
/// 4. process environment
///
/// Environment keys use the form `PREFIX__SECTION__KEY`, and limiter keys
/// add the limiter name, e.g. `KEYSTONE__RATE_LIMITS__LOGIN__MAX_ATTEMPTS`.
///
/// # Example
///
/// ```no_run
/// use keystone_config::ConfigLoader;
///
/// # fn main() -> Result<(), keystone_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("keystone.toml")?
///     .with_dotenv()?
///     .with_env_prefix("KEYSTONE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: KeystoneConfig,
    env_prefix: Option<String>,
    dotenv_vars: Vec<(String, String)>,
    extra_vars: Vec<(String, String)>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Starts from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: KeystoneConfig::default(),
            env_prefix: None,
            dotenv_vars: Vec::new(),
            extra_vars: Vec::new(),
        }
    }

    /// Starts from the development preset.
    ///
    /// ```
    /// use keystone_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = KeystoneConfig::development();
        self
    }

    /// Starts from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = KeystoneConfig::production();
        self
    }

    /// Loads a `.toml` or `.json` file, chosen by extension.
    ///
    /// Sections missing from the file take their defaults; the file replaces
    /// any preset chosen earlier.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, malformed or has unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ConfigError::Format(path.display().to_string()))?;
        self.config = parse(&content, format)?;
        Ok(self)
    }

    /// Like [`with_file`](Self::with_file), but a missing file is skipped.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration text in `format` (`toml` or `json`).
    ///
    /// ```
    /// use keystone_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[rate_limits]\nenabled = false\n", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    /// assert!(!config.rate_limits.enabled);
    /// ```
    ///
    /// # Errors
    ///
    /// Fails on malformed content, unknown fields or an unknown format.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, format)?;
        Ok(self)
    }

    /// Reads `./.env` (or the first one found in a parent directory) if present.
    ///
    /// Entries are applied as overrides before the process environment and
    /// are not exported into it.
    ///
    /// # Errors
    ///
    /// Fails if a `.env` file exists but cannot be parsed.
    pub fn with_dotenv(mut self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv_iter() {
            Ok(iter) => {
                for item in iter {
                    self.dotenv_vars.push(item?);
                }
                Ok(self)
            }
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads a specific `.env` file.
    ///
    /// # Errors
    ///
    /// Fails if the file is missing or cannot be parsed.
    pub fn with_dotenv_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        for item in dotenvy::from_path_iter(path.as_ref())? {
            self.dotenv_vars.push(item?);
        }
        Ok(self)
    }

    /// Enables process environment overrides under `prefix`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Adds override variables from an explicit source, applied last.
    ///
    /// Uses the env prefix, or [`DEFAULT_ENV_PREFIX`] when none is set.
    #[must_use]
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.extra_vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Applies overrides and validates.
    ///
    /// # Errors
    ///
    /// Fails on an unparsable override or an invalid final configuration.
    pub fn load(self) -> Result<KeystoneConfig, ConfigError> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides without validating.
    ///
    /// # Errors
    ///
    /// Fails on an unparsable override.
    pub fn load_unvalidated(mut self) -> Result<KeystoneConfig, ConfigError> {
        let prefix = self
            .env_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_ENV_PREFIX.to_string());

        let dotenv = std::mem::take(&mut self.dotenv_vars);
        self.apply_vars(&prefix, dotenv)?;

        if self.env_prefix.is_some() {
            self.apply_vars(&prefix, env::vars())?;
        }

        let extra = std::mem::take(&mut self.extra_vars);
        self.apply_vars(&prefix, extra)?;

        Ok(self.config)
    }

    fn apply_vars<I>(&mut self, prefix: &str, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let head = format!("{prefix}__");
        for (key, value) in vars {
            if let Some(rest) = key.strip_prefix(&head) {
                let parts: Vec<&str> = rest.split("__").collect();
                self.apply_env_var(&key, &parts, &value)?;
            }
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, parts: &[&str], value: &str) -> Result<(), ConfigError> {
        let config = &mut self.config;
        match parts {
            ["LOGGING", "ENABLED"] => config.logging.enabled = parse_bool(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => return Err(ConfigError::env(key, "expected 'json' or 'pretty'")),
                };
            }
            ["LOGGING", "INCLUDE_LOCATION"] => {
                config.logging.include_location = parse_bool(key, value)?;
            }

            ["SERVER", "HTTP_ADDR"] => config.server.http_addr = value.to_string(),
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                config.server.shutdown_timeout_secs = parse_num(key, value)?;
            }
            ["SERVER", "REQUEST_TIMEOUT_MS"] => {
                config.server.request_timeout_ms = parse_num(key, value)?;
            }

            ["ERRORS", "EXPOSE_INTERNAL_ERRORS"] => {
                config.errors.expose_internal_errors = parse_bool(key, value)?;
            }
            ["ERRORS", "AGGREGATOR_MAX_AGE_MS"] => {
                config.errors.aggregator_max_age_ms = parse_num(key, value)?;
            }
            ["ERRORS", "TOP_N"] => config.errors.top_n = parse_num(key, value)?,

            ["RATE_LIMITS", "ENABLED"] => config.rate_limits.enabled = parse_bool(key, value)?,
            ["RATE_LIMITS", "CLEANUP_INTERVAL"] => {
                config.rate_limits.cleanup_interval = parse_num(key, value)?;
            }
            ["RATE_LIMITS", name, field] => {
                let limiter = config
                    .rate_limits
                    .get_mut(&name.to_lowercase())
                    .ok_or_else(|| ConfigError::env(key, "unknown rate limiter"))?;
                match *field {
                    "WINDOW_MS" => limiter.window_ms = parse_num(key, value)?,
                    "MAX_ATTEMPTS" => limiter.max_attempts = parse_num(key, value)?,
                    "BLOCK_DURATION_MS" => limiter.block_duration_ms = parse_num(key, value)?,
                    _ => return Err(ConfigError::env(key, "unknown rate limit field")),
                }
            }

            _ => return Err(ConfigError::env(key, "unknown configuration key")),
        }
        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<KeystoneConfig, ConfigError> {
    match format.to_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::Format(other.to_string())),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env(key, "expected a non-negative integer"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::env(key, "expected boolean")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_load() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, KeystoneConfig::default());
    }

    #[test]
    fn test_string_toml_and_json() {
        let config = ConfigLoader::new()
            .with_string("[server]\nhttp_addr = \"127.0.0.1:3000\"\n", "toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:3000");
        assert_eq!(config.rate_limits.api.max_attempts, 1_000);

        let config = ConfigLoader::new()
            .with_string(r#"{"errors": {"top_n": 3}}"#, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.errors.top_n, 3);
    }

    #[test]
    fn test_unsupported_format() {
        let err = ConfigLoader::new().with_string("", "yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Format(_)));
    }

    #[test]
    fn test_env_overrides() {
        let config = ConfigLoader::new()
            .with_env_vars([
                ("KEYSTONE__RATE_LIMITS__LOGIN__MAX_ATTEMPTS", "10"),
                ("KEYSTONE__RATE_LIMITS__PASSWORD_RESET__WINDOW_MS", "60000"),
                ("KEYSTONE__RATE_LIMITS__ENABLED", "off"),
                ("KEYSTONE__LOGGING__FORMAT", "pretty"),
                ("KEYSTONE__ERRORS__EXPOSE_INTERNAL_ERRORS", "true"),
                ("KEYSTONE__SERVER__REQUEST_TIMEOUT_MS", "500"),
                ("UNRELATED", "ignored"),
            ])
            .load()
            .unwrap();

        assert_eq!(config.rate_limits.login.max_attempts, 10);
        assert_eq!(config.rate_limits.password_reset.window_ms, 60_000);
        assert!(!config.rate_limits.enabled);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.errors.expose_internal_errors);
        assert_eq!(config.server.request_timeout_ms, 500);
    }

    #[test]
    fn test_env_override_errors() {
        let bad_number = ConfigLoader::new()
            .with_env_vars([("KEYSTONE__RATE_LIMITS__API__MAX_ATTEMPTS", "lots")])
            .load();
        assert!(matches!(bad_number, Err(ConfigError::Env { .. })));

        let unknown_limiter = ConfigLoader::new()
            .with_env_vars([("KEYSTONE__RATE_LIMITS__UPLOAD__MAX_ATTEMPTS", "3")])
            .load();
        assert!(unknown_limiter.is_err());

        let unknown_key = ConfigLoader::new()
            .with_env_vars([("KEYSTONE__SERVER__PORT", "80")])
            .load();
        assert!(unknown_key.is_err());
    }

    #[test]
    fn test_env_override_fails_validation() {
        let result = ConfigLoader::new()
            .with_env_vars([("KEYSTONE__RATE_LIMITS__LOGIN__BLOCK_DURATION_MS", "0")])
            .load();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_custom_prefix() {
        let config = ConfigLoader::new()
            .with_env_prefix("lms")
            .with_env_vars([
                ("LMS__ERRORS__TOP_N", "5"),
                ("KEYSTONE__ERRORS__TOP_N", "99"),
            ])
            .load()
            .unwrap();
        assert_eq!(config.errors.top_n, 5);
    }

    #[test]
    fn test_parse_bool() {
        for truthy in ["true", "TRUE", "1", "yes", "on"] {
            assert!(parse_bool("K", truthy).unwrap());
        }
        for falsy in ["false", "0", "no", "Off"] {
            assert!(!parse_bool("K", falsy).unwrap());
        }
        assert!(parse_bool("K", "maybe").is_err());
    }
}
