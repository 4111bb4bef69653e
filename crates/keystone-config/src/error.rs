//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a [`KeystoneConfig`](crate::KeystoneConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required file does not exist.
    #[error("config file {} does not exist", path.display())]
    NotFound {
        /// Requested path.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read config file {}", path.display())]
    Read {
        /// Requested path.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML or an unknown key.
    #[error("bad TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed JSON or an unknown key.
    #[error("bad JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither `toml` nor `json`.
    #[error("unsupported config format '{0}'")]
    Format(String),

    /// A `.env` file is present but unreadable.
    #[error(".env: {0}")]
    Dotenv(#[from] dotenvy::Error),

    /// A field failed validation.
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted path such as `rate_limits.login.window_ms`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An override variable could not be applied.
    #[error("environment override {var}: {reason}")]
    Env {
        /// Variable name.
        var: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Validation failure for `field`.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn env(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_culprit() {
        let err = ConfigError::not_found("/etc/keystone.toml");
        assert_eq!(err.to_string(), "config file /etc/keystone.toml does not exist");

        let err = ConfigError::invalid("rate_limits.login.max_attempts", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "rate_limits.login.max_attempts: must be greater than 0"
        );

        let err = ConfigError::env("KEYSTONE__SERVER__HTTP_ADDR", "expected address");
        assert!(err.to_string().contains("KEYSTONE__SERVER__HTTP_ADDR"));
    }
}
