//! Server error types.

use thiserror::Error;

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The listen address is not a socket address.
    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    /// Accepting or serving failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] keystone_config::ConfigError),

    /// Logging could not be initialised.
    #[error(transparent)]
    Telemetry(#[from] keystone_telemetry::TelemetryError),
}
