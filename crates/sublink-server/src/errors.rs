//! Server-level errors.

use sublink_core::ConfigError;

/// Errors raised while constructing or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid or unreadable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Binding the listener or building a runtime failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The metrics recorder could not be installed.
    #[error("metrics error: {0}")]
    Metrics(String),
}
