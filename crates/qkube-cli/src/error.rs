//! Error types for the CLI

use qkube_common::telemetry::TelemetryError;

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Cluster, cloud or configuration failure from the libraries
    #[error(transparent)]
    Cluster(#[from] qkube_common::Error),

    /// The tracing subscriber could not be installed
    #[error("logging setup failed: {0}")]
    Telemetry(#[from] TelemetryError),

    /// Preset output could not be serialized
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A flag combination was rejected before any work started
    #[error("validation error: {message}")]
    Validation {
        /// What was wrong
        message: String,
    },

    /// A command ran but could not complete
    #[error("command failed: {message}")]
    CommandFailed {
        /// What failed
        message: String,
    },
}

impl Error {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    /// Create a command failure
    pub fn command_failed(message: impl Into<String>) -> Self {
        Error::CommandFailed {
            message: message.into(),
        }
    }
}
