//! Error types for Autostop

use thiserror::Error;

/// Result type alias using Autostop's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Autostop operations
#[derive(Error, Debug)]
pub enum Error {
    /// The tracking service answered with a non-success status
    #[error("MLflow API returned status code {status}: {body}")]
    Tracking {
        /// HTTP status code
        status: u16,
        /// Raw response body, kept for diagnosis
        body: String,
    },

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source could not be read or merged
    #[error("Configuration error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a tracking-service status error
    pub fn tracking(status: u16, body: impl Into<String>) -> Self {
        Self::Tracking {
            status,
            body: body.into(),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure came from talking to the tracking service.
    ///
    /// The watch loops retry every fetch failure after one interval; this
    /// tells a flaky server apart from a local fault in their logs.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Tracking { .. } | Self::Http(_) | Self::Serialization(_)
        )
    }
}
