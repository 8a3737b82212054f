//! Error types for the spot drain watcher

use thiserror::Error;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, SpotDrainError>;

/// Errors that can occur while watching for or reacting to a spot interruption
#[derive(Error, Debug)]
pub enum SpotDrainError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The ECS API accepted the call but refused to drain the instance
    #[error("Drain error: {0}")]
    Drain(String),

    /// Generic AWS service error
    #[error("AWS service error: {0}")]
    Aws(String),
}

impl SpotDrainError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a drain error
    pub fn drain(msg: impl Into<String>) -> Self {
        Self::Drain(msg.into())
    }

    /// Convert from generic AWS SDK error
    pub fn from_aws<E>(err: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::Aws(err.to_string())
    }
}
