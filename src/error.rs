//! Lagoon error types

use thiserror::Error;

/// Lagoon error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener could not bind its address
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Unknown or unusable LLM provider
    #[error("Provider error: {0}")]
    Provider(String),

    /// Generator invocation failed
    #[error("Generator error: {0}")]
    Generator(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Lagoon operations
pub type Result<T> = std::result::Result<T, Error>;
