//! Centralized error types for A3S Serving

use thiserror::Error;

/// Serving error types
#[derive(Debug, Error)]
pub enum ServingError {
    /// Configuration load or validation failure (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed request body or missing prompt
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Backpressure watermark reached, submission rejected
    #[error("Replica overloaded: {0}")]
    Overloaded(String),

    /// Generation-time failure from the shared engine; contained to one request
    #[error("Engine failure: {0}")]
    Engine(String),

    /// Engine initialization failure; the replica must not serve
    #[error("Engine initialization failed: {0}")]
    EngineInit(String),

    /// Autoscaling source or executor failure
    #[error("Scaling error: {0}")]
    Scaling(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ServingError>;
