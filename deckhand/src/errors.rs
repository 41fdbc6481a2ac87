//! Error types for deckhand

use thiserror::Error;

/// Main error type for deckhand
#[derive(Error, Debug)]
pub enum DeckhandError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Proxy error: {0}")]
    ProxyError(String),

    #[error("Build error: {0}")]
    BuildError(String),

    #[error("Publish error: {0}")]
    PublishError(String),

    #[error("Registration error: {0}")]
    RegistrationError(String),

    #[error("Rollout error: {0}")]
    RolloutError(String),

    #[error("Health check error: {0}")]
    HealthCheckError(String),

    #[error("Invalid transition: {0}")]
    TransitionError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}
