//! Error types for the Ratewall service.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Ratewall operations.
#[derive(Error, Debug)]
pub enum RatewallError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counting store errors surfaced outside a rate limit decision
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for RatewallError {
    fn from(err: config::ConfigError) -> Self {
        RatewallError::Config(err.to_string())
    }
}

/// Result type alias for Ratewall operations.
pub type Result<T> = std::result::Result<T, RatewallError>;
