//! Error types shared across civicsync crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CivicError>;

/// Main error type for the common crate
#[derive(Error, Debug)]
pub enum CivicError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid jurisdiction: {0}")]
    InvalidJurisdiction(String),

    #[error("Invalid job mode: {0}")]
    InvalidMode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
