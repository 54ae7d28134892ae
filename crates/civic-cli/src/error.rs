//! Error types for the civic CLI

use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Process exit code for a request the core refused (locked or unknown job)
pub const EXIT_REJECTED: i32 = 3;

/// Process exit code for anything else that went wrong before a run finished
pub const EXIT_ERROR: i32 = 1;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {0}. Check civicsync.toml or set CIVIC_CONFIG.")]
    Config(#[from] civic_server::ConfigError),

    #[error("Startup failed: {0}")]
    Startup(String),

    /// The core declined the request; nothing ran.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Rejected(_) => EXIT_REJECTED,
            _ => EXIT_ERROR,
        }
    }
}
