//! Job registry
//!
//! Job definitions are owned by configuration and synchronised into the
//! registry at startup. The only runtime mutation is the operator's enable
//! toggle, kept as an override that later syncs do not clobber.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::JobDefinition;

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobRegistry;
pub use postgres::PgJobRegistry;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("corrupt job row: {0}")]
    Corrupt(String),

    #[error("registry database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What a sync does with jobs missing from the given list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Delete them. Used by the server, which owns the job configuration.
    Replace,
    /// Leave them alone. Used by short-lived clients such as the CLI.
    Upsert,
}

#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Upsert each of `jobs`. With [`SyncMode::Replace`] every other job is
    /// dropped. Enable overrides set by operators are preserved.
    async fn sync(&self, jobs: &[JobDefinition], mode: SyncMode) -> Result<(), RegistryError>;

    /// All jobs, ordered by id, with effective `enabled`.
    async fn list(&self) -> Result<Vec<JobDefinition>, RegistryError>;

    async fn get(&self, job_id: &str) -> Result<Option<JobDefinition>, RegistryError>;

    /// Returns `false` when the job does not exist.
    async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<bool, RegistryError>;
}
