//! Audit log
//!
//! Append-only record of control plane actions. Every `toggle_job` and
//! `run_now` call produces exactly one entry, whether it was accepted or
//! rejected, and `read_config` is recorded as well. Entries are never
//! updated or deleted; the Postgres table enforces this with a trigger.

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod models;
mod queries;

pub use memory::MemoryAuditLog;
pub use models::{
    AuditAction, AuditEntry, AuditQuery, AuditResult, NewAuditEntry, DEFAULT_AUDIT_QUERY_LIMIT,
    MAX_AUDIT_QUERY_LIMIT,
};
pub use queries::PgAuditLog;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("corrupt audit row: {0}")]
    Corrupt(String),

    #[error("audit database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, AuditError>;

    /// Matching entries newest first, plus the total number of matches.
    async fn query(&self, query: &AuditQuery) -> Result<(Vec<AuditEntry>, i64), AuditError>;
}
