//! Run journal
//!
//! One row per run, created `pending` and updated in place until it reaches
//! a terminal status. The journal is independent of the entity store so run
//! history survives store failures.
//!
//! [`RunJournal::create_run`] is also the run-lock: it fails with
//! [`JournalError::JobLocked`] while another run of the same job is still
//! pending or running, and the check and insert are a single atomic step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewRun, Run, RunProgress, RunStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRunJournal;
pub use postgres::PgRunJournal;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("job '{job_id}' already has an active run")]
    JobLocked { job_id: String },

    #[error("run {0} not found")]
    NotFound(Uuid),

    #[error("run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("run {0} is no longer active")]
    NotActive(Uuid),

    #[error("corrupt run row: {0}")]
    Corrupt(String),

    #[error("journal database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait RunJournal: Send + Sync {
    /// Insert a pending run unless the job already has an active one.
    async fn create_run(&self, new_run: NewRun) -> Result<Run, JournalError>;

    /// `pending -> running`
    async fn mark_running(&self, run_id: Uuid) -> Result<(), JournalError>;

    /// Add counter deltas. Also refreshes the heartbeat.
    async fn update_progress(&self, run_id: Uuid, delta: RunProgress) -> Result<(), JournalError>;

    async fn heartbeat(&self, run_id: Uuid) -> Result<(), JournalError>;

    /// Move an active run to a terminal status and stamp `ended_at`.
    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_summary: Option<String>,
    ) -> Result<Run, JournalError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, JournalError>;

    /// Newest first, with the total number of runs for the job.
    async fn list_runs(
        &self,
        job_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Run>, i64), JournalError>;

    async fn latest_run(&self, job_id: &str) -> Result<Option<Run>, JournalError>;

    async fn active_run(&self, job_id: &str) -> Result<Option<Run>, JournalError>;

    async fn active_runs(&self) -> Result<Vec<Run>, JournalError>;

    /// Active runs whose last heartbeat (or start) is older than `cutoff`.
    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>, JournalError>;
}

/// How the dispatcher's processing of a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTermination {
    /// The adapter stream was exhausted.
    Completed,
    Cancelled,
    /// The wall-clock budget ran out.
    TimedOut,
    /// A rate-limit pause would have crossed the wall-clock budget.
    RateLimitTimeout,
    /// The adapter reported a terminal error.
    SourceUnavailable(String),
    /// The store became unusable.
    StoreFatal(String),
    /// The adapter panicked.
    Panicked(String),
}

/// Totals accumulated while a run is processed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTally {
    pub seen: i64,
    pub upserted: i64,
    pub unchanged: i64,
    pub skipped: i64,
    pub failed: i64,
}

impl RunTally {
    /// Records the store now agrees with
    pub fn succeeded(&self) -> i64 {
        self.upserted + self.unchanged
    }
}

/// Decide the terminal status and error summary for a run.
///
/// - Record-level problems only fail the run when nothing succeeded.
/// - Adapter-level and budget terminations keep the work already written:
///   `partial_success` if anything was upserted, otherwise `failed`.
/// - Store failures and panics fail the run regardless of progress.
pub fn resolve_outcome(termination: &RunTermination, tally: &RunTally) -> (RunStatus, Option<String>) {
    let keep_partial = |summary: String| {
        if tally.upserted > 0 {
            (RunStatus::PartialSuccess, Some(summary))
        } else {
            (RunStatus::Failed, Some(summary))
        }
    };

    match termination {
        RunTermination::Completed => {
            let bad = tally.skipped + tally.failed;
            if bad > 0 && tally.succeeded() == 0 {
                (
                    RunStatus::Failed,
                    Some(format!(
                        "all {bad} records failed ({} skipped, {} rejected)",
                        tally.skipped, tally.failed
                    )),
                )
            } else if tally.failed > 0 {
                (
                    RunStatus::PartialSuccess,
                    Some(format!("store rejected {} records", tally.failed)),
                )
            } else {
                (RunStatus::Success, None)
            }
        },
        RunTermination::Cancelled => (RunStatus::Cancelled, Some("cancelled".to_string())),
        RunTermination::TimedOut => keep_partial("timeout".to_string()),
        RunTermination::RateLimitTimeout => keep_partial("rate_limited_timeout".to_string()),
        RunTermination::SourceUnavailable(message) => {
            keep_partial(format!("source_unavailable: {message}"))
        },
        RunTermination::StoreFatal(message) => {
            (RunStatus::Failed, Some(format!("store_error: {message}")))
        },
        RunTermination::Panicked(message) => (RunStatus::Failed, Some(format!("panic: {message}"))),
    }
}
