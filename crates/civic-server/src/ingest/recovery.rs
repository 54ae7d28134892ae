//! Orphan recovery
//!
//! A run left `pending` or `running` by a crashed process holds its job's
//! run-lock forever. The sweep finds active runs with no sign of life since
//! a cutoff and finalizes them as failed with an `orphaned` summary. It runs
//! at startup and from `civic sweep`.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::journal::{JournalError, RunJournal};
use super::metrics::MetricsRegistry;
use crate::models::RunStatus;

pub const ORPHANED_SUMMARY: &str = "orphaned";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub orphaned: Vec<Uuid>,
    /// Runs that finished on their own while the sweep was looking at them
    pub already_finished: usize,
}

/// Fail every active run whose last heartbeat is older than `stale_after`.
pub async fn sweep_orphans(
    journal: &dyn RunJournal,
    metrics: &MetricsRegistry,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport, JournalError> {
    let stale_secs = i64::try_from(stale_after.as_secs()).unwrap_or(i64::MAX / 1000);
    let cutoff = now - chrono::Duration::seconds(stale_secs);
    let stale = journal.stale_runs(cutoff).await?;

    let mut report = SweepReport {
        examined: stale.len(),
        ..SweepReport::default()
    };

    for run in stale {
        match journal
            .finalize_run(run.run_id, RunStatus::Failed, Some(ORPHANED_SUMMARY.to_string()))
            .await
        {
            Ok(_) => {
                warn!(
                    run_id = %run.run_id,
                    job_id = %run.job_id,
                    last_seen = %run.last_seen_alive(),
                    "Finalized orphaned run"
                );
                metrics.record_orphaned(&run.job_id);
                metrics.run_abandoned(&run.job_id, run.mode.as_str(), RunStatus::Failed);
                report.orphaned.push(run.run_id);
            },
            Err(JournalError::InvalidTransition { .. } | JournalError::NotActive(_)) => {
                report.already_finished += 1;
            },
            Err(e) => return Err(e),
        }
    }

    info!(
        examined = report.examined,
        orphaned = report.orphaned.len(),
        "Orphan sweep complete"
    );
    Ok(report)
}
