//! In-memory run journal

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use super::{JournalError, RunJournal};
use crate::models::{NewRun, Run, RunProgress, RunStatus};

/// Runs keyed by id. UUIDv7 keys keep the map in creation order.
#[derive(Debug, Default)]
pub struct MemoryRunJournal {
    runs: Mutex<BTreeMap<Uuid, Run>>,
}

impl MemoryRunJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_runs<T>(&self, f: impl FnOnce(&mut BTreeMap<Uuid, Run>) -> T) -> T {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut runs)
    }

    fn with_active<T>(
        &self,
        run_id: Uuid,
        f: impl FnOnce(&mut Run) -> T,
    ) -> Result<T, JournalError> {
        self.with_runs(|runs| match runs.get_mut(&run_id) {
            Some(run) if !run.status.is_terminal() => Ok(f(run)),
            Some(_) => Err(JournalError::NotActive(run_id)),
            None => Err(JournalError::NotFound(run_id)),
        })
    }
}

#[async_trait]
impl RunJournal for MemoryRunJournal {
    async fn create_run(&self, new_run: NewRun) -> Result<Run, JournalError> {
        self.with_runs(|runs| {
            let locked = runs
                .values()
                .any(|run| run.job_id == new_run.job_id && !run.status.is_terminal());
            if locked {
                return Err(JournalError::JobLocked {
                    job_id: new_run.job_id,
                });
            }

            let run = new_run.into_run(Utc::now());
            runs.insert(run.run_id, run.clone());
            Ok(run)
        })
    }

    async fn mark_running(&self, run_id: Uuid) -> Result<(), JournalError> {
        self.with_runs(|runs| {
            let run = runs.get_mut(&run_id).ok_or(JournalError::NotFound(run_id))?;
            if run.status != RunStatus::Pending {
                return Err(JournalError::InvalidTransition {
                    run_id,
                    from: run.status,
                    to: RunStatus::Running,
                });
            }
            run.status = RunStatus::Running;
            run.heartbeat_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn update_progress(&self, run_id: Uuid, delta: RunProgress) -> Result<(), JournalError> {
        self.with_active(run_id, |run| {
            run.records_seen += delta.seen;
            run.records_upserted += delta.upserted;
            run.records_skipped += delta.skipped;
            run.records_failed += delta.failed;
            run.heartbeat_at = Some(Utc::now());
        })
    }

    async fn heartbeat(&self, run_id: Uuid) -> Result<(), JournalError> {
        self.with_active(run_id, |run| run.heartbeat_at = Some(Utc::now()))
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_summary: Option<String>,
    ) -> Result<Run, JournalError> {
        self.with_runs(|runs| {
            let run = runs.get_mut(&run_id).ok_or(JournalError::NotFound(run_id))?;
            if !status.is_terminal() || !run.status.can_transition_to(status) {
                return Err(JournalError::InvalidTransition {
                    run_id,
                    from: run.status,
                    to: status,
                });
            }
            run.status = status;
            run.error_summary = error_summary;
            run.ended_at = Some(Utc::now());
            Ok(run.clone())
        })
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, JournalError> {
        Ok(self.with_runs(|runs| runs.get(&run_id).cloned()))
    }

    async fn list_runs(
        &self,
        job_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Run>, i64), JournalError> {
        Ok(self.with_runs(|runs| {
            let matching: Vec<&Run> = runs.values().rev().filter(|r| r.job_id == job_id).collect();
            let total = matching.len() as i64;
            let page = matching
                .into_iter()
                .skip(offset.max(0) as usize)
                .take(limit.max(0) as usize)
                .cloned()
                .collect();
            (page, total)
        }))
    }

    async fn latest_run(&self, job_id: &str) -> Result<Option<Run>, JournalError> {
        Ok(self.with_runs(|runs| runs.values().rev().find(|r| r.job_id == job_id).cloned()))
    }

    async fn active_run(&self, job_id: &str) -> Result<Option<Run>, JournalError> {
        Ok(self.with_runs(|runs| {
            runs.values()
                .find(|r| r.job_id == job_id && !r.status.is_terminal())
                .cloned()
        }))
    }

    async fn active_runs(&self) -> Result<Vec<Run>, JournalError> {
        Ok(self.with_runs(|runs| {
            runs.values()
                .filter(|r| !r.status.is_terminal())
                .cloned()
                .collect()
        }))
    }

    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>, JournalError> {
        Ok(self.with_runs(|runs| {
            runs.values()
                .filter(|r| !r.status.is_terminal() && r.last_seen_alive() < cutoff)
                .cloned()
                .collect()
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::TriggeredBy;
    use civic_common::JobMode;
    use std::sync::Arc;

    fn new_run(job_id: &str) -> NewRun {
        NewRun {
            job_id: job_id.to_string(),
            mode: JobMode::Daily,
            scope: None,
            since: None,
            triggered_by: TriggeredBy::Scheduler,
        }
    }

    #[tokio::test]
    async fn test_run_lock_blocks_second_run() {
        let journal = MemoryRunJournal::new();
        let run = journal.create_run(new_run("ca_on")).await.unwrap();

        let second = journal.create_run(new_run("ca_on")).await;
        assert!(matches!(second, Err(JournalError::JobLocked { job_id }) if job_id == "ca_on"));

        // Other jobs are unaffected.
        journal.create_run(new_run("ca_qc")).await.unwrap();

        journal.finalize_run(run.run_id, RunStatus::Success, None).await.unwrap();
        journal.create_run(new_run("ca_on")).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_create_yields_exactly_one_run() {
        let journal = Arc::new(MemoryRunJournal::new());
        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let journal = journal.clone();
                tokio::spawn(async move { journal.create_run(new_run("ca_on")).await })
            })
            .collect();

        let mut created = 0;
        let mut locked = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => created += 1,
                Err(JournalError::JobLocked { .. }) => locked += 1,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!((created, locked), (1, 7));
    }

    #[tokio::test]
    async fn test_finalize_is_monotonic() {
        let journal = MemoryRunJournal::new();
        let run = journal.create_run(new_run("ca_on")).await.unwrap();
        journal.mark_running(run.run_id).await.unwrap();

        let done = journal
            .finalize_run(run.run_id, RunStatus::Failed, Some("orphaned".into()))
            .await
            .unwrap();
        assert!(done.ended_at.is_some());

        let again = journal.finalize_run(run.run_id, RunStatus::Success, None).await;
        assert!(matches!(again, Err(JournalError::InvalidTransition { .. })));
        assert!(journal.update_progress(run.run_id, RunProgress::default()).await.is_err());

        let stored = journal.get_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error_summary.as_deref(), Some("orphaned"));
    }

    #[tokio::test]
    async fn test_progress_accumulates() {
        let journal = MemoryRunJournal::new();
        let run = journal.create_run(new_run("ca_on")).await.unwrap();
        journal.mark_running(run.run_id).await.unwrap();

        let delta = RunProgress {
            seen: 5,
            upserted: 3,
            skipped: 1,
            failed: 1,
        };
        journal.update_progress(run.run_id, delta).await.unwrap();
        journal.update_progress(run.run_id, delta).await.unwrap();

        let stored = journal.get_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.records_seen, 10);
        assert_eq!(stored.records_upserted, 6);
        assert_eq!(stored.records_skipped, 2);
        assert_eq!(stored.records_failed, 2);
        assert!(stored.heartbeat_at.is_some());
    }

    #[tokio::test]
    async fn test_list_runs_newest_first() {
        let journal = MemoryRunJournal::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let run = journal.create_run(new_run("ca_on")).await.unwrap();
            journal.finalize_run(run.run_id, RunStatus::Success, None).await.unwrap();
            ids.push(run.run_id);
        }

        let (page, total) = journal.list_runs("ca_on", 2, 0).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.iter().map(|r| r.run_id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

        let latest = journal.latest_run("ca_on").await.unwrap().unwrap();
        assert_eq!(latest.run_id, ids[2]);
        assert!(journal.latest_run("ca_qc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_runs_use_last_heartbeat() {
        let journal = MemoryRunJournal::new();
        let run = journal.create_run(new_run("ca_on")).await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(journal.stale_runs(past).await.unwrap().is_empty());

        let future = Utc::now() + chrono::Duration::hours(1);
        let stale = journal.stale_runs(future).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].run_id, run.run_id);
    }
}
