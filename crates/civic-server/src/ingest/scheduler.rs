//! Job scheduler
//!
//! One owned [`Scheduler`] evaluates every job's schedule on a fixed tick and
//! asks the [`Dispatcher`] to start the ones that came due. Each tick covers
//! the window since the previous tick, so a due time is acted on at most once
//! and windows lost to downtime are never backfilled.
//!
//! Job snapshots are re-read from the registry on every tick, which picks up
//! operator toggles without any shared mutable state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatcher::{DispatchError, DispatchRequest, Dispatcher};
use super::jobs::JobRegistry;
use super::journal::RunJournal;
use super::metrics::MetricsRegistry;
use super::schedule;
use crate::models::TriggeredBy;

/// Where a job sits in the scheduling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    /// Came due but could not be dispatched yet
    Due,
    /// A run started by the scheduler is still active
    Dispatched,
}

/// What one tick did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Jobs eligible for automatic scheduling
    pub evaluated: usize,
    pub dispatched: Vec<(String, Uuid)>,
    /// Due, but a run was already active
    pub skipped_locked: Vec<String>,
    /// Due or evaluated, but something went wrong
    pub errors: Vec<(String, String)>,
}

pub struct Scheduler {
    registry: Arc<dyn JobRegistry>,
    journal: Arc<dyn RunJournal>,
    dispatcher: Dispatcher,
    metrics: Arc<MetricsRegistry>,
    tick_interval: Duration,
    last_tick: Option<DateTime<Utc>>,
    phases: HashMap<String, JobPhase>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        journal: Arc<dyn RunJournal>,
        dispatcher: Dispatcher,
        metrics: Arc<MetricsRegistry>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            registry,
            journal,
            dispatcher,
            metrics,
            tick_interval,
            last_tick: None,
            phases: HashMap::new(),
        }
    }

    pub fn phase(&self, job_id: &str) -> JobPhase {
        self.phases.get(job_id).copied().unwrap_or(JobPhase::Idle)
    }

    /// Evaluate all jobs for the window `(last tick, now]`.
    ///
    /// The first tick only establishes the window start.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        self.metrics.scheduler_tick();
        let window_start = self.last_tick.replace(now).unwrap_or(now);
        let mut report = TickReport::default();

        let jobs = match self.registry.list().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Could not load jobs for scheduling");
                report.errors.push(("*".to_string(), e.to_string()));
                return report;
            },
        };

        self.phases.retain(|job_id, _| jobs.iter().any(|job| &job.job_id == job_id));

        for job in jobs.iter().filter(|job| job.is_auto_schedulable()) {
            report.evaluated += 1;
            self.settle(&job.job_id).await;

            let Some(expression) = job.schedule.as_deref() else {
                continue;
            };
            let due = match schedule::is_due(expression, window_start, now) {
                Ok(due) => due,
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "Skipping job with invalid schedule");
                    report.errors.push((job.job_id.clone(), e.to_string()));
                    continue;
                },
            };
            if !due {
                continue;
            }

            self.phases.insert(job.job_id.clone(), JobPhase::Due);
            match self.journal.active_run(&job.job_id).await {
                Ok(Some(active)) => {
                    info!(job_id = %job.job_id, run_id = %active.run_id, "Job due but still running, skipping");
                    report.skipped_locked.push(job.job_id.clone());
                    continue;
                },
                Ok(None) => {},
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "Could not check for active run");
                    report.errors.push((job.job_id.clone(), e.to_string()));
                    continue;
                },
            }

            match self
                .dispatcher
                .dispatch(DispatchRequest::new(job.job_id.clone(), TriggeredBy::Scheduler))
                .await
            {
                Ok(handle) => {
                    info!(job_id = %job.job_id, run_id = %handle.run_id, "Scheduled run dispatched");
                    self.phases.insert(job.job_id.clone(), JobPhase::Dispatched);
                    report.dispatched.push((job.job_id.clone(), handle.run_id));
                },
                Err(DispatchError::JobLocked { .. }) => {
                    report.skipped_locked.push(job.job_id.clone());
                },
                Err(e) => {
                    warn!(job_id = %job.job_id, error = %e, "Scheduled dispatch failed");
                    report.errors.push((job.job_id.clone(), e.to_string()));
                },
            }
        }

        debug!(
            evaluated = report.evaluated,
            dispatched = report.dispatched.len(),
            skipped = report.skipped_locked.len(),
            "Scheduler tick complete"
        );
        report
    }

    /// Return a job to `Idle` once nothing is active for it.
    async fn settle(&mut self, job_id: &str) {
        if self.phase(job_id) == JobPhase::Idle {
            return;
        }
        if let Ok(None) = self.journal.active_run(job_id).await {
            self.phases.insert(job_id.to_string(), JobPhase::Idle);
        }
    }

    /// Tick until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(interval_secs = self.tick_interval.as_secs(), "Scheduler started");
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                },
            }
        }
        info!("Scheduler stopped");
    }
}
