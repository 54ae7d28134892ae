//! Run dispatcher
//!
//! The single path through which runs start, whether the scheduler, the
//! control plane or the CLI asked. [`Dispatcher::dispatch`] takes the run
//! lock by creating the journal row, then hands the run to a bounded worker
//! pool and returns immediately.
//!
//! Each run task streams adapter output into store batches, reports
//! progress and heartbeats to the journal, and always finalizes its journal
//! row, including when the adapter panics.

use chrono::NaiveDate;
use civic_common::JobMode;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::adapter::{Adapter, AdapterError, AdapterRegistry, FetchRequest};
use super::jobs::{JobRegistry, RegistryError};
use super::journal::{resolve_outcome, JournalError, RunJournal, RunTally, RunTermination};
use super::metrics::MetricsRegistry;
use super::store::EntityStore;
use crate::config::DispatcherConfig;
use crate::models::{Entity, JobDefinition, NewRun, Run, RunProgress, RunStatus, TriggeredBy};

/// Attempts at writing the terminal status before leaving the run to the
/// orphan sweep
const FINALIZE_ATTEMPTS: u32 = 3;
const FINALIZE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Extra time granted to cancelled runs during shutdown
const SHUTDOWN_CANCEL_GRACE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("job '{job_id}' already has an active run")]
    JobLocked { job_id: String },

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("job '{job_id}' uses unknown adapter '{adapter}'")]
    UnknownAdapter { job_id: String, adapter: String },

    #[error("dispatcher is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Journal(JournalError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("run task failed: {0}")]
    Join(String),
}

impl From<JournalError> for DispatchError {
    fn from(err: JournalError) -> Self {
        match err {
            JournalError::JobLocked { job_id } => DispatchError::JobLocked { job_id },
            other => DispatchError::Journal(other),
        }
    }
}

/// A request to start one run
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub job_id: String,
    /// Defaults to the job's configured mode
    pub mode: Option<JobMode>,
    /// Defaults to the job's configured scope
    pub scope: Option<String>,
    pub since: Option<NaiveDate>,
    pub triggered_by: TriggeredBy,
}

impl DispatchRequest {
    pub fn new(job_id: impl Into<String>, triggered_by: TriggeredBy) -> Self {
        Self {
            job_id: job_id.into(),
            mode: None,
            scope: None,
            since: None,
            triggered_by,
        }
    }
}

/// Handle to a dispatched run
pub struct RunHandle {
    pub run_id: Uuid,
    pub job_id: String,
    task: JoinHandle<()>,
    journal: Arc<dyn RunJournal>,
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    /// Wait for the run to reach a terminal status and return its row.
    pub async fn wait(self) -> Result<Run, DispatchError> {
        self.task
            .await
            .map_err(|e| DispatchError::Join(e.to_string()))?;
        self.journal
            .get_run(self.run_id)
            .await?
            .ok_or(DispatchError::Journal(JournalError::NotFound(self.run_id)))
    }
}

/// Counters for one run plus how much of them the journal has seen
#[derive(Debug, Default)]
struct RunState {
    tally: RunTally,
    reported: RunProgress,
}

impl RunState {
    fn unreported(&self) -> RunProgress {
        RunProgress {
            seen: self.tally.seen - self.reported.seen,
            upserted: self.tally.upserted - self.reported.upserted,
            skipped: self.tally.skipped - self.reported.skipped,
            failed: self.tally.failed - self.reported.failed,
        }
    }
}

struct DispatcherInner {
    journal: Arc<dyn RunJournal>,
    store: Arc<dyn EntityStore>,
    registry: Arc<dyn JobRegistry>,
    adapters: AdapterRegistry,
    metrics: Arc<MetricsRegistry>,
    config: DispatcherConfig,
    permits: Arc<Semaphore>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    tracker: TaskTracker,
    closing: CancellationToken,
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        journal: Arc<dyn RunJournal>,
        store: Arc<dyn EntityStore>,
        registry: Arc<dyn JobRegistry>,
        adapters: AdapterRegistry,
        metrics: Arc<MetricsRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            inner: Arc::new(DispatcherInner {
                journal,
                store,
                registry,
                adapters,
                metrics,
                config,
                permits,
                active: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                closing: CancellationToken::new(),
            }),
        }
    }

    /// Start a run. Fails with [`DispatchError::JobLocked`] if the job
    /// already has an active run.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<RunHandle, DispatchError> {
        let inner = &self.inner;
        if inner.closing.is_cancelled() {
            return Err(DispatchError::ShuttingDown);
        }

        let job = inner
            .registry
            .get(&request.job_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(request.job_id.clone()))?;

        let adapter = inner
            .adapters
            .get(&job.adapter)
            .ok_or_else(|| DispatchError::UnknownAdapter {
                job_id: job.job_id.clone(),
                adapter: job.adapter.clone(),
            })?;

        let run = inner
            .journal
            .create_run(NewRun {
                job_id: job.job_id.clone(),
                mode: request.mode.unwrap_or(job.mode),
                scope: request.scope.or_else(|| job.scope.clone()),
                since: request.since,
                triggered_by: request.triggered_by,
            })
            .await?;

        info!(
            run_id = %run.run_id,
            job_id = %run.job_id,
            mode = %run.mode,
            triggered_by = %run.triggered_by,
            "Run dispatched"
        );

        let token = CancellationToken::new();
        inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run.run_id, token.clone());

        let run_id = run.run_id;
        let job_id = run.job_id.clone();
        let span = tracing::info_span!("run", %run_id, job_id = %job_id);
        let task = inner
            .tracker
            .spawn(inner.clone().execute(run, job, adapter, token).instrument(span));

        Ok(RunHandle {
            run_id,
            job_id,
            task,
            journal: inner.journal.clone(),
        })
    }

    /// Ask a run to stop. Returns `false` if this dispatcher is not running it.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let active = self.inner.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.get(&run_id) {
            Some(token) => {
                info!(%run_id, "Run cancellation requested");
                token.cancel();
                true
            },
            None => false,
        }
    }

    /// Runs started by this dispatcher that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.inner.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Stop accepting runs and wait for in-flight ones. Runs still going
    /// after `grace` are cancelled.
    pub async fn shutdown(&self, grace: Duration) {
        let inner = &self.inner;
        inner.closing.cancel();
        inner.tracker.close();

        if tokio::time::timeout(grace, inner.tracker.wait()).await.is_ok() {
            info!("All runs finished");
            return;
        }

        let tokens: Vec<CancellationToken> = inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        warn!(runs = tokens.len(), "Shutdown grace period elapsed, cancelling runs");
        tokens.iter().for_each(CancellationToken::cancel);

        if tokio::time::timeout(SHUTDOWN_CANCEL_GRACE, inner.tracker.wait())
            .await
            .is_err()
        {
            error!("Runs did not stop in time; the orphan sweep will reconcile them");
        }
    }
}

impl DispatcherInner {
    async fn execute(
        self: Arc<Self>,
        run: Run,
        job: JobDefinition,
        adapter: Arc<dyn Adapter>,
        token: CancellationToken,
    ) {
        let run_id = run.run_id;

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = self.permits.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.finalize(run_id, RunStatus::Cancelled, Some("cancelled before start".to_string()))
                .await;
            self.metrics
                .run_abandoned(&run.job_id, run.mode.as_str(), RunStatus::Cancelled);
            self.forget(run_id);
            return;
        };

        if let Err(e) = self.journal.mark_running(run_id).await {
            error!(error = %e, "Could not mark run as running");
            self.finalize(run_id, RunStatus::Failed, Some("journal_unavailable".to_string()))
                .await;
            self.metrics
                .run_abandoned(&run.job_id, run.mode.as_str(), RunStatus::Failed);
            self.forget(run_id);
            return;
        }
        self.metrics.run_started();
        let started = Instant::now();

        let mut state = RunState::default();
        let termination = match AssertUnwindSafe(self.drive(&run, &job, adapter, &token, &mut state))
            .catch_unwind()
            .await
        {
            Ok(termination) => termination,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Adapter panicked");
                RunTermination::Panicked(message)
            },
        };

        self.report_progress(run_id, &mut state).await;

        let (status, summary) = resolve_outcome(&termination, &state.tally);
        self.finalize(run_id, status, summary).await;
        self.metrics
            .run_finished(&run.job_id, run.mode.as_str(), status, started.elapsed());

        info!(
            %status,
            seen = state.tally.seen,
            upserted = state.tally.upserted,
            unchanged = state.tally.unchanged,
            skipped = state.tally.skipped,
            failed = state.tally.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Run finished"
        );
        self.forget(run_id);
    }

    /// Pull the adapter stream into the store until it ends or something
    /// stops it.
    async fn drive(
        &self,
        run: &Run,
        job: &JobDefinition,
        adapter: Arc<dyn Adapter>,
        token: &CancellationToken,
        state: &mut RunState,
    ) -> RunTermination {
        let deadline = Instant::now() + self.config.max_run_duration();
        let request = FetchRequest {
            job_id: run.job_id.clone(),
            mode: run.mode,
            scope: run.scope.clone(),
            since: run.since,
            options: job.options.clone(),
        };

        let mut stream = loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return RunTermination::Cancelled,
                _ = sleep_until(deadline) => return RunTermination::TimedOut,
                result = self.keep_alive(run.run_id, adapter.fetch(request.clone())) => result,
            };
            match result {
                Ok(stream) => break stream,
                Err(AdapterError::RateLimited { retry_after }) => {
                    if let Some(stop) = self.pause(run.run_id, retry_after, deadline, token).await {
                        return stop;
                    }
                },
                Err(AdapterError::SourceUnavailable(message)) => {
                    return RunTermination::SourceUnavailable(message)
                },
                Err(AdapterError::Parse { context }) => {
                    return RunTermination::SourceUnavailable(format!("parse error: {context}"))
                },
            }
        };

        let batch_size = self.config.batch_size.max(1);
        let mut batch: Vec<Entity> = Vec::with_capacity(batch_size);
        let mut batches_since_report = 0u32;
        let heartbeat_every = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let termination = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break RunTermination::Cancelled,
                _ = sleep_until(deadline) => break RunTermination::TimedOut,
                _ = heartbeat.tick() => self.beat(run.run_id, state).await,
                item = stream.next() => match item {
                    None => break RunTermination::Completed,
                    Some(Ok(mut entity)) => {
                        state.tally.seen += 1;
                        entity.source_run_id = Some(run.run_id);
                        batch.push(entity);

                        if batch.len() >= batch_size {
                            let flushed = self
                                .keep_alive(run.run_id, self.flush(&run.job_id, &mut batch, state))
                                .await;
                            if let Err(stop) = flushed {
                                break stop;
                            }
                            batches_since_report += 1;
                            if batches_since_report >= self.config.progress_interval_batches.max(1) {
                                self.report_progress(run.run_id, state).await;
                                batches_since_report = 0;
                            }
                        }
                    },
                    Some(Err(AdapterError::Parse { context })) => {
                        state.tally.seen += 1;
                        state.tally.skipped += 1;
                        self.metrics.record_seen(&run.job_id, 1);
                        self.metrics.record_skipped(&run.job_id, 1);
                        warn!(%context, "Skipping record that failed to parse");
                    },
                    Some(Err(AdapterError::RateLimited { retry_after })) => {
                        if let Some(stop) = self.pause(run.run_id, retry_after, deadline, token).await {
                            break stop;
                        }
                    },
                    Some(Err(AdapterError::SourceUnavailable(message))) => {
                        break RunTermination::SourceUnavailable(message);
                    },
                },
            }
        };

        if matches!(termination, RunTermination::StoreFatal(_)) {
            return termination;
        }

        // The in-flight batch is written even when the run was stopped early.
        let flushed = self
            .keep_alive(run.run_id, self.flush(&run.job_id, &mut batch, state))
            .await;
        match flushed {
            Ok(()) => termination,
            Err(stop) => stop,
        }
    }

    /// Sleep out a rate limit, or say why the run has to stop instead.
    async fn pause(
        &self,
        run_id: Uuid,
        retry_after: Duration,
        deadline: Instant,
        token: &CancellationToken,
    ) -> Option<RunTermination> {
        if Instant::now() + retry_after > deadline {
            warn!(?retry_after, "Rate limit pause would exceed the run budget");
            return Some(RunTermination::RateLimitTimeout);
        }

        info!(?retry_after, "Source rate limited, pausing");
        tokio::select! {
            biased;
            _ = token.cancelled() => Some(RunTermination::Cancelled),
            _ = self.keep_alive(run_id, sleep(retry_after)) => None,
        }
    }

    /// Await `work`, heartbeating the run while it is pending so a long
    /// fetch, flush or pause is not mistaken for an orphan.
    async fn keep_alive<F: Future>(&self, run_id: Uuid, work: F) -> F::Output {
        tokio::pin!(work);
        let every = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + every, every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                output = &mut work => return output,
                _ = heartbeat.tick() => {
                    if let Err(e) = self.journal.heartbeat(run_id).await {
                        warn!(error = %e, "Heartbeat failed");
                    }
                },
            }
        }
    }

    async fn flush(
        &self,
        job_id: &str,
        batch: &mut Vec<Entity>,
        state: &mut RunState,
    ) -> Result<(), RunTermination> {
        if batch.is_empty() {
            return Ok(());
        }

        self.metrics.record_seen(job_id, batch.len() as u64);
        let result = self.store.upsert_batch(batch).await;
        let size = batch.len();
        batch.clear();

        match result {
            Ok(result) => {
                state.tally.upserted += result.upserted() as i64;
                state.tally.unchanged += result.unchanged as i64;
                state.tally.failed += result.failed as i64;
                self.metrics.record_batch(job_id, result.upserted(), result.failed);
                debug!(
                    size,
                    inserted = result.inserted,
                    updated = result.updated,
                    unchanged = result.unchanged,
                    failed = result.failed,
                    "Batch committed"
                );
                Ok(())
            },
            Err(e) => {
                error!(size, error = %e, "Store unavailable, aborting run");
                Err(RunTermination::StoreFatal(e.to_string()))
            },
        }
    }

    async fn report_progress(&self, run_id: Uuid, state: &mut RunState) {
        let delta = state.unreported();
        if delta.is_empty() {
            return;
        }
        match self.journal.update_progress(run_id, delta).await {
            Ok(()) => state.reported += delta,
            Err(e) => warn!(error = %e, "Could not record run progress"),
        }
    }

    async fn beat(&self, run_id: Uuid, state: &mut RunState) {
        if !state.unreported().is_empty() {
            self.report_progress(run_id, state).await;
            return;
        }
        if let Err(e) = self.journal.heartbeat(run_id).await {
            warn!(error = %e, "Heartbeat failed");
        }
    }

    async fn finalize(&self, run_id: Uuid, status: RunStatus, summary: Option<String>) {
        for attempt in 1..=FINALIZE_ATTEMPTS {
            match self.journal.finalize_run(run_id, status, summary.clone()).await {
                Ok(_) => return,
                Err(JournalError::Database(e)) if attempt < FINALIZE_ATTEMPTS => {
                    warn!(attempt, error = %e, "Finalize failed, retrying");
                    sleep(FINALIZE_RETRY_DELAY).await;
                },
                Err(e) => {
                    error!(%status, error = %e, "Could not finalize run");
                    return;
                },
            }
        }
    }

    fn forget(&self, run_id: Uuid) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
