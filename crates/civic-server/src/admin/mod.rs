//! Admin control plane
//!
//! Operator-facing operations behind the HTTP API and the CLI. Mutations
//! (`toggle_job`, `run_now`) are rate limited per actor and always leave
//! exactly one audit entry, accepted or rejected. Runs are started through
//! the same [`Dispatcher`] the scheduler uses.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry, AuditLog, AuditQuery, AuditResult, NewAuditEntry};
use crate::config::Config;
use crate::ingest::dispatcher::{DispatchError, DispatchRequest, Dispatcher};
use crate::ingest::jobs::JobRegistry;
use crate::ingest::journal::RunJournal;
use crate::ingest::metrics::MetricsRegistry;
use crate::ingest::store::EntityStore;
use crate::models::{JobDefinition, JobSummary, Run, RunStatus, TriggeredBy};

pub mod rate_limit;

pub use rate_limit::{RateLimited, RateLimiter};

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("job '{job_id}' already has an active run")]
    JobLocked { job_id: String },

    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unavailable(String),
}

impl AdminError {
    /// Reason recorded in the audit log for a rejected call
    fn audit_reason(&self) -> &'static str {
        match self {
            AdminError::JobNotFound(_) | AdminError::RunNotFound(_) => "not_found",
            AdminError::JobLocked { .. } => "job_locked",
            AdminError::RateLimited { .. } => "rate_limited",
            AdminError::Validation(_) => "invalid",
            AdminError::Unavailable(_) => "unavailable",
        }
    }
}

fn unavailable(err: impl std::fmt::Display) -> AdminError {
    AdminError::Unavailable(err.to_string())
}

/// Optional overrides for `run_now`
#[derive(Debug, Clone, Default)]
pub struct RunNowRequest {
    pub scope: Option<String>,
    pub since: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// Runs currently executing
    pub running_jobs: usize,
    /// Runs accepted but waiting for a worker
    pub queue_depth: usize,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    pub scheduler_enabled: bool,
    pub scheduler_ticks: u64,
    pub jobs_total: usize,
    pub jobs_enabled: usize,
}

pub struct AdminService {
    registry: Arc<dyn JobRegistry>,
    journal: Arc<dyn RunJournal>,
    audit: Arc<dyn AuditLog>,
    store: Arc<dyn EntityStore>,
    dispatcher: Dispatcher,
    metrics: Arc<MetricsRegistry>,
    limiter: RateLimiter,
    config: Arc<Config>,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl AdminService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        journal: Arc<dyn RunJournal>,
        audit: Arc<dyn AuditLog>,
        store: Arc<dyn EntityStore>,
        dispatcher: Dispatcher,
        metrics: Arc<MetricsRegistry>,
        limiter: RateLimiter,
        config: Arc<Config>,
    ) -> Self {
        Self {
            registry,
            journal,
            audit,
            store,
            dispatcher,
            metrics,
            limiter,
            config,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// All jobs with their most recent run.
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>, AdminError> {
        let jobs = self.registry.list().await.map_err(unavailable)?;
        let mut summaries = Vec::with_capacity(jobs.len());
        for job in jobs {
            let latest_run = self
                .journal
                .latest_run(&job.job_id)
                .await
                .map_err(unavailable)?
                .map(|run| run.summary());
            summaries.push(JobSummary { job, latest_run });
        }
        Ok(summaries)
    }

    pub async fn toggle_job(
        &self,
        actor: &str,
        job_id: &str,
        enabled: bool,
    ) -> Result<JobDefinition, AdminError> {
        let outcome = self.try_toggle(actor, job_id, enabled).await;
        self.audit_outcome(actor, AuditAction::ToggleJob, Some(job_id), &outcome)
            .await?;
        if outcome.is_ok() {
            info!(%actor, %job_id, enabled, "Job toggled");
        }
        outcome
    }

    async fn try_toggle(
        &self,
        actor: &str,
        job_id: &str,
        enabled: bool,
    ) -> Result<JobDefinition, AdminError> {
        self.check_rate(actor)?;

        let found = self
            .registry
            .set_enabled(job_id, enabled)
            .await
            .map_err(unavailable)?;
        if !found {
            return Err(AdminError::JobNotFound(job_id.to_string()));
        }

        self.registry
            .get(job_id)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| AdminError::JobNotFound(job_id.to_string()))
    }

    /// Start a run now. Disabled jobs can still be run explicitly.
    pub async fn run_now(
        &self,
        actor: &str,
        job_id: &str,
        request: RunNowRequest,
    ) -> Result<Uuid, AdminError> {
        let outcome = self.try_run_now(actor, job_id, request).await;
        self.audit_outcome(actor, AuditAction::RunNow, Some(job_id), &outcome)
            .await?;
        if let Ok(run_id) = &outcome {
            info!(%actor, %job_id, %run_id, "Run started by operator");
        }
        outcome
    }

    async fn try_run_now(
        &self,
        actor: &str,
        job_id: &str,
        request: RunNowRequest,
    ) -> Result<Uuid, AdminError> {
        self.check_rate(actor)?;

        let dispatch = DispatchRequest {
            job_id: job_id.to_string(),
            mode: None,
            scope: request.scope,
            since: request.since,
            triggered_by: TriggeredBy::admin(actor),
        };

        match self.dispatcher.dispatch(dispatch).await {
            Ok(handle) => Ok(handle.run_id),
            Err(DispatchError::NotFound(job_id)) => Err(AdminError::JobNotFound(job_id)),
            Err(DispatchError::JobLocked { job_id }) => Err(AdminError::JobLocked { job_id }),
            Err(e @ DispatchError::UnknownAdapter { .. }) => Err(AdminError::Validation(e.to_string())),
            Err(e) => Err(unavailable(e)),
        }
    }

    /// Audit a mutation whose request body could not be decoded and return
    /// the error to send back. Nothing changes and no rate budget is spent.
    pub async fn reject_malformed(
        &self,
        actor: &str,
        action: AuditAction,
        job_id: &str,
        message: String,
    ) -> AdminError {
        let rejection = AdminError::Validation(message);
        let result = AuditResult::rejected(rejection.audit_reason());
        match self.record(actor, action, Some(job_id), result).await {
            Ok(()) => rejection,
            Err(e) => e,
        }
    }

    /// Effective configuration with credentials masked. Audited.
    pub async fn read_config(&self, actor: &str) -> Result<Config, AdminError> {
        let outcome: Result<Config, AdminError> = Ok(self.config.redacted());
        self.audit_outcome(actor, AuditAction::ReadConfig, None, &outcome)
            .await?;
        outcome
    }

    pub async fn service_status(&self) -> Result<ServiceStatus, AdminError> {
        let active = self.journal.active_runs().await.map_err(unavailable)?;
        let jobs = self.registry.list().await.map_err(unavailable)?;

        let running_jobs = active.iter().filter(|r| r.status == RunStatus::Running).count();
        Ok(ServiceStatus {
            running_jobs,
            queue_depth: active.len() - running_jobs,
            uptime_secs: self.started.elapsed().as_secs(),
            started_at: self.started_at,
            scheduler_enabled: self.config.scheduler.enabled,
            scheduler_ticks: self.metrics.scheduler_ticks(),
            jobs_total: jobs.len(),
            jobs_enabled: jobs.iter().filter(|j| j.enabled).count(),
        })
    }

    /// One page of a job's runs, newest first, with the total count.
    pub async fn list_runs(
        &self,
        job_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Run>, i64), AdminError> {
        if self.registry.get(job_id).await.map_err(unavailable)?.is_none() {
            return Err(AdminError::JobNotFound(job_id.to_string()));
        }
        self.journal
            .list_runs(job_id, limit, offset)
            .await
            .map_err(unavailable)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<Run, AdminError> {
        self.journal
            .get_run(run_id)
            .await
            .map_err(unavailable)?
            .ok_or(AdminError::RunNotFound(run_id))
    }

    pub async fn query_audit(&self, query: &AuditQuery) -> Result<(Vec<AuditEntry>, i64), AdminError> {
        self.audit.query(query).await.map_err(unavailable)
    }

    /// Whether the entity store answers.
    pub async fn store_healthy(&self) -> bool {
        match self.store.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Store health check failed");
                false
            },
        }
    }

    fn check_rate(&self, actor: &str) -> Result<(), AdminError> {
        self.limiter
            .check(actor)
            .map_err(|RateLimited { retry_after }| {
                warn!(%actor, ?retry_after, "Control plane rate limit exceeded");
                AdminError::RateLimited { retry_after }
            })
    }

    async fn audit_outcome<T>(
        &self,
        actor: &str,
        action: AuditAction,
        job_id: Option<&str>,
        outcome: &Result<T, AdminError>,
    ) -> Result<(), AdminError> {
        let result = match outcome {
            Ok(_) => AuditResult::Accepted,
            Err(e) => AuditResult::rejected(e.audit_reason()),
        };
        self.record(actor, action, job_id, result).await
    }

    async fn record(
        &self,
        actor: &str,
        action: AuditAction,
        job_id: Option<&str>,
        result: AuditResult,
    ) -> Result<(), AdminError> {
        self.metrics.record_admin_action(action.as_str(), result.label());

        let mut entry = NewAuditEntry::new(actor, action, result);
        entry.target_job_id = job_id.map(str::to_string);

        self.audit.append(entry).await.map(|_| ()).map_err(|e| {
            error!(%actor, %action, error = %e, "Failed to write audit entry");
            unavailable(e)
        })
    }
}
