//! Composition root
//!
//! Wires the durable backends, metrics, dispatcher and control plane
//! together, either on PostgreSQL or fully in memory.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::admin::{AdminService, RateLimiter};
use crate::api::AppState;
use crate::audit::{AuditLog, MemoryAuditLog, PgAuditLog};
use crate::config::Config;
use crate::db;
use crate::ingest::adapter::AdapterRegistry;
use crate::ingest::dispatcher::Dispatcher;
use crate::ingest::jobs::{JobRegistry, MemoryJobRegistry, PgJobRegistry, RegistryError, SyncMode};
use crate::ingest::journal::{JournalError, MemoryRunJournal, PgRunJournal, RunJournal};
use crate::ingest::metrics::MetricsRegistry;
use crate::ingest::recovery::{sweep_orphans, SweepReport};
use crate::ingest::scheduler::Scheduler;
use crate::ingest::store::{EntityStore, MemoryEntityStore, PgEntityStore};

/// Durable backends behind their traits
pub struct Backends {
    pub registry: Arc<dyn JobRegistry>,
    pub journal: Arc<dyn RunJournal>,
    pub store: Arc<dyn EntityStore>,
    pub audit: Arc<dyn AuditLog>,
}

impl Backends {
    pub fn in_memory() -> Self {
        Self {
            registry: Arc::new(MemoryJobRegistry::new()),
            journal: Arc::new(MemoryRunJournal::new()),
            store: Arc::new(MemoryEntityStore::new()),
            audit: Arc::new(MemoryAuditLog::new()),
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            registry: Arc::new(PgJobRegistry::new(pool.clone())),
            journal: Arc::new(PgRunJournal::new(pool.clone())),
            store: Arc::new(PgEntityStore::new(pool.clone())),
            audit: Arc::new(PgAuditLog::new(pool)),
        }
    }
}

pub struct CoreServices {
    pub config: Arc<Config>,
    pub registry: Arc<dyn JobRegistry>,
    pub journal: Arc<dyn RunJournal>,
    pub store: Arc<dyn EntityStore>,
    pub audit: Arc<dyn AuditLog>,
    pub metrics: Arc<MetricsRegistry>,
    pub adapters: AdapterRegistry,
    pub dispatcher: Dispatcher,
    pub admin: Arc<AdminService>,
}

impl CoreServices {
    pub fn assemble(config: Config, adapters: AdapterRegistry, backends: Backends) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(MetricsRegistry::new());

        let dispatcher = Dispatcher::new(
            backends.journal.clone(),
            backends.store.clone(),
            backends.registry.clone(),
            adapters.clone(),
            metrics.clone(),
            config.dispatcher.clone(),
        );

        let admin = Arc::new(AdminService::new(
            backends.registry.clone(),
            backends.journal.clone(),
            backends.audit.clone(),
            backends.store.clone(),
            dispatcher.clone(),
            metrics.clone(),
            RateLimiter::per_minute(config.admin.requests_per_minute),
            config.clone(),
        ));

        Self {
            config,
            registry: backends.registry,
            journal: backends.journal,
            store: backends.store,
            audit: backends.audit,
            metrics,
            adapters,
            dispatcher,
            admin,
        }
    }

    pub fn in_memory(config: Config, adapters: AdapterRegistry) -> Self {
        Self::assemble(config, adapters, Backends::in_memory())
    }

    /// Connect, migrate and assemble on PostgreSQL.
    pub async fn postgres(config: Config, adapters: AdapterRegistry) -> anyhow::Result<Self> {
        let pool = db::create_pool(&config.database).await?;
        db::run_migrations(&pool).await?;
        Ok(Self::assemble(config, adapters, Backends::postgres(pool)))
    }

    /// Make the registry match the configured jobs.
    pub async fn sync_jobs(&self) -> Result<(), RegistryError> {
        self.sync_jobs_with(SyncMode::Replace).await
    }

    /// Upsert the configured jobs without dropping any others. Clients that
    /// may carry a narrower config than the server use this.
    pub async fn register_jobs(&self) -> Result<(), RegistryError> {
        self.sync_jobs_with(SyncMode::Upsert).await
    }

    async fn sync_jobs_with(&self, mode: SyncMode) -> Result<(), RegistryError> {
        for job in &self.config.jobs {
            if !self.adapters.contains(&job.adapter) {
                warn!(
                    job_id = %job.job_id,
                    adapter = %job.adapter,
                    "Job refers to an adapter that is not registered; runs will be rejected"
                );
            }
        }
        self.registry.sync(&self.config.jobs, mode).await?;
        info!(jobs = self.config.jobs.len(), ?mode, "Job registry synchronised");
        Ok(())
    }

    pub async fn sweep_orphans(&self) -> Result<SweepReport, JournalError> {
        sweep_orphans(
            self.journal.as_ref(),
            &self.metrics,
            self.config.recovery.stale_after(),
            Utc::now(),
        )
        .await
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.registry.clone(),
            self.journal.clone(),
            self.dispatcher.clone(),
            self.metrics.clone(),
            Duration::from_secs(self.config.scheduler.tick_interval_secs),
        )
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            admin: self.admin.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
