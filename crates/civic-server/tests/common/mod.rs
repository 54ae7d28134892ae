//! Shared fixtures for civic-server integration tests
//!
//! Everything here runs on the in-memory backends; the PostgreSQL tests in
//! `postgres_tests.rs` bring their own pool.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use civic_common::{JobMode, Jurisdiction};
use civic_server::config::Config;
use civic_server::ingest::{
    Adapter, AdapterError, AdapterRegistry, EntityStream, FetchRequest, JournalError,
    MemoryEntityStore, MemoryRunJournal, RunJournal,
};
use civic_server::models::{
    Bill, Entity, EntityPayload, JobDefinition, NewRun, Politician, Run, RunProgress, RunStatus,
};
use civic_server::services::{Backends, CoreServices};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const JURISDICTION: &str = "ca_on";

/// Yields the same scripted items on every fetch.
pub struct ScriptedAdapter {
    name: String,
    items: Vec<Result<Entity, AdapterError>>,
    fetches: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(name: &str, items: Vec<Result<Entity, AdapterError>>) -> Self {
        Self {
            name: name.to_string(),
            items,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _request: FetchRequest) -> Result<EntityStream, AdapterError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(stream::iter(self.items.clone())))
    }
}

/// Yields its items and then never finishes, so runs stay active until
/// cancelled or timed out.
pub struct StalledAdapter {
    name: String,
    items: Vec<Entity>,
}

impl StalledAdapter {
    pub fn new(name: &str, items: Vec<Entity>) -> Self {
        Self {
            name: name.to_string(),
            items,
        }
    }
}

#[async_trait]
impl Adapter for StalledAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _request: FetchRequest) -> Result<EntityStream, AdapterError> {
        let items = self.items.clone().into_iter().map(Ok);
        Ok(Box::pin(stream::iter(items).chain(stream::pending())))
    }
}

/// Fails every fetch with the given error.
pub struct FailingAdapter {
    name: String,
    error: AdapterError,
}

impl FailingAdapter {
    pub fn new(name: &str, error: AdapterError) -> Self {
        Self {
            name: name.to_string(),
            error,
        }
    }
}

#[async_trait]
impl Adapter for FailingAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _request: FetchRequest) -> Result<EntityStream, AdapterError> {
        Err(self.error.clone())
    }
}

/// Takes `delay` to open its stream, then yields one politician.
pub struct SlowFetchAdapter {
    pub delay: Duration,
}

#[async_trait]
impl Adapter for SlowFetchAdapter {
    fn name(&self) -> &str {
        "slow"
    }

    async fn fetch(&self, _request: FetchRequest) -> Result<EntityStream, AdapterError> {
        tokio::time::sleep(self.delay).await;
        Ok(Box::pin(stream::iter(vec![Ok(politician("slow", "Slow"))])))
    }
}

pub struct PanickingAdapter;

#[async_trait]
impl Adapter for PanickingAdapter {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn fetch(&self, _request: FetchRequest) -> Result<EntityStream, AdapterError> {
        panic!("adapter exploded");
    }
}

/// Memory journal that counts heartbeats and can refuse to start runs.
#[derive(Default)]
pub struct InstrumentedJournal {
    inner: MemoryRunJournal,
    heartbeats: AtomicUsize,
    refuse_next_start: AtomicBool,
}

impl InstrumentedJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    /// The next `mark_running` fails as if the database dropped out.
    pub fn refuse_next_start(&self) {
        self.refuse_next_start.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RunJournal for InstrumentedJournal {
    async fn create_run(&self, new_run: NewRun) -> Result<Run, JournalError> {
        self.inner.create_run(new_run).await
    }

    async fn mark_running(&self, run_id: Uuid) -> Result<(), JournalError> {
        if self.refuse_next_start.swap(false, Ordering::SeqCst) {
            return Err(JournalError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.mark_running(run_id).await
    }

    async fn update_progress(&self, run_id: Uuid, delta: RunProgress) -> Result<(), JournalError> {
        self.inner.update_progress(run_id, delta).await
    }

    async fn heartbeat(&self, run_id: Uuid) -> Result<(), JournalError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        self.inner.heartbeat(run_id).await
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_summary: Option<String>,
    ) -> Result<Run, JournalError> {
        self.inner.finalize_run(run_id, status, error_summary).await
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, JournalError> {
        self.inner.get_run(run_id).await
    }

    async fn list_runs(
        &self,
        job_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Run>, i64), JournalError> {
        self.inner.list_runs(job_id, limit, offset).await
    }

    async fn latest_run(&self, job_id: &str) -> Result<Option<Run>, JournalError> {
        self.inner.latest_run(job_id).await
    }

    async fn active_run(&self, job_id: &str) -> Result<Option<Run>, JournalError> {
        self.inner.active_run(job_id).await
    }

    async fn active_runs(&self) -> Result<Vec<Run>, JournalError> {
        self.inner.active_runs().await
    }

    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>, JournalError> {
        self.inner.stale_runs(cutoff).await
    }
}

pub fn politician(slug: &str, name: &str) -> Entity {
    Entity::new(
        JURISDICTION,
        format!("{JURISDICTION}/politician/{slug}"),
        EntityPayload::Politician(Politician {
            name: name.to_string(),
            party: None,
            district: None,
            role: None,
            email: None,
        }),
    )
}

pub fn bill(identifier: &str, title: &str) -> Entity {
    Entity::new(
        JURISDICTION,
        format!("{JURISDICTION}/bill/{identifier}"),
        EntityPayload::Bill(Bill {
            identifier: identifier.to_string(),
            title: title.to_string(),
            session: None,
            status: None,
            introduced_on: None,
            sponsors: Vec::new(),
        }),
    )
}

/// Three politicians and two bills.
pub fn bootstrap_fixture() -> Vec<Entity> {
    vec![
        politician("doug-ford", "Doug Ford"),
        politician("marit-stiles", "Marit Stiles"),
        politician("john-fraser", "John Fraser"),
        bill("43-1/1", "An Act to implement Budget measures"),
        bill("43-1/2", "Working for Workers Act"),
    ]
}

pub fn job(job_id: &str, adapter: &str, mode: JobMode, schedule: Option<&str>) -> JobDefinition {
    JobDefinition {
        job_id: job_id.to_string(),
        jurisdiction: Jurisdiction::Provincial,
        mode,
        schedule: schedule.map(str::to_string),
        enabled: true,
        adapter: adapter.to_string(),
        scope: None,
        options: serde_json::Value::Null,
    }
}

/// Config with the given jobs and test-friendly dispatcher settings.
pub fn config_with(jobs: Vec<JobDefinition>) -> Config {
    let mut config = Config::default();
    config.jobs = jobs;
    config.dispatcher.batch_size = 100;
    config
}

pub fn registry_with(adapters: Vec<Arc<dyn Adapter>>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }
    registry
}

/// In-memory core plus a handle on its store for fault injection.
pub struct Harness {
    pub services: CoreServices,
    pub store: Arc<MemoryEntityStore>,
}

pub async fn harness(config: Config, adapters: Vec<Arc<dyn Adapter>>) -> Harness {
    harness_with_journal(config, adapters, Arc::new(MemoryRunJournal::new())).await
}

pub async fn harness_with_journal(
    config: Config,
    adapters: Vec<Arc<dyn Adapter>>,
    journal: Arc<dyn RunJournal>,
) -> Harness {
    let store = Arc::new(MemoryEntityStore::new());
    let backends = Backends {
        store: store.clone(),
        journal,
        ..Backends::in_memory()
    };

    let services = CoreServices::assemble(config, registry_with(adapters), backends);
    services.sync_jobs().await.unwrap();
    Harness { services, store }
}

/// Poll until `check` holds, yielding to the runtime between attempts.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub fn scripted(name: &str, items: Vec<Result<Entity, AdapterError>>) -> Arc<dyn Adapter> {
    Arc::new(ScriptedAdapter::new(name, items))
}

pub fn stalled(name: &str, items: Vec<Entity>) -> Arc<dyn Adapter> {
    Arc::new(StalledAdapter::new(name, items))
}

pub fn failing(name: &str, error: AdapterError) -> Arc<dyn Adapter> {
    Arc::new(FailingAdapter::new(name, error))
}

pub fn panicking() -> Arc<dyn Adapter> {
    Arc::new(PanickingAdapter)
}
