//! Ingestion orchestration
//!
//! # Architecture
//!
//! - **adapter**: source adapter trait and the adapter registry
//! - **json_file**: built-in adapter reading entities from a JSON document
//! - **store**: idempotent entity upserts keyed by `(jurisdiction, natural_key)`
//! - **journal**: one row per run, doubling as the per-job run-lock
//! - **jobs**: job definitions synchronised from configuration
//! - **metrics**: counters, gauges and histograms in Prometheus text format
//! - **schedule**: pure cron evaluation
//! - **scheduler**: tick loop deciding which jobs are due
//! - **dispatcher**: bounded worker pool executing runs
//! - **recovery**: startup sweep for runs orphaned by a crash

pub mod adapter;
pub mod dispatcher;
pub mod jobs;
pub mod journal;
pub mod json_file;
pub mod metrics;
pub mod recovery;
pub mod schedule;
pub mod scheduler;
pub mod store;

pub use adapter::{Adapter, AdapterError, AdapterRegistry, EntityStream, FetchRequest};
pub use dispatcher::{DispatchError, DispatchRequest, Dispatcher, RunHandle};
pub use jobs::{JobRegistry, MemoryJobRegistry, PgJobRegistry, RegistryError, SyncMode};
pub use journal::{JournalError, MemoryRunJournal, PgRunJournal, RunJournal};
pub use metrics::MetricsRegistry;
pub use recovery::{sweep_orphans, SweepReport};
pub use scheduler::{JobPhase, Scheduler, TickReport};
pub use store::{EntityStore, MemoryEntityStore, PgEntityStore, StoreError, UpsertResult};
