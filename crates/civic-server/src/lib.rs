//! civicsync server library
//!
//! Orchestration core for collecting civic data (bills, politicians, votes,
//! districts, committees) from many sources into one store.
//!
//! # Overview
//!
//! - **Scheduler** decides which jobs are due and asks the dispatcher to run them
//! - **Dispatcher** runs jobs on a bounded worker pool, at most one run per job
//! - **Store** upserts entities idempotently by `(jurisdiction, natural_key)`
//! - **Run journal** keeps one row per run and doubles as the run-lock
//! - **Admin control plane** lists, toggles and triggers jobs; every mutation is
//!   rate limited per actor and audited
//! - **Metrics** are exposed in the Prometheus text format
//!
//! Every durable component sits behind a trait with a PostgreSQL and an
//! in-memory implementation.
//!
//! # Example
//!
//! ```no_run
//! use civic_server::{config::Config, ingest::AdapterRegistry, services::CoreServices};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let services = CoreServices::postgres(config, AdapterRegistry::with_builtin()).await?;
//!     services.sync_jobs().await?;
//!     services.sweep_orphans().await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod admin;
pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod models;
pub mod services;

pub use admin::{AdminError, AdminService};
pub use config::{Config, ConfigError};
pub use services::CoreServices;
