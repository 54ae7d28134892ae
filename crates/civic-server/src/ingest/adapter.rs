//! Fetch adapter contract
//!
//! Adapters are the source-specific half of ingestion: they fetch and
//! normalize records into [`Entity`] values. The core only sees the
//! [`Adapter`] trait and the typed [`AdapterError`] it yields.
//!
//! A record that fails to parse is reported as [`AdapterError::Parse`] inside
//! the stream and the stream keeps going. `SourceUnavailable` ends the run.
//! `RateLimited` asks the dispatcher to pause the same stream.

use async_trait::async_trait;
use chrono::NaiveDate;
use civic_common::JobMode;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::json_file::JsonFileAdapter;
use crate::models::Entity;

/// Lazy sequence of normalized entities
pub type EntityStream = BoxStream<'static, Result<Entity, AdapterError>>;

/// Errors an adapter may report
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    /// The source could not be reached; a later scheduled run may succeed.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single record could not be normalized. Non-terminal.
    #[error("parse error: {context}")]
    Parse { context: String },

    /// The source asked us to back off.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

impl AdapterError {
    pub fn parse(context: impl Into<String>) -> Self {
        AdapterError::Parse {
            context: context.into(),
        }
    }
}

/// Parameters handed to [`Adapter::fetch`]
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub job_id: String,
    pub mode: JobMode,
    pub scope: Option<String>,
    pub since: Option<NaiveDate>,
    /// The job's `options` table from configuration
    pub options: serde_json::Value,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Registry name, referenced by `adapter = "..."` in job configuration.
    fn name(&self) -> &str;

    /// Start fetching. Errors returned here end the run before any record
    /// is read.
    async fn fetch(&self, request: FetchRequest) -> Result<EntityStream, AdapterError>;
}

/// Adapters by name
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the adapters compiled into this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonFileAdapter));
        registry
    }

    /// Register an adapter, replacing any previous one with the same name.
    pub fn register(&mut self, adapter: Arc<dyn Adapter>) -> &mut Self {
        self.adapters.insert(adapter.name().to_string(), adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}
