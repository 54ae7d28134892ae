//! Job definitions

use civic_common::{JobMode, Jurisdiction};
use serde::{Deserialize, Serialize};

use super::run::RunSummary;

/// One scrapeable source, as declared in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_id: String,
    pub jurisdiction: Jurisdiction,
    pub mode: JobMode,
    /// Cron expression; must be absent for bootstrap jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Name the adapter is registered under
    pub adapter: String,
    /// Default scope passed to the adapter when a trigger gives none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Adapter specific options, passed through untouched
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

impl JobDefinition {
    /// Whether the scheduler may start this job on its own.
    pub fn is_auto_schedulable(&self) -> bool {
        self.enabled && self.mode.is_schedulable() && self.schedule.is_some()
    }
}

/// A job together with its most recent run, as returned by `list_jobs`
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    #[serde(flatten)]
    pub job: JobDefinition,
    pub latest_run: Option<RunSummary>,
}
