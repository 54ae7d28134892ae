//! Audit data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Audit Query Constants
// ============================================================================

/// Default number of audit entries returned per query
pub const DEFAULT_AUDIT_QUERY_LIMIT: i64 = 100;

/// Maximum number of audit entries that can be returned in a single query
pub const MAX_AUDIT_QUERY_LIMIT: i64 = 1000;

/// Control plane actions that are audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ToggleJob,
    RunNow,
    ReadConfig,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToggleJob => "toggle_job",
            Self::RunNow => "run_now",
            Self::ReadConfig => "read_config",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "toggle_job" => Ok(Self::ToggleJob),
            "run_now" => Ok(Self::RunNow),
            "read_config" => Ok(Self::ReadConfig),
            other => Err(format!("unknown audit action '{other}'")),
        }
    }
}

/// Outcome of an audited action, stored as `accepted` or `rejected:<reason>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AuditResult {
    Accepted,
    Rejected(String),
}

impl AuditResult {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Short label used for metrics: `accepted` or the rejection reason.
    pub fn label(&self) -> &str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected(reason) => reason,
        }
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("accepted"),
            Self::Rejected(reason) => write!(f, "rejected:{reason}"),
        }
    }
}

impl FromStr for AuditResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "accepted" {
            return Ok(Self::Accepted);
        }
        match s.strip_prefix("rejected:") {
            Some(reason) if !reason.is_empty() => Ok(Self::Rejected(reason.to_string())),
            _ => Err(format!("invalid audit result '{s}'")),
        }
    }
}

impl From<AuditResult> for String {
    fn from(value: AuditResult) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for AuditResult {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Audit log entry as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: AuditAction,
    pub target_job_id: Option<String>,
    pub result: AuditResult,
    pub timestamp: DateTime<Utc>,
}

/// Input for appending an audit entry
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub actor: String,
    pub action: AuditAction,
    pub target_job_id: Option<String>,
    pub result: AuditResult,
}

impl NewAuditEntry {
    pub fn new(actor: impl Into<String>, action: AuditAction, result: AuditResult) -> Self {
        Self {
            actor: actor.into(),
            action,
            target_job_id: None,
            result,
        }
    }

    pub fn target(mut self, job_id: impl Into<String>) -> Self {
        self.target_job_id = Some(job_id.into());
        self
    }
}

/// Filters for reading the audit log, newest entries first
#[derive(Debug, Clone, Deserialize)]
pub struct AuditQuery {
    pub actor: Option<String>,
    pub action: Option<AuditAction>,
    pub target_job_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    DEFAULT_AUDIT_QUERY_LIMIT
}

impl AuditQuery {
    /// Limit clamped to `1..=MAX_AUDIT_QUERY_LIMIT`
    pub fn effective_limit(&self) -> i64 {
        self.limit.clamp(1, MAX_AUDIT_QUERY_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.max(0)
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.actor.as_ref().map_or(true, |actor| &entry.actor == actor)
            && self.action.map_or(true, |action| entry.action == action)
            && self
                .target_job_id
                .as_ref()
                .map_or(true, |job_id| entry.target_job_id.as_ref() == Some(job_id))
    }
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            actor: None,
            action: None,
            target_job_id: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}
