//! Runs: one execution attempt of a job

use chrono::{DateTime, NaiveDate, Utc};
use civic_common::JobMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Run lifecycle status
///
/// `Pending` and `Running` are the only non-terminal states. Transitions
/// out of a terminal state are never allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub const ACTIVE: [RunStatus; 2] = [RunStatus::Pending, RunStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::PartialSuccess => "partial_success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            RunStatus::Pending => next != RunStatus::Pending,
            RunStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "partial_success" => Ok(RunStatus::PartialSuccess),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who asked for a run: `scheduler` or `admin:<actor>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TriggeredBy {
    Scheduler,
    Admin(String),
}

impl TriggeredBy {
    pub fn admin(actor: impl Into<String>) -> Self {
        TriggeredBy::Admin(actor.into())
    }
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggeredBy::Scheduler => f.write_str("scheduler"),
            TriggeredBy::Admin(actor) => write!(f, "admin:{actor}"),
        }
    }
}

impl FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "scheduler" {
            return Ok(TriggeredBy::Scheduler);
        }
        match s.strip_prefix("admin:") {
            Some(actor) if !actor.is_empty() => Ok(TriggeredBy::Admin(actor.to_string())),
            _ => Err(format!("invalid trigger '{s}'")),
        }
    }
}

impl From<TriggeredBy> for String {
    fn from(value: TriggeredBy) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for TriggeredBy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A row of the run journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub job_id: String,
    pub mode: JobMode,
    pub scope: Option<String>,
    pub since: Option<NaiveDate>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub records_seen: i64,
    pub records_upserted: i64,
    pub records_skipped: i64,
    pub records_failed: i64,
    pub error_summary: Option<String>,
    pub triggered_by: TriggeredBy,
}

impl Run {
    /// Last sign of life: the heartbeat if any, else the start time.
    pub fn last_seen_alive(&self) -> DateTime<Utc> {
        self.heartbeat_at.unwrap_or(self.started_at)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            records_upserted: self.records_upserted,
            error_summary: self.error_summary.clone(),
        }
    }
}

/// Input for creating a run
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub job_id: String,
    pub mode: JobMode,
    pub scope: Option<String>,
    pub since: Option<NaiveDate>,
    pub triggered_by: TriggeredBy,
}

impl NewRun {
    /// Build the pending row. Run ids are UUIDv7 so they sort by creation.
    pub fn into_run(self, now: DateTime<Utc>) -> Run {
        Run {
            run_id: Uuid::now_v7(),
            job_id: self.job_id,
            mode: self.mode,
            scope: self.scope,
            since: self.since,
            status: RunStatus::Pending,
            started_at: now,
            ended_at: None,
            heartbeat_at: None,
            records_seen: 0,
            records_upserted: 0,
            records_skipped: 0,
            records_failed: 0,
            error_summary: None,
            triggered_by: self.triggered_by,
        }
    }
}

/// Counter deltas reported by `update_progress`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub seen: i64,
    pub upserted: i64,
    pub skipped: i64,
    pub failed: i64,
}

impl RunProgress {
    pub fn is_empty(&self) -> bool {
        *self == RunProgress::default()
    }
}

impl std::ops::AddAssign for RunProgress {
    fn add_assign(&mut self, rhs: Self) {
        self.seen += rhs.seen;
        self.upserted += rhs.upserted;
        self.skipped += rhs.skipped;
        self.failed += rhs.failed;
    }
}

/// Condensed view used in job listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub records_upserted: i64,
    pub error_summary: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Cancelled));
        assert!(RunStatus::Running.can_transition_to(RunStatus::PartialSuccess));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
        assert!(!RunStatus::Success.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Success));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::PartialSuccess,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("done".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_triggered_by_format() {
        assert_eq!(TriggeredBy::Scheduler.to_string(), "scheduler");
        assert_eq!(TriggeredBy::admin("maria").to_string(), "admin:maria");
        assert_eq!("admin:maria".parse::<TriggeredBy>().unwrap(), TriggeredBy::admin("maria"));
        assert!("admin:".parse::<TriggeredBy>().is_err());
        assert!("cron".parse::<TriggeredBy>().is_err());

        let json = serde_json::to_string(&TriggeredBy::admin("ops")).unwrap();
        assert_eq!(json, "\"admin:ops\"");
    }

    #[test]
    fn test_new_run_ids_sort_by_creation() {
        let now = Utc::now();
        let new_run = || NewRun {
            job_id: "ca_on".to_string(),
            mode: JobMode::Daily,
            scope: None,
            since: None,
            triggered_by: TriggeredBy::Scheduler,
        };
        let first = new_run().into_run(now);
        let second = new_run().into_run(now);
        assert!(first.run_id < second.run_id);
        assert_eq!(first.status, RunStatus::Pending);
        assert!(first.ended_at.is_none());
    }
}
