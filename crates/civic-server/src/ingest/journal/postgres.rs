//! PostgreSQL run journal
//!
//! The run-lock is the partial unique index `runs_one_active_per_job`:
//! inserting a second pending row for a job violates it, which is reported
//! as [`JournalError::JobLocked`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{JournalError, RunJournal};
use crate::models::{NewRun, Run, RunProgress, RunStatus};

const RUN_LOCK_INDEX: &str = "runs_one_active_per_job";

const RUN_COLUMNS: &str = r#"
    run_id, job_id, mode, scope, since, status, started_at, ended_at, heartbeat_at,
    records_seen, records_upserted, records_skipped, records_failed,
    error_summary, triggered_by
"#;

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    run_id: Uuid,
    job_id: String,
    mode: String,
    scope: Option<String>,
    since: Option<NaiveDate>,
    status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    heartbeat_at: Option<DateTime<Utc>>,
    records_seen: i64,
    records_upserted: i64,
    records_skipped: i64,
    records_failed: i64,
    error_summary: Option<String>,
    triggered_by: String,
}

impl TryFrom<RunRow> for Run {
    type Error = JournalError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Run {
            run_id: row.run_id,
            job_id: row.job_id,
            mode: row.mode.parse().map_err(|e| JournalError::Corrupt(format!("{e}")))?,
            scope: row.scope,
            since: row.since,
            status: row.status.parse().map_err(JournalError::Corrupt)?,
            started_at: row.started_at,
            ended_at: row.ended_at,
            heartbeat_at: row.heartbeat_at,
            records_seen: row.records_seen,
            records_upserted: row.records_upserted,
            records_skipped: row.records_skipped,
            records_failed: row.records_failed,
            error_summary: row.error_summary,
            triggered_by: row.triggered_by.parse().map_err(JournalError::Corrupt)?,
        })
    }
}

fn into_runs(rows: Vec<RunRow>) -> Result<Vec<Run>, JournalError> {
    rows.into_iter().map(Run::try_from).collect()
}

#[derive(Debug, Clone)]
pub struct PgRunJournal {
    pool: PgPool,
}

impl PgRunJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, predicate: &str, job_id: Option<&str>) -> Result<Vec<Run>, JournalError> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE {predicate} ORDER BY started_at DESC, run_id DESC"
        );
        let mut query = sqlx::query_as::<_, RunRow>(&sql);
        if let Some(job_id) = job_id {
            query = query.bind(job_id);
        }
        into_runs(query.fetch_all(&self.pool).await?)
    }

    /// Why a conditional update touched no row.
    async fn explain_miss(&self, run_id: Uuid, to: RunStatus) -> JournalError {
        match self.get_run(run_id).await {
            Ok(Some(run)) if run.status.is_terminal() => JournalError::InvalidTransition {
                run_id,
                from: run.status,
                to,
            },
            Ok(Some(_)) => JournalError::NotActive(run_id),
            Ok(None) => JournalError::NotFound(run_id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl RunJournal for PgRunJournal {
    async fn create_run(&self, new_run: NewRun) -> Result<Run, JournalError> {
        let job_id = new_run.job_id.clone();
        let run = new_run.into_run(Utc::now());

        let sql = format!(
            r#"
            INSERT INTO runs (run_id, job_id, mode, scope, since, status, triggered_by)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            RETURNING {RUN_COLUMNS}
            "#
        );

        let result = sqlx::query_as::<_, RunRow>(&sql)
            .bind(run.run_id)
            .bind(&run.job_id)
            .bind(run.mode.as_str())
            .bind(&run.scope)
            .bind(run.since)
            .bind(run.triggered_by.to_string())
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => Run::try_from(row),
            Err(sqlx::Error::Database(db))
                if db.is_unique_violation() && db.constraint() == Some(RUN_LOCK_INDEX) =>
            {
                Err(JournalError::JobLocked { job_id })
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_running(&self, run_id: Uuid) -> Result<(), JournalError> {
        let updated = sqlx::query(
            r#"
            UPDATE runs SET status = 'running', heartbeat_at = NOW()
            WHERE run_id = $1 AND status = 'pending'
            "#,
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self.explain_miss(run_id, RunStatus::Running).await);
        }
        Ok(())
    }

    async fn update_progress(&self, run_id: Uuid, delta: RunProgress) -> Result<(), JournalError> {
        let updated = sqlx::query(
            r#"
            UPDATE runs SET
                records_seen = records_seen + $2,
                records_upserted = records_upserted + $3,
                records_skipped = records_skipped + $4,
                records_failed = records_failed + $5,
                heartbeat_at = NOW()
            WHERE run_id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(run_id)
        .bind(delta.seen)
        .bind(delta.upserted)
        .bind(delta.skipped)
        .bind(delta.failed)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self.explain_miss(run_id, RunStatus::Running).await);
        }
        Ok(())
    }

    async fn heartbeat(&self, run_id: Uuid) -> Result<(), JournalError> {
        let updated = sqlx::query(
            "UPDATE runs SET heartbeat_at = NOW() WHERE run_id = $1 AND status IN ('pending', 'running')",
        )
        .bind(run_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(self.explain_miss(run_id, RunStatus::Running).await);
        }
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_summary: Option<String>,
    ) -> Result<Run, JournalError> {
        if !status.is_terminal() {
            return Err(JournalError::InvalidTransition {
                run_id,
                from: RunStatus::Running,
                to: status,
            });
        }

        let sql = format!(
            r#"
            UPDATE runs SET status = $2, error_summary = $3, ended_at = NOW()
            WHERE run_id = $1 AND status IN ('pending', 'running')
            RETURNING {RUN_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, RunRow>(&sql)
            .bind(run_id)
            .bind(status.as_str())
            .bind(&error_summary)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Run::try_from(row),
            None => Err(self.explain_miss(run_id, status).await),
        }
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>, JournalError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = $1");
        sqlx::query_as::<_, RunRow>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Run::try_from)
            .transpose()
    }

    async fn list_runs(
        &self,
        job_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Run>, i64), JournalError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM runs WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            r#"
            SELECT {RUN_COLUMNS} FROM runs
            WHERE job_id = $1
            ORDER BY started_at DESC, run_id DESC
            LIMIT $2 OFFSET $3
            "#
        );
        let rows = sqlx::query_as::<_, RunRow>(&sql)
            .bind(job_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((into_runs(rows)?, total))
    }

    async fn latest_run(&self, job_id: &str) -> Result<Option<Run>, JournalError> {
        let (mut runs, _) = self.list_runs(job_id, 1, 0).await?;
        Ok(runs.pop())
    }

    async fn active_run(&self, job_id: &str) -> Result<Option<Run>, JournalError> {
        let mut runs = self
            .fetch_where("job_id = $1 AND status IN ('pending', 'running')", Some(job_id))
            .await?;
        Ok(runs.pop())
    }

    async fn active_runs(&self) -> Result<Vec<Run>, JournalError> {
        self.fetch_where("status IN ('pending', 'running')", None).await
    }

    async fn stale_runs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Run>, JournalError> {
        let sql = format!(
            r#"
            SELECT {RUN_COLUMNS} FROM runs
            WHERE status IN ('pending', 'running')
              AND COALESCE(heartbeat_at, started_at) < $1
            ORDER BY started_at
            "#
        );
        let rows = sqlx::query_as::<_, RunRow>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        into_runs(rows)
    }
}
