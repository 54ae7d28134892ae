//! PostgreSQL job registry

use async_trait::async_trait;
use sqlx::PgPool;

use super::{JobRegistry, RegistryError, SyncMode};
use crate::models::JobDefinition;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    job_id: String,
    jurisdiction: String,
    mode: String,
    schedule: Option<String>,
    enabled: bool,
    adapter: String,
    scope: Option<String>,
    options: serde_json::Value,
}

impl TryFrom<JobRow> for JobDefinition {
    type Error = RegistryError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |e: civic_common::CivicError| RegistryError::Corrupt(e.to_string());
        Ok(JobDefinition {
            job_id: row.job_id,
            jurisdiction: row.jurisdiction.parse().map_err(corrupt)?,
            mode: row.mode.parse().map_err(corrupt)?,
            schedule: row.schedule,
            enabled: row.enabled,
            adapter: row.adapter,
            scope: row.scope,
            options: row.options,
        })
    }
}

/// `enabled` is the effective value: the operator override wins.
const SELECT_JOBS: &str = r#"
    SELECT job_id, jurisdiction, mode, schedule,
           COALESCE(enabled_override, enabled) AS enabled,
           adapter, scope, options
    FROM jobs
"#;

#[derive(Debug, Clone)]
pub struct PgJobRegistry {
    pool: PgPool,
}

impl PgJobRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRegistry for PgJobRegistry {
    async fn sync(&self, jobs: &[JobDefinition], mode: SyncMode) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await?;

        for job in jobs {
            let options = if job.options.is_null() {
                serde_json::json!({})
            } else {
                job.options.clone()
            };

            sqlx::query(
                r#"
                INSERT INTO jobs (job_id, jurisdiction, mode, schedule, enabled, adapter, scope, options)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (job_id) DO UPDATE SET
                    jurisdiction = EXCLUDED.jurisdiction,
                    mode = EXCLUDED.mode,
                    schedule = EXCLUDED.schedule,
                    enabled = EXCLUDED.enabled,
                    adapter = EXCLUDED.adapter,
                    scope = EXCLUDED.scope,
                    options = EXCLUDED.options,
                    updated_at = NOW()
                "#,
            )
            .bind(&job.job_id)
            .bind(job.jurisdiction.as_str())
            .bind(job.mode.as_str())
            .bind(&job.schedule)
            .bind(job.enabled)
            .bind(&job.adapter)
            .bind(&job.scope)
            .bind(options)
            .execute(&mut *tx)
            .await?;
        }

        let removed = match mode {
            SyncMode::Replace => {
                let keep: Vec<String> = jobs.iter().map(|j| j.job_id.clone()).collect();
                sqlx::query("DELETE FROM jobs WHERE NOT (job_id = ANY($1))")
                    .bind(&keep)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected()
            },
            SyncMode::Upsert => 0,
        };

        tx.commit().await?;

        tracing::info!(jobs = jobs.len(), removed, "Job registry synchronised");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobDefinition>, RegistryError> {
        let sql = format!("{SELECT_JOBS} ORDER BY job_id");
        sqlx::query_as::<_, JobRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(JobDefinition::try_from)
            .collect()
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobDefinition>, RegistryError> {
        let sql = format!("{SELECT_JOBS} WHERE job_id = $1");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .map(JobDefinition::try_from)
            .transpose()
    }

    async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<bool, RegistryError> {
        let updated = sqlx::query(
            "UPDATE jobs SET enabled_override = $2, updated_at = NOW() WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated > 0)
    }
}
