//! Database queries for the audit log

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::{AuditEntry, AuditError, AuditLog, AuditQuery, NewAuditEntry};

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: i64,
    actor: String,
    action: String,
    target_job_id: Option<String>,
    result: String,
    timestamp: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AuditError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: row.id,
            actor: row.actor,
            action: row.action.parse().map_err(AuditError::Corrupt)?,
            target_job_id: row.target_job_id,
            result: row.result.parse().map_err(AuditError::Corrupt)?,
            timestamp: row.timestamp,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `WHERE` clause for the filters that are set, with placeholders starting at `$1`.
fn filter_clause(query: &AuditQuery) -> (String, usize) {
    let mut bind_count = 1;
    let mut conditions = Vec::new();

    if query.actor.is_some() {
        conditions.push(format!("actor = ${bind_count}"));
        bind_count += 1;
    }
    if query.action.is_some() {
        conditions.push(format!("action = ${bind_count}"));
        bind_count += 1;
    }
    if query.target_job_id.is_some() {
        conditions.push(format!("target_job_id = ${bind_count}"));
        bind_count += 1;
    }

    let mut clause = String::from(" WHERE 1=1");
    for condition in conditions {
        clause.push_str(" AND ");
        clause.push_str(&condition);
    }
    (clause, bind_count)
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, AuditError> {
        let row = sqlx::query_as::<_, AuditRow>(
            r#"
            INSERT INTO audit_log (actor, action, target_job_id, result)
            VALUES ($1, $2, $3, $4)
            RETURNING id, actor, action, target_job_id, result, timestamp
            "#,
        )
        .bind(&entry.actor)
        .bind(entry.action.as_str())
        .bind(&entry.target_job_id)
        .bind(entry.result.to_string())
        .fetch_one(&self.pool)
        .await?;

        debug!(
            audit_id = row.id,
            action = %entry.action,
            result = %entry.result,
            "Created audit log entry"
        );

        row.try_into()
    }

    async fn query(&self, query: &AuditQuery) -> Result<(Vec<AuditEntry>, i64), AuditError> {
        let (clause, bind_count) = filter_clause(query);

        let count_sql = format!("SELECT COUNT(*) FROM audit_log{clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(actor) = &query.actor {
            count_query = count_query.bind(actor);
        }
        if let Some(action) = query.action {
            count_query = count_query.bind(action.as_str());
        }
        if let Some(job_id) = &query.target_job_id {
            count_query = count_query.bind(job_id);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT id, actor, action, target_job_id, result, timestamp FROM audit_log{clause} \
             ORDER BY timestamp DESC, id DESC LIMIT ${} OFFSET ${}",
            bind_count,
            bind_count + 1
        );
        let mut query_builder = sqlx::query_as::<_, AuditRow>(&sql);
        if let Some(actor) = &query.actor {
            query_builder = query_builder.bind(actor);
        }
        if let Some(action) = query.action {
            query_builder = query_builder.bind(action.as_str());
        }
        if let Some(job_id) = &query.target_job_id {
            query_builder = query_builder.bind(job_id);
        }
        let rows = query_builder
            .bind(query.effective_limit())
            .bind(query.effective_offset())
            .fetch_all(&self.pool)
            .await?;

        debug!(count = rows.len(), total, "Queried audit logs");

        let entries = rows
            .into_iter()
            .map(AuditEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((entries, total))
    }
}
