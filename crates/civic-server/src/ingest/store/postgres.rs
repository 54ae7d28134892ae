//! PostgreSQL entity store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{EntityStore, PreparedEntity, StoreError, StoredEntity, UpsertOutcome};

/// Insert, or rewrite only when the hash differs. No row comes back for an
/// unchanged entity; `xmax = 0` tells a fresh insert from an update.
const UPSERT_SQL: &str = r#"
    INSERT INTO entities (
        jurisdiction, natural_key, kind, payload, content_hash, source_run_id
    )
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (jurisdiction, natural_key) DO UPDATE SET
        kind = EXCLUDED.kind,
        payload = EXCLUDED.payload,
        content_hash = EXCLUDED.content_hash,
        source_run_id = EXCLUDED.source_run_id,
        updated_at = NOW()
    WHERE entities.content_hash IS DISTINCT FROM EXCLUDED.content_hash
    RETURNING (xmax = 0) AS inserted
"#;

#[derive(Debug, Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_row(
        conn: &mut PgConnection,
        row: &PreparedEntity,
    ) -> Result<UpsertOutcome, sqlx::Error> {
        let inserted: Option<bool> = sqlx::query_scalar(UPSERT_SQL)
            .bind(&row.jurisdiction)
            .bind(&row.natural_key)
            .bind(row.kind)
            .bind(&row.payload)
            .bind(&row.content_hash)
            .bind(row.source_run_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(match inserted {
            Some(true) => UpsertOutcome::Inserted,
            Some(false) => UpsertOutcome::Updated,
            None => UpsertOutcome::Unchanged,
        })
    }
}

/// Database errors are about the data; everything else means the store is
/// not reachable.
fn classify(err: sqlx::Error, natural_key: &str) -> StoreError {
    match err {
        sqlx::Error::Database(db) => StoreError::Rejected {
            natural_key: natural_key.to_string(),
            message: db.to_string(),
        },
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn write_chunk(&self, rows: &[PreparedEntity]) -> Result<Vec<UpsertOutcome>, StoreError> {
        let first_key = rows.first().map(|r| r.natural_key.as_str()).unwrap_or_default();
        let mut tx = self.pool.begin().await.map_err(|e| classify(e, first_key))?;

        let mut outcomes = Vec::with_capacity(rows.len());
        for row in rows {
            let outcome = Self::upsert_row(&mut tx, row)
                .await
                .map_err(|e| classify(e, &row.natural_key))?;
            outcomes.push(outcome);
        }

        tx.commit().await.map_err(|e| classify(e, first_key))?;
        Ok(outcomes)
    }

    async fn write_one(&self, row: &PreparedEntity) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify(e, &row.natural_key))?;
        Self::upsert_row(&mut conn, row)
            .await
            .map_err(|e| classify(e, &row.natural_key))
    }

    async fn get(
        &self,
        jurisdiction: &str,
        natural_key: &str,
    ) -> Result<Option<StoredEntity>, StoreError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                serde_json::Value,
                String,
                Option<Uuid>,
                DateTime<Utc>,
                DateTime<Utc>,
            ),
        >(
            r#"
            SELECT jurisdiction, natural_key, kind, payload, content_hash,
                   source_run_id, first_seen_at, updated_at
            FROM entities
            WHERE jurisdiction = $1 AND natural_key = $2
            "#,
        )
        .bind(jurisdiction)
        .bind(natural_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(e, natural_key))?;

        Ok(row.map(
            |(
                jurisdiction,
                natural_key,
                kind,
                payload,
                content_hash,
                source_run_id,
                first_seen_at,
                updated_at,
            )| StoredEntity {
                jurisdiction,
                natural_key,
                kind,
                payload,
                content_hash,
                source_run_id,
                first_seen_at,
                updated_at,
            },
        ))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
