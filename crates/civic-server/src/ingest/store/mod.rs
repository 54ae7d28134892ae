//! Idempotent entity store
//!
//! Entities are written by `(jurisdiction, natural_key)`. A row is only
//! rewritten when the content hash of its payload changed, so replaying an
//! identical run writes nothing.
//!
//! [`EntityStore::upsert_batch`] splits its input into bounded chunks. Each
//! chunk commits atomically; when a chunk is rejected its rows are retried one
//! at a time so a single bad record is counted as failed without sinking the
//! rest of the chunk.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Entity;

pub mod memory;
pub mod postgres;

pub use memory::MemoryEntityStore;
pub use postgres::PgEntityStore;

/// Upper bound on rows committed in one transaction
pub const MAX_BATCH_SIZE: usize = 1000;

/// Default chunk size used by the dispatcher
pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The write was rejected for this data (constraint, encoding, ...).
    #[error("write rejected for '{natural_key}': {message}")]
    Rejected { natural_key: String, message: String },

    /// The store itself is unusable (connection lost, pool closed, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// What happened to a single row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Per-call tally returned by [`EntityStore::upsert_batch`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertResult {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl UpsertResult {
    /// Rows whose stored content changed
    pub fn upserted(&self) -> u64 {
        self.inserted + self.updated
    }

    /// Rows that are now consistent with the input
    pub fn succeeded(&self) -> u64 {
        self.upserted() + self.unchanged
    }

    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

impl std::ops::AddAssign for UpsertResult {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.unchanged += rhs.unchanged;
        self.failed += rhs.failed;
    }
}

/// An entity with its hash and encoded payload computed once
#[derive(Debug, Clone)]
pub struct PreparedEntity {
    pub jurisdiction: String,
    pub natural_key: String,
    pub kind: &'static str,
    pub payload: serde_json::Value,
    pub content_hash: String,
    pub source_run_id: Option<Uuid>,
}

impl PreparedEntity {
    pub fn prepare(entity: &Entity) -> Result<Self, StoreError> {
        let rejected = |message: String| StoreError::Rejected {
            natural_key: entity.natural_key.clone(),
            message,
        };

        entity.validate().map_err(rejected)?;
        let content_hash = entity.content_hash().map_err(|e| rejected(e.to_string()))?;
        let payload = serde_json::to_value(&entity.payload).map_err(|e| rejected(e.to_string()))?;

        Ok(Self {
            jurisdiction: entity.jurisdiction.clone(),
            natural_key: entity.natural_key.clone(),
            kind: entity.kind(),
            payload,
            content_hash,
            source_run_id: entity.source_run_id,
        })
    }
}

/// A persisted entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEntity {
    pub jurisdiction: String,
    pub natural_key: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub content_hash: String,
    pub source_run_id: Option<Uuid>,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Write every row in one transaction; any rejection rolls back all.
    async fn write_chunk(&self, rows: &[PreparedEntity]) -> Result<Vec<UpsertOutcome>, StoreError>;

    /// Write a single row in its own transaction.
    async fn write_one(&self, row: &PreparedEntity) -> Result<UpsertOutcome, StoreError>;

    async fn get(
        &self,
        jurisdiction: &str,
        natural_key: &str,
    ) -> Result<Option<StoredEntity>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;

    /// Upsert `entities` in input order.
    ///
    /// Returns `Err` only when the store is unavailable; rejected rows are
    /// counted in [`UpsertResult::failed`].
    async fn upsert_batch(&self, entities: &[Entity]) -> Result<UpsertResult, StoreError> {
        let mut result = UpsertResult::default();

        for chunk in entities.chunks(MAX_BATCH_SIZE) {
            let mut rows = Vec::with_capacity(chunk.len());
            for entity in chunk {
                match PreparedEntity::prepare(entity) {
                    Ok(row) => rows.push(row),
                    Err(e) => {
                        tracing::warn!(error = %e, "Entity could not be encoded");
                        result.failed += 1;
                    },
                }
            }

            if rows.is_empty() {
                continue;
            }

            match self.write_chunk(&rows).await {
                Ok(outcomes) => outcomes.into_iter().for_each(|o| result.record(o)),
                Err(StoreError::Unavailable(message)) => {
                    return Err(StoreError::Unavailable(message));
                },
                Err(e) => {
                    tracing::warn!(
                        rows = rows.len(),
                        error = %e,
                        "Batch rejected, retrying row by row"
                    );
                    result += self.retry_rows(&rows).await?;
                },
            }
        }

        Ok(result)
    }

    /// Single-row fallback after a rejected chunk.
    async fn retry_rows(&self, rows: &[PreparedEntity]) -> Result<UpsertResult, StoreError> {
        let mut result = UpsertResult::default();
        for row in rows {
            match self.write_one(row).await {
                Ok(outcome) => result.record(outcome),
                Err(StoreError::Unavailable(message)) => {
                    return Err(StoreError::Unavailable(message));
                },
                Err(e) => {
                    tracing::warn!(
                        jurisdiction = %row.jurisdiction,
                        natural_key = %row.natural_key,
                        error = %e,
                        "Entity write failed"
                    );
                    result.failed += 1;
                },
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{EntityPayload, Politician};

    fn politician(key: &str) -> Entity {
        Entity::new(
            "ca_on",
            key,
            EntityPayload::Politician(Politician {
                name: key.to_string(),
                party: None,
                district: None,
                role: None,
                email: None,
            }),
        )
    }

    /// Memory store that refuses one natural key, like a constraint would.
    struct RefusingStore {
        inner: MemoryEntityStore,
        refused: &'static str,
    }

    impl RefusingStore {
        fn check(&self, row: &PreparedEntity) -> Result<(), StoreError> {
            if row.natural_key == self.refused {
                return Err(StoreError::Rejected {
                    natural_key: row.natural_key.clone(),
                    message: "violates check constraint".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EntityStore for RefusingStore {
        async fn write_chunk(&self, rows: &[PreparedEntity]) -> Result<Vec<UpsertOutcome>, StoreError> {
            rows.iter().try_for_each(|row| self.check(row))?;
            self.inner.write_chunk(rows).await
        }

        async fn write_one(&self, row: &PreparedEntity) -> Result<UpsertOutcome, StoreError> {
            self.check(row)?;
            self.inner.write_one(row).await
        }

        async fn get(
            &self,
            jurisdiction: &str,
            natural_key: &str,
        ) -> Result<Option<StoredEntity>, StoreError> {
            self.inner.get(jurisdiction, natural_key).await
        }

        async fn count(&self) -> Result<u64, StoreError> {
            self.inner.count().await
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            self.inner.health_check().await
        }
    }

    #[tokio::test]
    async fn test_rejected_chunk_is_retried_row_by_row() {
        let store = RefusingStore {
            inner: MemoryEntityStore::new(),
            refused: "ca_on/politician/bad",
        };
        let batch = [
            politician("ca_on/politician/a"),
            politician("ca_on/politician/bad"),
            politician("ca_on/politician/b"),
        ];

        let result = store.upsert_batch(&batch).await.unwrap();
        assert_eq!(result.inserted, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_entities_never_reach_the_store() {
        let store = RefusingStore {
            inner: MemoryEntityStore::new(),
            refused: "",
        };
        let mut no_jurisdiction = politician("ca_on/politician/c");
        no_jurisdiction.jurisdiction = " ".to_string();
        let batch = [politician("ca_on/politician/a"), politician(""), no_jurisdiction];

        // The refused key is blank, so reaching the store would reject the chunk.
        let result = store.upsert_batch(&batch).await.unwrap();
        assert_eq!(result.inserted, 1);
        assert_eq!(result.failed, 2);
    }

    #[test]
    fn test_prepare_validates_keys() {
        assert!(PreparedEntity::prepare(&politician("ca_on/politician/a")).is_ok());
        assert!(matches!(
            PreparedEntity::prepare(&politician("  ")),
            Err(StoreError::Rejected { .. })
        ));
    }

    #[test]
    fn test_upsert_result_arithmetic() {
        let mut result = UpsertResult::default();
        result.record(UpsertOutcome::Inserted);
        result.record(UpsertOutcome::Updated);
        result.record(UpsertOutcome::Unchanged);
        result += UpsertResult {
            failed: 2,
            ..Default::default()
        };

        assert_eq!(result.upserted(), 2);
        assert_eq!(result.succeeded(), 3);
        assert_eq!(result.failed, 2);
    }
}
