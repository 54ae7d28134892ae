//! In-memory entity store
//!
//! Mirrors the PostgreSQL semantics: chunk writes are all-or-nothing and
//! rows with a blank key or jurisdiction are rejected. Used by tests and by
//! `civic-server --in-memory`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{EntityStore, PreparedEntity, StoreError, StoredEntity, UpsertOutcome};

type Key = (String, String);

#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    rows: Mutex<HashMap<Key, StoredEntity>>,
    unavailable: AtomicBool,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    fn validate(row: &PreparedEntity) -> Result<(), StoreError> {
        if row.natural_key.trim().is_empty() || row.jurisdiction.trim().is_empty() {
            return Err(StoreError::Rejected {
                natural_key: row.natural_key.clone(),
                message: "natural_key and jurisdiction must not be blank".to_string(),
            });
        }
        Ok(())
    }

    fn apply(rows: &mut HashMap<Key, StoredEntity>, row: &PreparedEntity) -> UpsertOutcome {
        let now = Utc::now();
        let key = (row.jurisdiction.clone(), row.natural_key.clone());

        match rows.get_mut(&key) {
            Some(existing) if existing.content_hash == row.content_hash => UpsertOutcome::Unchanged,
            Some(existing) => {
                existing.kind = row.kind.to_string();
                existing.payload = row.payload.clone();
                existing.content_hash = row.content_hash.clone();
                existing.source_run_id = row.source_run_id;
                existing.updated_at = now;
                UpsertOutcome::Updated
            },
            None => {
                rows.insert(
                    key,
                    StoredEntity {
                        jurisdiction: row.jurisdiction.clone(),
                        natural_key: row.natural_key.clone(),
                        kind: row.kind.to_string(),
                        payload: row.payload.clone(),
                        content_hash: row.content_hash.clone(),
                        source_run_id: row.source_run_id,
                        first_seen_at: now,
                        updated_at: now,
                    },
                );
                UpsertOutcome::Inserted
            },
        }
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn write_chunk(&self, rows: &[PreparedEntity]) -> Result<Vec<UpsertOutcome>, StoreError> {
        self.check_available()?;
        rows.iter().try_for_each(Self::validate)?;

        let mut stored = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.iter().map(|row| Self::apply(&mut stored, row)).collect())
    }

    async fn write_one(&self, row: &PreparedEntity) -> Result<UpsertOutcome, StoreError> {
        self.check_available()?;
        Self::validate(row)?;

        let mut stored = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Self::apply(&mut stored, row))
    }

    async fn get(
        &self,
        jurisdiction: &str,
        natural_key: &str,
    ) -> Result<Option<StoredEntity>, StoreError> {
        self.check_available()?;
        let stored = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stored
            .get(&(jurisdiction.to_string(), natural_key.to_string()))
            .cloned())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.check_available()?;
        let stored = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stored.len() as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
