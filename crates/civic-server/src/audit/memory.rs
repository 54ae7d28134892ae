//! In-memory audit log

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, PoisonError};

use super::{AuditEntry, AuditError, AuditLog, AuditQuery, NewAuditEntry};

#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, AuditError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let stored = AuditEntry {
            id: entries.len() as i64 + 1,
            actor: entry.actor,
            action: entry.action,
            target_job_id: entry.target_job_id,
            result: entry.result,
            timestamp: Utc::now(),
        };
        entries.push(stored.clone());
        Ok(stored)
    }

    async fn query(&self, query: &AuditQuery) -> Result<(Vec<AuditEntry>, i64), AuditError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let matching: Vec<&AuditEntry> = entries.iter().rev().filter(|e| query.matches(e)).collect();
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(query.effective_offset() as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }
}
