//! In-memory job registry

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::{JobRegistry, RegistryError, SyncMode};
use crate::models::JobDefinition;

#[derive(Debug, Clone)]
struct Entry {
    job: JobDefinition,
    enabled_override: Option<bool>,
}

impl Entry {
    fn effective(&self) -> JobDefinition {
        let mut job = self.job.clone();
        job.enabled = self.enabled_override.unwrap_or(job.enabled);
        job
    }
}

#[derive(Debug, Default)]
pub struct MemoryJobRegistry {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry already synced with `jobs`.
    pub fn with_jobs(jobs: Vec<JobDefinition>) -> Self {
        let entries = jobs
            .into_iter()
            .map(|job| {
                (
                    job.job_id.clone(),
                    Entry {
                        job,
                        enabled_override: None,
                    },
                )
            })
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl JobRegistry for MemoryJobRegistry {
    async fn sync(&self, jobs: &[JobDefinition], mode: SyncMode) -> Result<(), RegistryError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if mode == SyncMode::Replace {
            entries.retain(|job_id, _| jobs.iter().any(|j| &j.job_id == job_id));
        }

        for job in jobs {
            let enabled_override = entries.get(&job.job_id).and_then(|e| e.enabled_override);
            entries.insert(
                job.job_id.clone(),
                Entry {
                    job: job.clone(),
                    enabled_override,
                },
            );
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<JobDefinition>, RegistryError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.values().map(Entry::effective).collect())
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobDefinition>, RegistryError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(job_id).map(Entry::effective))
    }

    async fn set_enabled(&self, job_id: &str, enabled: bool) -> Result<bool, RegistryError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(match entries.get_mut(job_id) {
            Some(entry) => {
                entry.enabled_override = Some(enabled);
                true
            },
            None => false,
        })
    }
}
