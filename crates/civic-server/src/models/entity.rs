//! Normalized entity shapes emitted by adapters
//!
//! Every adapter, whatever its source, yields [`Entity`] values. The store
//! keys them by `(jurisdiction, natural_key)` and compares a hash of the
//! [`EntityPayload`] to decide whether an upsert changes anything.

use chrono::NaiveDate;
use civic_common::checksum::content_hash;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A normalized record ready for the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier within the jurisdiction, e.g. "ca_on/bill/43-1/C-12"
    pub natural_key: String,
    pub jurisdiction: String,
    pub payload: EntityPayload,
    /// Set by the dispatcher to the run that produced this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_run_id: Option<Uuid>,
}

impl Entity {
    pub fn new(
        jurisdiction: impl Into<String>,
        natural_key: impl Into<String>,
        payload: EntityPayload,
    ) -> Self {
        Self {
            natural_key: natural_key.into(),
            jurisdiction: jurisdiction.into(),
            payload,
            source_run_id: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Hash of the payload only; the key and run id do not take part.
    pub fn content_hash(&self) -> civic_common::Result<String> {
        content_hash(&self.payload)
    }

    /// Entities with a blank key or jurisdiction cannot be stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.natural_key.trim().is_empty() {
            return Err("natural_key must not be empty".to_string());
        }
        if self.jurisdiction.trim().is_empty() {
            return Err("jurisdiction must not be empty".to_string());
        }
        Ok(())
    }
}

/// Variant-specific fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityPayload {
    Bill(Bill),
    Politician(Politician),
    Vote(Vote),
    District(District),
    Committee(Committee),
}

impl EntityPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityPayload::Bill(_) => "bill",
            EntityPayload::Politician(_) => "politician",
            EntityPayload::Vote(_) => "vote",
            EntityPayload::District(_) => "district",
            EntityPayload::Committee(_) => "committee",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub identifier: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced_on: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sponsors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Politician {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub bill_identifier: String,
    pub motion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub held_on: Option<NaiveDate>,
    pub result: String,
    #[serde(default)]
    pub yeas: u32,
    #[serde(default)]
    pub nays: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct District {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committee {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chamber: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}
