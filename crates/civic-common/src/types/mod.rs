//! Tags shared by the server and the CLI

use crate::error::CivicError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Level of government a job or entity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jurisdiction {
    Federal,
    Provincial,
    Municipal,
    Civic,
}

impl Jurisdiction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Jurisdiction::Federal => "federal",
            Jurisdiction::Provincial => "provincial",
            Jurisdiction::Municipal => "municipal",
            Jurisdiction::Civic => "civic",
        }
    }
}

impl FromStr for Jurisdiction {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "federal" => Ok(Jurisdiction::Federal),
            "provincial" => Ok(Jurisdiction::Provincial),
            "municipal" => Ok(Jurisdiction::Municipal),
            "civic" => Ok(Jurisdiction::Civic),
            _ => Err(CivicError::InvalidJurisdiction(s.to_string())),
        }
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of ingestion a job performs
///
/// `Bootstrap` jobs are one-shot full loads and are never picked up by the
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Daily,
    Bootstrap,
    Special,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobMode::Daily => "daily",
            JobMode::Bootstrap => "bootstrap",
            JobMode::Special => "special",
        }
    }

    pub fn is_schedulable(&self) -> bool {
        !matches!(self, JobMode::Bootstrap)
    }
}

impl FromStr for JobMode {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(JobMode::Daily),
            "bootstrap" => Ok(JobMode::Bootstrap),
            "special" => Ok(JobMode::Special),
            _ => Err(CivicError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
