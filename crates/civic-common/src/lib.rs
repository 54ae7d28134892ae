//! civicsync common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, hashing, logging and error handling for the civicsync
//! workspace.
//!
//! - **Error Handling**: [`CivicError`] and the [`Result`] alias
//! - **Checksums**: content hashing used by the idempotent upsert path
//! - **Logging**: `tracing` subscriber bootstrap shared by every binary
//! - **Types**: jurisdiction and job mode tags shared by server and CLI
//!
//! # Example
//!
//! ```no_run
//! use civic_common::checksum::content_hash;
//! use serde_json::json;
//!
//! let hash = content_hash(&json!({"name": "Ward 7"})).unwrap();
//! assert_eq!(hash.len(), 64);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CivicError, Result};
pub use types::{JobMode, Jurisdiction};
