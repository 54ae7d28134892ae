//! Content hashing for stored entities
//!
//! The store compares these hashes to decide whether an upsert actually
//! changes a row. `serde_json::Value` keeps object keys sorted, so two
//! payloads with the same fields in a different order hash identically.

use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of the canonical JSON encoding of `value`, hex encoded.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(sha256_hex(&bytes))
}

/// SHA-256 of raw bytes, hex encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
