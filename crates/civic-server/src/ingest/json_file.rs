//! Built-in adapter that reads entities from a JSON document
//!
//! ```toml
//! [[jobs]]
//! job_id = "ca_on"
//! jurisdiction = "provincial"
//! mode = "bootstrap"
//! adapter = "json_file"
//! options = { path = "data/ca_on.json" }
//! ```
//!
//! The document is either a bare array of entities or `{"entities": [...]}`.
//! Records that do not deserialize are yielded as parse errors.

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::path::PathBuf;

use super::adapter::{Adapter, AdapterError, EntityStream, FetchRequest};
use crate::models::Entity;

pub const JSON_FILE_ADAPTER: &str = "json_file";

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileAdapter;

impl JsonFileAdapter {
    fn path(request: &FetchRequest) -> Result<PathBuf, AdapterError> {
        request
            .options
            .get("path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| {
                AdapterError::SourceUnavailable(format!(
                    "job '{}' has no options.path for the json_file adapter",
                    request.job_id
                ))
            })
    }
}

#[async_trait]
impl Adapter for JsonFileAdapter {
    fn name(&self) -> &str {
        JSON_FILE_ADAPTER
    }

    async fn fetch(&self, request: FetchRequest) -> Result<EntityStream, AdapterError> {
        let path = Self::path(&request)?;
        let raw = tokio::fs::read(&path).await.map_err(|e| {
            AdapterError::SourceUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;

        let document: Value = serde_json::from_slice(&raw).map_err(|e| {
            AdapterError::SourceUnavailable(format!("{} is not valid JSON: {e}", path.display()))
        })?;

        let records = match document {
            Value::Array(records) => records,
            Value::Object(mut object) => match object.remove("entities") {
                Some(Value::Array(records)) => records,
                _ => {
                    return Err(AdapterError::SourceUnavailable(format!(
                        "{} has no \"entities\" array",
                        path.display()
                    )))
                },
            },
            _ => {
                return Err(AdapterError::SourceUnavailable(format!(
                    "{} must contain an array of entities",
                    path.display()
                )))
            },
        };

        tracing::debug!(
            job_id = %request.job_id,
            path = %path.display(),
            records = records.len(),
            "Loaded entity document"
        );

        let entities = records.into_iter().enumerate().map(|(index, record)| {
            serde_json::from_value::<Entity>(record)
                .map_err(|e| AdapterError::parse(format!("record {index}: {e}")))
        });

        Ok(Box::pin(stream::iter(entities)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use civic_common::JobMode;
    use futures::StreamExt;
    use serde_json::json;
    use std::io::Write;

    fn request(options: Value) -> FetchRequest {
        FetchRequest {
            job_id: "ca_on".to_string(),
            mode: JobMode::Bootstrap,
            scope: None,
            since: None,
            options,
        }
    }

    fn write_document(document: &Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(document.to_string().as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_reads_wrapped_document_and_flags_bad_records() {
        let file = write_document(&json!({
            "entities": [
                {
                    "natural_key": "ca_on/politician/doug-ford",
                    "jurisdiction": "ca_on",
                    "payload": {"kind": "politician", "name": "Doug Ford"}
                },
                {"natural_key": "broken"},
                {
                    "natural_key": "ca_on/district/etobicoke-north",
                    "jurisdiction": "ca_on",
                    "payload": {"kind": "district", "name": "Etobicoke North"}
                }
            ]
        }));

        let adapter = JsonFileAdapter;
        let items: Vec<_> = adapter
            .fetch(request(json!({"path": file.path()})))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(AdapterError::Parse { context }) if context.starts_with("record 1")));
        assert_eq!(items[2].as_ref().unwrap().kind(), "district");
    }

    #[tokio::test]
    async fn test_bare_array_document() {
        let file = write_document(&json!([
            {
                "natural_key": "ca/bill/44-1/C-21",
                "jurisdiction": "ca",
                "payload": {"kind": "bill", "identifier": "C-21", "title": "Firearms"}
            }
        ]));

        let items: Vec<_> = JsonFileAdapter
            .fetch(request(json!({"path": file.path()})))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_source_unavailable() {
        let result = JsonFileAdapter
            .fetch(request(json!({"path": "/nonexistent/civicsync/ca_on.json"})))
            .await;
        assert!(matches!(result, Err(AdapterError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_missing_path_option() {
        let result = JsonFileAdapter.fetch(request(Value::Null)).await;
        assert!(matches!(result, Err(AdapterError::SourceUnavailable(msg)) if msg.contains("options.path")));
    }
}
