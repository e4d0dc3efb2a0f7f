//! Tool definition files as authored on disk.

use crate::errors::StoreError;
use crate::tools::{ToolRecord, ToolSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// A hand-written tool definition.
///
/// ```json
/// {
///   "name": "list_files",
///   "source": {"kind": "script", "body": "ls -1 \"$(jq -r .path)\""},
///   "schema": {"type": "object", "properties": {"path": {"type": "string"}}},
///   "tags": ["fs"]
/// }
/// ```
///
/// When `name` is omitted the file stem is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinitionFile {
    /// Tool name.
    #[serde(default)]
    pub name: Option<String>,
    /// Executable body.
    pub source: ToolSource,
    /// I/O schema.
    #[serde(default = "empty_schema")]
    pub schema: serde_json::Value,
    /// Tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Author.
    #[serde(default)]
    pub author: Option<String>,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({})
}

impl ToolDefinitionFile {
    /// Parses a definition from JSON text.
    pub fn from_json(path: &Path, raw: &str) -> Result<Self, StoreError> {
        let mut definition: Self =
            serde_json::from_str(raw).map_err(|e| StoreError::InvalidDefinition {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        if definition.name.is_none() {
            definition.name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
        }

        match definition.name.as_deref() {
            Some(name) if !name.trim().is_empty() => Ok(definition),
            _ => Err(StoreError::InvalidDefinition {
                path: path.display().to_string(),
                reason: "tool name is empty".to_string(),
            }),
        }
    }

    /// Reads and parses a definition file.
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        Self::from_json(path, &raw)
    }

    /// The resolved tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Converts into a fresh version-1.0.0 record.
    #[must_use]
    pub fn into_record(self) -> ToolRecord {
        let Self {
            name,
            source,
            schema,
            tags,
            author,
        } = self;
        let mut record = ToolRecord::new(name.unwrap_or_default(), source)
            .with_schema(schema)
            .with_tags(tags);
        record.metadata.author = author;
        record
    }

    /// Digest of the behavior-defining fields.
    #[must_use]
    pub fn content_digest(&self) -> String {
        crate::tools::content_digest(&self.source, &self.schema, &self.tags)
    }
}
