//! Tool records, snapshots and their executable sources.

use super::ToolVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// The executable body of a tool.
///
/// Native sources name a Rust implementation registered with the
/// [`ToolExecutor`](super::ToolExecutor); script sources carry text that is
/// only ever run inside a [`ScriptSandbox`](super::ScriptSandbox) child process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSource {
    /// A compiled-in capability looked up by symbol.
    Native {
        /// The symbol the executor resolves.
        symbol: String,
    },
    /// Source text handed to the sandbox interpreter.
    Script {
        /// The script body.
        body: String,
    },
}

impl ToolSource {
    /// Creates a native source.
    #[must_use]
    pub fn native(symbol: impl Into<String>) -> Self {
        Self::Native {
            symbol: symbol.into(),
        }
    }

    /// Creates a script source.
    #[must_use]
    pub fn script(body: impl Into<String>) -> Self {
        Self::Script { body: body.into() }
    }

    /// Returns true for script sources.
    #[must_use]
    pub fn is_script(&self) -> bool {
        matches!(self, Self::Script { .. })
    }
}

impl From<&str> for ToolSource {
    fn from(body: &str) -> Self {
        Self::script(body)
    }
}

impl From<String> for ToolSource {
    fn from(body: String) -> Self {
        Self::Script { body }
    }
}

/// Bookkeeping attached to each record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// When the record was first added.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub last_modified_at: DateTime<Utc>,
    /// Who authored the tool, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// How many times the tool has been invoked.
    #[serde(default)]
    pub usage_count: u64,
    /// When the tool was last invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ToolMetadata {
    /// Creates metadata stamped with the current time.
    #[must_use]
    pub fn now(author: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_modified_at: now,
            author,
            usage_count: 0,
            last_used_at: None,
        }
    }
}

/// A frozen copy of a record at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSnapshot {
    /// The tool name.
    pub name: String,
    /// The version this snapshot was taken at.
    pub version: ToolVersion,
    /// The executable body.
    pub source: ToolSource,
    /// The I/O schema.
    pub schema: serde_json::Value,
    /// Tags.
    pub tags: BTreeSet<String>,
    /// Metadata as it was at snapshot time.
    pub metadata: ToolMetadata,
    /// Set when this version was produced by a rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<ToolVersion>,
}

/// A named, versioned, rollback-capable tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    /// Unique name.
    pub name: String,
    /// Current version.
    pub version: ToolVersion,
    /// Current executable body.
    pub source: ToolSource,
    /// Current I/O schema.
    pub schema: serde_json::Value,
    /// Current tags.
    pub tags: BTreeSet<String>,
    /// Metadata.
    pub metadata: ToolMetadata,
    /// Set when the current version was produced by a rollback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<ToolVersion>,
    /// Prior snapshots, oldest first.
    #[serde(default)]
    pub history: Vec<ToolSnapshot>,
}

impl ToolRecord {
    /// Creates a fresh record at version 1.0.0.
    #[must_use]
    pub fn new(name: impl Into<String>, source: impl Into<ToolSource>) -> Self {
        Self {
            name: name.into(),
            version: ToolVersion::INITIAL,
            source: source.into(),
            schema: serde_json::json!({}),
            tags: BTreeSet::new(),
            metadata: ToolMetadata::now(None),
            restored_from: None,
            history: Vec::new(),
        }
    }

    /// Sets the schema.
    #[must_use]
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = schema;
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.metadata.author = Some(author.into());
        self
    }

    /// Captures the current state as a snapshot (history excluded).
    #[must_use]
    pub fn snapshot(&self) -> ToolSnapshot {
        ToolSnapshot {
            name: self.name.clone(),
            version: self.version,
            source: self.source.clone(),
            schema: self.schema.clone(),
            tags: self.tags.clone(),
            metadata: self.metadata.clone(),
            restored_from: self.restored_from,
        }
    }

    /// Finds a historical snapshot by version.
    #[must_use]
    pub fn history_entry(&self, version: ToolVersion) -> Option<&ToolSnapshot> {
        self.history.iter().find(|s| s.version == version)
    }

    /// Returns true if the record carries this tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Hex sha256 over source, schema and tags.
    ///
    /// Two records with the same digest describe the same behavior, whatever
    /// their versions or metadata.
    #[must_use]
    pub fn content_digest(&self) -> String {
        content_digest(&self.source, &self.schema, &self.tags)
    }
}

/// Hex sha256 over the behavior-defining parts of a tool.
#[must_use]
pub fn content_digest(
    source: &ToolSource,
    schema: &serde_json::Value,
    tags: &BTreeSet<String>,
) -> String {
    let mut hasher = Sha256::new();
    match source {
        ToolSource::Native { symbol } => {
            hasher.update(b"native\0");
            hasher.update(symbol.as_bytes());
        }
        ToolSource::Script { body } => {
            hasher.update(b"script\0");
            hasher.update(body.as_bytes());
        }
    }
    hasher.update(b"\0");
    hasher.update(schema.to_string().as_bytes());
    for tag in tags {
        hasher.update(b"\0");
        hasher.update(tag.as_bytes());
    }
    hex::encode(hasher.finalize())
}
