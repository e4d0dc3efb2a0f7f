//! Versioned, rollback-capable tool registry.

use super::{ToolRecord, ToolSnapshot, ToolSource, ToolVersion};
use crate::errors::{RegistryError, StoreError};
use crate::store::ToolStore;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// In-memory catalog of tool records keyed by name.
///
/// Records live in a sharded map, so writers to different names do not
/// contend and concurrent writers to the same name are serialized
/// (last writer wins). Callers always receive clones.
///
/// When a [`ToolStore`] is attached every successful mutation is written
/// through to it while the record's entry is still locked, so the store sees
/// each name's versions in the order they were assigned. Store failures are
/// logged and never undo the in-memory change. A store must not call back
/// into the registry from `save`.
#[derive(Default)]
pub struct ToolRegistry {
    /// Live records.
    records: DashMap<String, ToolRecord>,
    /// Last removed record per name.
    tombstones: DashMap<String, ToolRecord>,
    /// Optional write-through persistence.
    store: Option<Arc<dyn ToolStore>>,
}

impl ToolRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry that writes through to `store`.
    #[must_use]
    pub fn with_store(store: Arc<dyn ToolStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// Hydrates the registry from its store.
    ///
    /// Names already present are kept (first registrant wins). Returns the
    /// number of records loaded.
    pub fn load_from_store(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut loaded = 0;
        for record in store.load_all()? {
            if let Entry::Vacant(slot) = self.records.entry(record.name.clone()) {
                slot.insert(record);
                loaded += 1;
            } else {
                warn!(tool = %record.name, "Skipping stored tool, name already registered");
            }
        }
        info!(count = loaded, "Loaded tools from store");
        Ok(loaded)
    }

    /// Adds a new tool at version 1.0.0.
    ///
    /// Returns `false` if a live tool with this name already exists; the
    /// existing record is left untouched.
    pub fn add_tool(
        &self,
        name: &str,
        source: impl Into<ToolSource>,
        schema: serde_json::Value,
        tags: BTreeSet<String>,
    ) -> bool {
        let record = ToolRecord::new(name, source).with_schema(schema);
        let record = ToolRecord { tags, ..record };
        self.try_add_record(record).is_ok()
    }

    /// Adds a prepared record, resetting its version, history and timestamps.
    pub fn try_add_record(&self, mut record: ToolRecord) -> Result<ToolVersion, RegistryError> {
        record.version = ToolVersion::INITIAL;
        record.history.clear();
        record.restored_from = None;
        let author = record.metadata.author.take();
        record.metadata = super::ToolMetadata::now(author);

        let version = match self.records.entry(record.name.clone()) {
            Entry::Occupied(_) => {
                debug!(tool = %record.name, "Add declined, name already registered");
                return Err(RegistryError::already_exists(record.name));
            }
            Entry::Vacant(slot) => {
                let saved = slot.insert(record);
                info!(tool = %saved.name, version = %saved.version, "Tool added");
                self.persist(&saved);
                saved.version
            }
        };
        Ok(version)
    }

    /// Updates a tool's source (and optionally schema and tags).
    ///
    /// Returns `false` if the tool does not exist.
    pub fn update_tool(
        &self,
        name: &str,
        source: impl Into<ToolSource>,
        schema: Option<serde_json::Value>,
        tags: Option<BTreeSet<String>>,
    ) -> bool {
        self.try_update_tool(name, source, schema, tags).is_ok()
    }

    /// Updates a tool, returning the new version.
    ///
    /// The pre-update record is appended to history and the patch component
    /// is incremented. Fails without changes once the patch component is
    /// exhausted.
    pub fn try_update_tool(
        &self,
        name: &str,
        source: impl Into<ToolSource>,
        schema: Option<serde_json::Value>,
        tags: Option<BTreeSet<String>>,
    ) -> Result<ToolVersion, RegistryError> {
        let mut record = self
            .records
            .get_mut(name)
            .ok_or_else(|| RegistryError::not_found(name))?;
        let next = record
            .version
            .bump_patch()
            .ok_or_else(|| RegistryError::version_exhausted(name, record.version))?;

        let prior = record.snapshot();
        record.history.push(prior);
        record.version = next;
        record.source = source.into();
        if let Some(schema) = schema {
            record.schema = schema;
        }
        if let Some(tags) = tags {
            record.tags = tags;
        }
        record.restored_from = None;
        record.metadata.last_modified_at = Utc::now();

        info!(tool = %name, version = %next, "Tool updated");
        self.persist(&record);
        Ok(next)
    }

    /// Restores a historical version as current.
    ///
    /// Returns `false` if the tool or the version does not exist, in which
    /// case nothing changes.
    pub fn rollback_tool(&self, name: &str, version: &str) -> bool {
        self.try_rollback_tool(name, version).is_ok()
    }

    /// Restores a historical version, returning the new current version.
    ///
    /// The rollback is an ordinary mutation: the prior current is appended
    /// to history and the patch component is incremented, so the restored
    /// state gets a fresh version and the rollback itself can be rolled back.
    pub fn try_rollback_tool(&self, name: &str, version: &str) -> Result<ToolVersion, RegistryError> {
        let target: ToolVersion = version.parse()?;

        let mut record = self
            .records
            .get_mut(name)
            .ok_or_else(|| RegistryError::not_found(name))?;

        let snapshot = record
            .history_entry(target)
            .cloned()
            .ok_or_else(|| RegistryError::version_not_found(name, version))?;
        let next = record
            .version
            .bump_patch()
            .ok_or_else(|| RegistryError::version_exhausted(name, record.version))?;

        let prior = record.snapshot();
        record.history.push(prior);
        record.version = next;
        record.source = snapshot.source;
        record.schema = snapshot.schema;
        record.tags = snapshot.tags;
        record.restored_from = Some(target);
        record.metadata.last_modified_at = Utc::now();

        info!(tool = %name, restored = %target, version = %next, "Tool rolled back");
        self.persist(&record);
        Ok(next)
    }

    /// Returns the tool's prior snapshots, oldest first.
    ///
    /// Unknown names yield an empty list.
    #[must_use]
    pub fn get_tool_history(&self, name: &str) -> Vec<ToolSnapshot> {
        self.records
            .get(name)
            .map(|record| record.history.clone())
            .unwrap_or_default()
    }

    /// Removes a tool, keeping it as a tombstone.
    ///
    /// Returns `false` if the tool does not exist.
    pub fn remove_tool(&self, name: &str) -> bool {
        self.try_remove_tool(name).is_ok()
    }

    /// Removes a tool, returning the removed record.
    pub fn try_remove_tool(&self, name: &str) -> Result<ToolRecord, RegistryError> {
        let (_, record) = self
            .records
            .remove(name)
            .ok_or_else(|| RegistryError::not_found(name))?;

        self.tombstones.insert(name.to_string(), record.clone());
        info!(tool = %name, version = %record.version, "Tool removed");

        if let Some(store) = &self.store {
            if let Err(e) = store.delete(name) {
                warn!(tool = %name, error = %e, "Failed to delete tool from store");
            }
        }
        Ok(record)
    }

    /// Records one invocation of a tool.
    ///
    /// Usage counters are not written through; they reach the store with the
    /// next mutation of the record.
    pub fn record_usage(&self, name: &str) -> bool {
        match self.records.get_mut(name) {
            Some(mut record) => {
                record.metadata.usage_count += 1;
                record.metadata.last_used_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Gets a copy of a live record.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolRecord> {
        self.records.get(name).map(|r| r.clone())
    }

    /// Gets the last removed record for a name.
    #[must_use]
    pub fn tombstone(&self, name: &str) -> Option<ToolRecord> {
        self.tombstones.get(name).map(|r| r.clone())
    }

    /// Checks if a live tool exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Lists live tool names, sorted.
    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns copies of the live records carrying `tag`.
    pub fn find_by_tag(&self, tag: &str) -> Vec<ToolRecord> {
        let mut found: Vec<ToolRecord> = self
            .records
            .iter()
            .filter(|r| r.has_tag(tag))
            .map(|r| r.clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Number of live tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn persist(&self, record: &ToolRecord) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(record) {
                warn!(tool = %record.name, error = %e, "Failed to persist tool");
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.records.len())
            .field("tombstone_count", &self.tombstones.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}
