//! In-memory tool store.

use super::ToolStore;
use crate::errors::StoreError;
use crate::tools::ToolRecord;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A [`ToolStore`] that keeps records in process memory.
///
/// Useful for tests and for sharing one catalog between several
/// registries in the same process.
#[derive(Debug, Default)]
pub struct MemoryToolStore {
    records: RwLock<HashMap<String, ToolRecord>>,
}

impl MemoryToolStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a stored record.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolRecord> {
        self.records.read().get(name).cloned()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl ToolStore for MemoryToolStore {
    fn load_all(&self) -> Result<Vec<ToolRecord>, StoreError> {
        let mut records: Vec<ToolRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    fn save(&self, record: &ToolRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.records.write().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolRegistry, ToolVersion};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[test]
    fn test_registry_writes_through() {
        let store = Arc::new(MemoryToolStore::new());
        let registry = ToolRegistry::with_store(store.clone());

        registry.add_tool("t", "echo 1", serde_json::json!({}), BTreeSet::new());
        registry.update_tool("t", "echo 2", None, None);

        let stored = store.get("t").unwrap();
        assert_eq!(stored.version, ToolVersion::new(1, 0, 1));
        assert_eq!(stored.history.len(), 1);

        registry.remove_tool("t");
        assert!(store.is_empty());
    }

    #[test]
    fn test_second_registry_hydrates_from_shared_store() {
        let store = Arc::new(MemoryToolStore::new());
        let first = ToolRegistry::with_store(store.clone());
        first.add_tool("a", "echo a", serde_json::json!({}), BTreeSet::new());
        first.add_tool("b", "echo b", serde_json::json!({}), BTreeSet::new());

        let second = ToolRegistry::with_store(store);
        assert_eq!(second.load_from_store().unwrap(), 2);
        assert_eq!(second.list_tools(), vec!["a", "b"]);
    }

    #[test]
    fn test_delete_unknown_is_ok() {
        let store = MemoryToolStore::new();
        assert!(store.delete("missing").is_ok());
        assert_eq!(store.len(), 0);
    }
}
