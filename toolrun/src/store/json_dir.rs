//! JSON-file-per-tool store.

use super::ToolStore;
use crate::errors::StoreError;
use crate::tools::ToolRecord;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A [`ToolStore`] writing each record, history included, to
/// `<dir>/<name>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash never leaves a half-written record behind.
#[derive(Debug, Clone)]
pub struct JsonDirToolStore {
    dir: PathBuf,
}

impl JsonDirToolStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// The root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `name`.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains('\0')
        {
            return Err(StoreError::InvalidDefinition {
                path: self.dir.display().to_string(),
                reason: format!("tool name '{name}' cannot be used as a file name"),
            });
        }
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl ToolStore for JsonDirToolStore {
    fn load_all(&self) -> Result<Vec<ToolRecord>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
            match serde_json::from_str::<ToolRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable tool record");
                }
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(dir = %self.dir.display(), count = records.len(), "Loaded tool records");
        Ok(records)
    }

    fn save(&self, record: &ToolRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.name)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(record)?;

        fs::write(&tmp, body).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolRegistry, ToolVersion};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirToolStore::open(dir.path()).unwrap();
        let record = ToolRecord::new("list_files", "ls").with_tags(["fs"]);

        store.save(&record).unwrap();
        assert!(dir.path().join("list_files.json").exists());

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![record]);

        store.delete("list_files").unwrap();
        assert!(store.load_all().unwrap().is_empty());
        store.delete("list_files").unwrap();
    }

    #[test]
    fn test_history_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry =
                ToolRegistry::with_store(Arc::new(JsonDirToolStore::open(dir.path()).unwrap()));
            registry.add_tool("t", "echo 1", serde_json::json!({}), BTreeSet::new());
            registry.update_tool("t", "echo 2", None, None);
            registry.rollback_tool("t", "1.0.0");
        }

        let registry =
            ToolRegistry::with_store(Arc::new(JsonDirToolStore::open(dir.path()).unwrap()));
        registry.load_from_store().unwrap();

        let record = registry.get("t").unwrap();
        assert_eq!(record.version, ToolVersion::new(1, 0, 2));
        assert_eq!(record.restored_from, Some(ToolVersion::INITIAL));
        assert_eq!(registry.get_tool_history("t").len(), 2);
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirToolStore::open(dir.path()).unwrap();
        store.save(&ToolRecord::new("good", "true")).unwrap();
        fs::write(dir.path().join("bad.json"), "{ nope").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "good");
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirToolStore::open(dir.path()).unwrap();

        assert!(store.save(&ToolRecord::new("../escape", "true")).is_err());
        assert!(store.path_for(".hidden").is_err());
        assert!(store.path_for("ok_name").is_ok());
    }
}
