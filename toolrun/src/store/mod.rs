//! Persistence and hot-reload collaborators for the tool registry.
//!
//! This module provides:
//! - The [`ToolStore`] persistence interface with in-memory and JSON-directory backends
//! - Tool definition files as authored on disk
//! - A [`HotReloader`] that applies watcher events to a registry
//! - A `notify`-backed directory watcher (feature `watch`)

mod definition;
mod json_dir;
mod memory;
mod reload;
#[cfg(feature = "watch")]
mod watcher;

pub use definition::ToolDefinitionFile;
pub use json_dir::JsonDirToolStore;
pub use memory::MemoryToolStore;
pub use reload::{HotReloader, ReloadAction, WatchEvent};
#[cfg(feature = "watch")]
pub use watcher::{watch_directory, DirectoryWatcher};

use crate::errors::StoreError;
use crate::tools::ToolRecord;

/// Durable backing for a [`ToolRegistry`](crate::tools::ToolRegistry).
///
/// Implementations must be safe to call from many engines at once.
#[cfg_attr(test, mockall::automock)]
pub trait ToolStore: Send + Sync {
    /// Loads every persisted record.
    fn load_all(&self) -> Result<Vec<ToolRecord>, StoreError>;

    /// Inserts or replaces a record, history included.
    fn save(&self, record: &ToolRecord) -> Result<(), StoreError>;

    /// Deletes a record. Deleting an unknown name is not an error.
    fn delete(&self, name: &str) -> Result<(), StoreError>;
}
