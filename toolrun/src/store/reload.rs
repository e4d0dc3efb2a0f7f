//! Applies tool definition file changes to a live registry.

use super::ToolDefinitionFile;
use crate::tools::{ToolRegistry, ToolVersion};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A filesystem change to a definition file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file appeared.
    Added(PathBuf),
    /// A file's contents changed.
    Changed(PathBuf),
    /// A file disappeared.
    Removed(PathBuf),
}

impl WatchEvent {
    /// The path the event refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Added(p) | Self::Changed(p) | Self::Removed(p) => p,
        }
    }
}

/// What the reloader did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadAction {
    /// A new tool was registered.
    Added {
        /// Tool name.
        name: String,
        /// Its version.
        version: ToolVersion,
    },
    /// An existing tool got a new version.
    Updated {
        /// Tool name.
        name: String,
        /// The new version.
        version: ToolVersion,
    },
    /// The file changed but the tool's behavior did not.
    Unchanged {
        /// Tool name.
        name: String,
    },
    /// The tool was removed.
    Removed {
        /// Tool name.
        name: String,
    },
    /// The event could not be applied.
    Rejected {
        /// The file involved.
        path: PathBuf,
        /// Why.
        reason: String,
    },
    /// Not a definition file, or nothing to do.
    Ignored {
        /// The file involved.
        path: PathBuf,
    },
}

/// Keeps a [`ToolRegistry`] in sync with a directory of definition files.
///
/// Only `*.json` files are considered. A definition whose name is already
/// registered from another file is rejected (first registrant wins). A
/// change that leaves source, schema and tags byte-identical does not mint
/// a new version.
pub struct HotReloader {
    registry: Arc<ToolRegistry>,
    /// Which tool each definition file registered.
    owners: Mutex<HashMap<PathBuf, String>>,
}

impl HotReloader {
    /// Creates a reloader for `registry`.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            owners: Mutex::new(HashMap::new()),
        }
    }

    /// Loads every definition currently in `dir`, in file-name order.
    pub fn scan(&self, dir: &Path) -> std::io::Result<Vec<ReloadAction>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_definition(p))
            .collect();
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|p| self.apply(WatchEvent::Added(p)))
            .collect())
    }

    /// Applies one event.
    pub fn apply(&self, event: WatchEvent) -> ReloadAction {
        let path = event.path().to_path_buf();
        if !is_definition(&path) {
            return ReloadAction::Ignored { path };
        }

        let action = match event {
            WatchEvent::Added(path) | WatchEvent::Changed(path) => self.upsert(path),
            WatchEvent::Removed(path) => self.remove(path),
        };

        match &action {
            ReloadAction::Rejected { path, reason } => {
                warn!(path = %path.display(), reason = %reason, "Tool definition rejected");
            }
            ReloadAction::Ignored { .. } | ReloadAction::Unchanged { .. } => {
                debug!(?action, "Tool definition event had no effect");
            }
            _ => info!(?action, "Tool definition applied"),
        }
        action
    }

    /// Consumes events until the channel closes.
    pub async fn run(&self, mut events: mpsc::Receiver<WatchEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
        debug!("Hot reload channel closed");
    }

    /// Name registered by `path`, if any.
    #[must_use]
    pub fn owner_of(&self, path: &Path) -> Option<String> {
        self.owners.lock().get(path).cloned()
    }

    fn upsert(&self, path: PathBuf) -> ReloadAction {
        let definition = match ToolDefinitionFile::from_path(&path) {
            Ok(d) => d,
            Err(e) => {
                return ReloadAction::Rejected {
                    path,
                    reason: e.to_string(),
                }
            }
        };
        let name = definition.name().to_string();

        let mut owners = self.owners.lock();
        let previous = owners.get(&path).cloned();

        // The file now defines a different tool: retire the old one.
        if let Some(old) = previous.as_deref().filter(|old| *old != name) {
            self.registry.remove_tool(old);
            owners.remove(&path);
        }

        let owned_here = previous.as_deref() == Some(name.as_str());
        match self.registry.get(&name) {
            Some(current) if owned_here => {
                if current.content_digest() == definition.content_digest() {
                    return ReloadAction::Unchanged { name };
                }
                match self.registry.try_update_tool(
                    &name,
                    definition.source,
                    Some(definition.schema),
                    Some(definition.tags),
                ) {
                    Ok(version) => ReloadAction::Updated { name, version },
                    Err(e) => ReloadAction::Rejected {
                        path,
                        reason: e.to_string(),
                    },
                }
            }
            Some(_) => ReloadAction::Rejected {
                path,
                reason: format!("tool '{name}' is already registered"),
            },
            None => match self.registry.try_add_record(definition.into_record()) {
                Ok(version) => {
                    owners.insert(path, name.clone());
                    ReloadAction::Added { name, version }
                }
                Err(e) => ReloadAction::Rejected {
                    path,
                    reason: e.to_string(),
                },
            },
        }
    }

    fn remove(&self, path: PathBuf) -> ReloadAction {
        let Some(name) = self.owners.lock().remove(&path) else {
            return ReloadAction::Ignored { path };
        };
        if self.registry.remove_tool(&name) {
            ReloadAction::Removed { name }
        } else {
            ReloadAction::Ignored { path }
        }
    }
}

impl std::fmt::Debug for HotReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotReloader")
            .field("files", &self.owners.lock().len())
            .finish_non_exhaustive()
    }
}

fn is_definition(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}
