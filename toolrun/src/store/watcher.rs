//! `notify`-backed watcher for a tool definition directory.

use super::WatchEvent;
use crate::errors::StoreError;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Keeps the underlying OS watcher alive; dropping it stops the events.
pub struct DirectoryWatcher {
    dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// The watched directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Starts watching `dir` (non-recursively), bridging notifications into a
/// bounded tokio channel for a [`HotReloader`](super::HotReloader).
pub fn watch_directory(
    dir: impl Into<PathBuf>,
    capacity: usize,
) -> Result<(DirectoryWatcher, mpsc::Receiver<WatchEvent>), StoreError> {
    let dir = dir.into();
    let (tx, rx) = mpsc::channel(capacity.max(1));

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                for watch_event in translate(&event) {
                    debug!(?watch_event, "Definition file event");
                    // The callback runs on notify's own thread, outside the runtime.
                    if tx.blocking_send(watch_event).is_err() {
                        return;
                    }
                }
            }
            Err(e) => error!("file watcher error: {e}"),
        }
    })
    .map_err(|e| StoreError::Watch(format!("failed to create watcher: {e}")))?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| StoreError::Watch(format!("failed to watch {}: {e}", dir.display())))?;

    info!(dir = %dir.display(), "Watching tool definitions");
    Ok((
        DirectoryWatcher {
            dir,
            _watcher: watcher,
        },
        rx,
    ))
}

/// Maps a raw notify event to zero or more reloader events.
fn translate(event: &Event) -> Vec<WatchEvent> {
    event
        .paths
        .iter()
        .filter_map(|path| {
            let path = path.clone();
            match event.kind {
                EventKind::Create(_) => Some(WatchEvent::Added(path)),
                EventKind::Remove(_) => Some(WatchEvent::Removed(path)),
                EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                    Some(WatchEvent::Removed(path))
                }
                EventKind::Modify(ModifyKind::Name(_)) => {
                    if path.exists() {
                        Some(WatchEvent::Added(path))
                    } else {
                        Some(WatchEvent::Removed(path))
                    }
                }
                EventKind::Modify(ModifyKind::Metadata(_)) => None,
                EventKind::Modify(_) => Some(WatchEvent::Changed(path)),
                _ => None,
            }
        })
        .collect()
}
