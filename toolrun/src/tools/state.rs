//! Run-scoped state shared by every tool invoked during a run.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A progress marker left by a tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMarker {
    /// The tool that left the marker.
    pub tool: String,
    /// Short human-readable status.
    pub message: String,
    /// When the marker was recorded.
    pub at: DateTime<Utc>,
}

/// A serialized result produced by a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkProduct {
    /// The tool that produced it.
    pub tool: String,
    /// The result, serialized as JSON text.
    pub payload: String,
    /// When it was recorded.
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StateInner {
    values: HashMap<String, serde_json::Value>,
    progress: Vec<ProgressMarker>,
    work_products: Vec<WorkProduct>,
}

/// Cheaply cloneable handle to the state of one run.
///
/// All clones observe the same data. Tools may also stash arbitrary JSON
/// values under string keys to hand data to later calls in the same run.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<StateInner>>,
}

impl SharedState {
    /// Creates empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a stashed value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().values.get(key).cloned()
    }

    /// Stashes a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Option<serde_json::Value> {
        self.inner.lock().values.insert(key.into(), value)
    }

    /// Appends a progress marker.
    pub fn push_progress(&self, tool: impl Into<String>, message: impl Into<String>) {
        self.inner.lock().progress.push(ProgressMarker {
            tool: tool.into(),
            message: message.into(),
            at: Utc::now(),
        });
    }

    /// Appends a work product, serializing `result` to JSON text.
    pub fn push_work_product(&self, tool: impl Into<String>, result: &serde_json::Value) {
        self.inner.lock().work_products.push(WorkProduct {
            tool: tool.into(),
            payload: result.to_string(),
            at: Utc::now(),
        });
    }

    /// Returns all progress markers in recording order.
    #[must_use]
    pub fn progress(&self) -> Vec<ProgressMarker> {
        self.inner.lock().progress.clone()
    }

    /// Returns all work products in recording order.
    #[must_use]
    pub fn work_products(&self) -> Vec<WorkProduct> {
        self.inner.lock().work_products.clone()
    }

    /// Clears everything, e.g. between runs.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.values.clear();
        inner.progress.clear();
        inner.work_products.clear();
    }

    /// JSON view of the whole state, for events and debugging.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let inner = self.inner.lock();
        serde_json::json!({
            "values": inner.values,
            "progress": inner.progress,
            "work_products": inner.work_products,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_data() {
        let state = SharedState::new();
        let other = state.clone();

        other.set("cwd", serde_json::json!("/tmp"));
        assert_eq!(state.get("cwd"), Some(serde_json::json!("/tmp")));
    }

    #[test]
    fn test_progress_and_work_products_are_ordered() {
        let state = SharedState::new();
        state.push_progress("a", "started");
        state.push_work_product("a", &serde_json::json!({"n": 1}));
        state.push_progress("b", "started");

        let progress = state.progress();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[1].tool, "b");

        let products = state.work_products();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].payload, r#"{"n":1}"#);
    }

    #[test]
    fn test_clear() {
        let state = SharedState::new();
        state.set("k", serde_json::json!(1));
        state.push_progress("a", "x");
        state.clear();

        assert!(state.get("k").is_none());
        assert!(state.progress().is_empty());
        assert_eq!(state.to_json()["work_products"], serde_json::json!([]));
    }
}
