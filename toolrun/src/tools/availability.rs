//! The availability map: tool name to invocable implementation.

use super::SharedState;
use crate::errors::ToolError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Something the run engine can call with parsed arguments.
#[async_trait]
pub trait ToolFunction: Send + Sync {
    /// Invokes the tool.
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

type BoxedFn =
    dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value, ToolError>> + Send + Sync;

/// Adapts an async closure into a [`ToolFunction`].
pub struct FnTool {
    f: Box<BoxedFn>,
}

impl FnTool {
    /// Wraps a closure returning a future.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |args| Box::pin(f(args))),
        }
    }
}

#[async_trait]
impl ToolFunction for FnTool {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        (self.f)(args).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").finish_non_exhaustive()
    }
}

/// Runtime binding from tool name to implementation.
#[derive(Clone, Default)]
pub struct AvailabilityMap {
    tools: HashMap<String, Arc<dyn ToolFunction>>,
}

impl AvailabilityMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a tool function to a name, replacing any previous binding.
    pub fn insert(&mut self, name: impl Into<String>, tool: Arc<dyn ToolFunction>) {
        self.tools.insert(name.into(), tool);
    }

    /// Binds an async closure to a name.
    pub fn insert_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        self.insert(name, Arc::new(FnTool::new(f)));
    }

    /// Builder form of [`insert_fn`](Self::insert_fn).
    #[must_use]
    pub fn with_fn<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        self.insert_fn(name, f);
        self
    }

    /// Looks up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolFunction>> {
        self.tools.get(name).cloned()
    }

    /// Returns true if a binding exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Bound names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Adds every binding from `other`; `other` wins on name clashes.
    pub fn extend(&mut self, other: Self) {
        self.tools.extend(other.tools);
    }
}

impl std::fmt::Debug for AvailabilityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityMap")
            .field("tools", &self.names())
            .finish()
    }
}

/// Produces the availability map for one requires-action round.
///
/// The engine asks again on every round, so a provider backed by a live
/// registry picks up tools added or updated while the run is in flight.
pub trait ToolProvider: Send + Sync {
    /// Builds the map, binding callables to the run's shared state.
    fn availability(&self, state: &SharedState) -> AvailabilityMap;
}

impl ToolProvider for AvailabilityMap {
    fn availability(&self, _state: &SharedState) -> AvailabilityMap {
        self.clone()
    }
}
