//! Tool executor: binds registry records to callables for a run.

use super::{
    AvailabilityMap, ScriptSandbox, SharedState, ToolFunction, ToolProvider, ToolRegistry,
    ToolSource,
};
use crate::errors::ToolError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// A compiled-in tool implementation, resolved by symbol.
#[async_trait]
pub trait NativeTool: Send + Sync {
    /// Runs the tool against the run's shared state.
    async fn call(
        &self,
        params: serde_json::Value,
        state: &SharedState,
    ) -> anyhow::Result<serde_json::Value>;
}

type NativeFnBox = dyn Fn(serde_json::Value, SharedState) -> BoxFuture<'static, anyhow::Result<serde_json::Value>>
    + Send
    + Sync;

/// Adapts an async closure into a [`NativeTool`].
pub struct NativeFn {
    f: Box<NativeFnBox>,
}

impl NativeFn {
    /// Wraps a closure that receives the parameters and a state handle.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(serde_json::Value, SharedState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            f: Box::new(move |params, state| Box::pin(f(params, state))),
        }
    }
}

#[async_trait]
impl NativeTool for NativeFn {
    async fn call(
        &self,
        params: serde_json::Value,
        state: &SharedState,
    ) -> anyhow::Result<serde_json::Value> {
        (self.f)(params, state.clone()).await
    }
}

/// Executes registry tools with progress tracking and usage accounting.
///
/// Every invocation leaves a progress marker in the run's [`SharedState`];
/// successful invocations also leave a serialized work product. The
/// executor resolves records from the registry at call time, so an update
/// made mid-run takes effect on the next call.
#[derive(Clone)]
pub struct ToolExecutor {
    /// Tool catalog.
    registry: Arc<ToolRegistry>,
    /// Native implementations by symbol.
    natives: Arc<RwLock<HashMap<String, Arc<dyn NativeTool>>>>,
    /// Runner for script sources.
    sandbox: Arc<ScriptSandbox>,
}

impl ToolExecutor {
    /// Creates an executor over `registry` with a default sandbox.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            natives: Arc::new(RwLock::new(HashMap::new())),
            sandbox: Arc::new(ScriptSandbox::default()),
        }
    }

    /// Replaces the script sandbox.
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: ScriptSandbox) -> Self {
        self.sandbox = Arc::new(sandbox);
        self
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Registers the implementation behind a native symbol.
    pub fn register_native(&self, symbol: impl Into<String>, tool: Arc<dyn NativeTool>) {
        self.natives.write().insert(symbol.into(), tool);
    }

    /// Registers an async closure as a native symbol.
    pub fn register_native_fn<F, Fut>(&self, symbol: impl Into<String>, f: F)
    where
        F: Fn(serde_json::Value, SharedState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.register_native(symbol, Arc::new(NativeFn::new(f)));
    }

    /// Registers a native implementation and adds a registry record for it
    /// under the same name.
    ///
    /// Returns `false` if the name is already registered; the
    /// implementation is still installed for the symbol.
    pub fn install_native(
        &self,
        name: &str,
        tool: Arc<dyn NativeTool>,
        schema: serde_json::Value,
        tags: BTreeSet<String>,
    ) -> bool {
        self.register_native(name, tool);
        self.registry
            .add_tool(name, ToolSource::native(name), schema, tags)
    }

    /// Returns true if a native symbol is registered.
    #[must_use]
    pub fn has_native(&self, symbol: &str) -> bool {
        self.natives.read().contains_key(symbol)
    }

    /// Invokes the current version of `name`.
    pub async fn invoke(
        &self,
        name: &str,
        params: serde_json::Value,
        state: &SharedState,
    ) -> Result<serde_json::Value, ToolError> {
        let record = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::not_available(name))?;

        state.push_progress(name, format!("invoking {name}@{}", record.version));
        self.registry.record_usage(name);
        debug!(tool = name, version = %record.version, "Invoking tool");

        let result = match &record.source {
            ToolSource::Native { symbol } => {
                let native = self.natives.read().get(symbol).cloned();
                let Some(native) = native else {
                    return Err(ToolError::execution_failed(
                        name,
                        format!("no native implementation registered for '{symbol}'"),
                    ));
                };
                native
                    .call(params, state)
                    .await
                    .map_err(|e| ToolError::execution_failed(name, format!("{e:#}")))
            }
            ToolSource::Script { body } => self.sandbox.run(name, body, &params).await,
        };

        match &result {
            Ok(value) => state.push_work_product(name, value),
            Err(e) => {
                warn!(tool = name, error = %e, "Tool invocation failed");
                state.push_progress(name, format!("failed: {}", e.reason()));
            }
        }
        result
    }

    /// Binds `name` to `state`, producing a callable for the engine.
    ///
    /// Returns `None` if the registry has no live tool by that name.
    #[must_use]
    pub fn bind(&self, name: &str, state: &SharedState) -> Option<Arc<dyn ToolFunction>> {
        if !self.registry.contains(name) {
            return None;
        }
        Some(Arc::new(BoundTool {
            executor: self.clone(),
            name: name.to_string(),
            state: state.clone(),
        }))
    }
}

impl ToolProvider for ToolExecutor {
    fn availability(&self, state: &SharedState) -> AvailabilityMap {
        let mut map = AvailabilityMap::new();
        for name in self.registry.list_tools() {
            if let Some(tool) = self.bind(&name, state) {
                map.insert(name, tool);
            }
        }
        map
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut natives: Vec<String> = self.natives.read().keys().cloned().collect();
        natives.sort();
        f.debug_struct("ToolExecutor")
            .field("tools", &self.registry.len())
            .field("natives", &natives)
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

/// A registry tool bound to one run's state.
struct BoundTool {
    executor: ToolExecutor,
    name: String,
    state: SharedState,
}

#[async_trait]
impl ToolFunction for BoundTool {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        self.executor.invoke(&self.name, args, &self.state).await
    }
}
