//! # Toolrun
//!
//! A run engine and versioned tool registry for tool-calling assistant
//! conversations.
//!
//! Toolrun provides:
//!
//! - **Run engine**: submit a message, poll the reasoning service, dispatch
//!   tool calls, back off on rate limits and honor cancellation
//! - **Tool registry**: named tools with semantic versions, full history and
//!   rollback
//! - **Tool executor**: uniform invocation of native and sandboxed script
//!   tools against a run-scoped shared state
//! - **Sessions**: many concurrent engines with one active for input
//! - **Stores and hot reload**: persist records and reload definition files
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use toolrun::prelude::*;
//!
//! let registry = Arc::new(ToolRegistry::new());
//! let executor = ToolExecutor::new(registry);
//! executor.install_native("list_files", Arc::new(ListFiles), schema, tags);
//!
//! let service = Arc::new(HttpReasoningService::new(HttpServiceConfig::new(key))?);
//! let engine = RunEngine::new(service, Arc::new(executor), EngineConfig::new("asst_1"));
//!
//! let outcome = engine.submit("list files").await;
//! println!("{}", outcome.message());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod service;
pub mod session;
pub mod store;
pub mod testing;
pub mod tools;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{EngineConfig, HttpServiceConfig, SandboxConfig, ToolrunConfig};
    pub use crate::engine::{EnginePhase, PollStrategy, RunEngine, RunOutcome};
    pub use crate::errors::{
        EngineError, RegistryError, ServiceError, SessionError, StoreError, ToolError,
        ToolrunError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    #[cfg(feature = "http")]
    pub use crate::service::HttpReasoningService;
    pub use crate::service::{ReasoningService, RunStatus, ToolCallOutput};
    pub use crate::session::SessionManager;
    pub use crate::store::{JsonDirToolStore, MemoryToolStore, ToolStore};
    pub use crate::tools::{
        AvailabilityMap, NativeTool, SharedState, ToolExecutor, ToolProvider, ToolRecord,
        ToolRegistry, ToolSource, ToolVersion,
    };
}
