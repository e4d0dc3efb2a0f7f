//! Tools subsystem: versioned catalog and execution.
//!
//! This module provides:
//! - Tool records, versions and history snapshots
//! - The versioned [`ToolRegistry`] with update and rollback
//! - Run-scoped [`SharedState`] for progress markers and work products
//! - The [`ToolExecutor`] binding records to callables
//! - A child-process [`ScriptSandbox`] for script sources

mod availability;
mod executor;
mod record;
mod registry;
mod sandbox;
mod state;
mod version;

pub use availability::{AvailabilityMap, FnTool, ToolFunction, ToolProvider};
pub use executor::{NativeFn, NativeTool, ToolExecutor};
pub use record::{content_digest, ToolMetadata, ToolRecord, ToolSnapshot, ToolSource};
pub use registry::ToolRegistry;
pub use sandbox::{ScriptSandbox, TOOL_NAME_ENV};
pub use state::{ProgressMarker, SharedState, WorkProduct};
pub use version::ToolVersion;
