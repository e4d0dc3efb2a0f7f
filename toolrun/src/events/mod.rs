//! Run lifecycle events.
//!
//! The run engine reports every transition through an [`EventSink`] in
//! addition to its tracing output, so embedders can drive a UI or collect
//! analytics without parsing logs.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, RunEvent};

/// A run was created on a thread.
pub const RUN_CREATED: &str = "run.created";
/// A status poll returned.
pub const RUN_POLLED: &str = "run.polled";
/// The run failed on a rate limit and the engine is backing off.
pub const RUN_RATE_LIMITED: &str = "run.rate_limited";
/// The run is waiting for tool outputs.
pub const RUN_REQUIRES_ACTION: &str = "run.requires_action";
/// A tool call is about to be dispatched.
pub const TOOL_INVOKED: &str = "tool.invoked";
/// A tool call produced a result.
pub const TOOL_COMPLETED: &str = "tool.completed";
/// A tool call failed.
pub const TOOL_FAILED: &str = "tool.failed";
/// A tool call named a tool with no binding.
pub const TOOL_UNAVAILABLE: &str = "tool.unavailable";
/// Tool outputs were submitted back to the run.
pub const RUN_OUTPUTS_SUBMITTED: &str = "run.outputs_submitted";
/// The run completed.
pub const RUN_COMPLETED: &str = "run.completed";
/// The run failed.
pub const RUN_FAILED: &str = "run.failed";
/// The run was cancelled.
pub const RUN_CANCELLED: &str = "run.cancelled";
