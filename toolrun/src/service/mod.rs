//! The reasoning-service interface the run engine drives.
//!
//! This module provides:
//! - The [`ReasoningService`] async trait (threads, messages, runs, tool outputs)
//! - Run status reports and tool-call wire types
//! - An Assistants-style HTTP client (feature `http`)

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpReasoningService;

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Remote run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, not yet started.
    Queued,
    /// Being processed.
    InProgress,
    /// A cancel was requested and is being honored.
    Cancelling,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled.
    Cancelled,
    /// Timed out upstream.
    Expired,
    /// Waiting for tool outputs.
    RequiresAction,
}

impl RunStatus {
    /// Returns true while the run is still working without our input.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress | Self::Cancelling)
    }

    /// Returns true for statuses a run never leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// The wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::RequiresAction => "requires_action",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool call the service wants resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredToolCall {
    /// Call id echoed back with the output.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments as a JSON-encoded string.
    pub arguments: String,
}

impl RequiredToolCall {
    /// Creates a call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// The output for one tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallOutput {
    /// The call this answers.
    pub tool_call_id: String,
    /// Output text.
    pub output: String,
}

impl ToolCallOutput {
    /// Creates an output.
    #[must_use]
    pub fn new(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
        }
    }

    /// Returns true if this output reports a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.output.starts_with("error:")
    }
}

/// One status poll result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatusReport {
    /// The run's status.
    pub status: RunStatus,
    /// Pending calls when `status` is `requires_action`.
    #[serde(default)]
    pub required_calls: Vec<RequiredToolCall>,
    /// Failure detail when `status` is `failed` or `expired`.
    #[serde(default)]
    pub error_detail: Option<String>,
}

impl RunStatusReport {
    /// Creates a report with no calls and no error.
    #[must_use]
    pub fn new(status: RunStatus) -> Self {
        Self {
            status,
            required_calls: Vec::new(),
            error_detail: None,
        }
    }

    /// A `requires_action` report.
    #[must_use]
    pub fn requires_action(calls: Vec<RequiredToolCall>) -> Self {
        Self {
            required_calls: calls,
            ..Self::new(RunStatus::RequiresAction)
        }
    }

    /// A `failed` report with a detail message.
    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::new(RunStatus::Failed)
        }
    }
}

/// Author of a thread message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The human side.
    User,
    /// The reasoning service.
    Assistant,
}

/// A message on a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Message id.
    pub id: String,
    /// Author.
    pub role: MessageRole,
    /// Plain-text content.
    pub content: String,
    /// Unix seconds.
    #[serde(default)]
    pub created_at: i64,
}

/// Operations the run engine needs from a reasoning service.
///
/// Implementations must be shareable across engines.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Creates a thread, returning its id.
    async fn create_thread(&self) -> Result<String, ServiceError>;

    /// Posts a user message to a thread.
    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), ServiceError>;

    /// Starts a run on a thread, returning its id.
    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<String, ServiceError>;

    /// Fetches a run's status.
    async fn get_run_status(
        &self,
        thread_id: &str,
        run_id: &str,
    ) -> Result<RunStatusReport, ServiceError>;

    /// Submits outputs for a requires-action batch.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolCallOutput>,
    ) -> Result<(), ServiceError>;

    /// Requests cancellation of a run.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<(), ServiceError>;

    /// Lists a thread's messages, oldest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ServiceError>;
}
